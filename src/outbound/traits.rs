//! Outbound trait definitions
//!
//! This module defines the `Outbound` capability every egress path
//! implements, and the `OutboundRegistry` used to resolve tags into
//! live outbounds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::types::{BoxedPacketConn, BoxedStream, DialContext, Destination, InboundContext, Network};
use crate::error::OutboundError;

/// Core trait for outbound implementations
///
/// Protocol clients and outbound groups both implement this trait, so a
/// group can list another group as a member.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Get the unique tag for this outbound
    fn tag(&self) -> &str;

    /// Get the outbound type name
    fn outbound_type(&self) -> &str;

    /// Networks this outbound can carry
    fn network(&self) -> Vec<Network>;

    /// Tags this outbound needs resolved before it can carry traffic
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Check if this outbound carries the given network
    fn supports(&self, network: Network) -> bool {
        self.network().contains(&network)
    }

    /// Open a stream to `destination`.
    ///
    /// # Errors
    ///
    /// Returns `OutboundError` if the connection fails, times out or the
    /// caller cancels through `ctx`.
    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedStream, OutboundError>;

    /// Open a packet conduit towards `destination`.
    ///
    /// # Errors
    ///
    /// Returns `OutboundError` if the socket cannot be set up.
    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedPacketConn, OutboundError>;

    /// Proxy an already accepted inbound stream until either side closes.
    ///
    /// # Errors
    ///
    /// Returns `OutboundError` if the upstream cannot be reached or the relay
    /// fails.
    async fn new_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedStream,
        metadata: InboundContext,
    ) -> Result<(), OutboundError>;

    /// Proxy an inbound packet conduit until it goes idle or fails.
    ///
    /// # Errors
    ///
    /// Returns `OutboundError` if the upstream conduit cannot be opened or
    /// the relay fails.
    async fn new_packet_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedPacketConn,
        metadata: InboundContext,
    ) -> Result<(), OutboundError>;
}

/// Tag lookup used to bind group members after all outbounds exist.
pub trait OutboundRegistry: Send + Sync {
    /// Get an outbound by tag
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>>;
}

impl OutboundRegistry for HashMap<String, Arc<dyn Outbound>> {
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.get(tag).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::BlockOutbound;

    #[test]
    fn test_hashmap_registry() {
        let mut registry: HashMap<String, Arc<dyn Outbound>> = HashMap::new();
        registry.insert("block".into(), Arc::new(BlockOutbound::new("block")));

        assert_eq!(registry.outbound("block").unwrap().tag(), "block");
        assert!(registry.outbound("missing").is_none());
    }

    #[test]
    fn test_default_capabilities() {
        let block = BlockOutbound::new("block");
        assert!(block.supports(Network::Tcp));
        assert!(block.supports(Network::Udp));
        assert!(block.dependencies().is_empty());
    }
}
