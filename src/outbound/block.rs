//! Block outbound implementation
//!
//! This module provides the `BlockOutbound` type which refuses every
//! connection. Used for ad-blocking, access control and as a group member
//! that is always reachable but never carries traffic.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::traits::Outbound;
use super::types::{BoxedPacketConn, BoxedStream, DialContext, Destination, InboundContext, Network};
use crate::error::OutboundError;

/// Block outbound - drops all connections
pub struct BlockOutbound {
    /// Tag for this outbound
    tag: String,
    /// Number of refused requests
    blocked: AtomicU64,
}

impl BlockOutbound {
    /// Create a new block outbound
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            blocked: AtomicU64::new(0),
        }
    }

    /// Number of requests refused so far
    #[must_use]
    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    fn refuse(&self, network: Network, destination: &Destination) -> OutboundError {
        self.blocked.fetch_add(1, Ordering::Relaxed);
        debug!(tag = %self.tag, %network, %destination, "Blocking request");
        OutboundError::unavailable(&self.tag, format!("{network} to {destination} blocked"))
    }
}

#[async_trait]
impl Outbound for BlockOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        "block"
    }

    fn network(&self) -> Vec<Network> {
        // Block "supports" both networks so routing can direct anything here
        Network::ALL.to_vec()
    }

    async fn dial_stream(
        &self,
        _ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedStream, OutboundError> {
        Err(self.refuse(Network::Tcp, destination))
    }

    async fn listen_packet(
        &self,
        _ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedPacketConn, OutboundError> {
        Err(self.refuse(Network::Udp, destination))
    }

    async fn new_connection(
        &self,
        _ctx: &DialContext,
        _conn: BoxedStream,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        Err(self.refuse(Network::Tcp, &metadata.destination))
    }

    async fn new_packet_connection(
        &self,
        _ctx: &DialContext,
        _conn: BoxedPacketConn,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        Err(self.refuse(Network::Udp, &metadata.destination))
    }
}

impl std::fmt::Debug for BlockOutbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockOutbound")
            .field("tag", &self.tag)
            .field("blocked_count", &self.blocked_count())
            .finish()
    }
}
