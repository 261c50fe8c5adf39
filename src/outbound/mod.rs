//! Outbound module
//!
//! This module provides the outbound capability shared by protocol clients
//! and outbound groups, plus the registry that owns them.
//!
//! # Outbound Types
//!
//! - `DirectOutbound`: Connect directly to the destination, optionally from
//!   a specific local address.
//! - `BlockOutbound`: Block/drop all connections (for ad-blocking, access control).
//!
//! Groups (`crate::group`) implement the same [`Outbound`] trait and are
//! registered in the same [`OutboundManager`].
//!
//! # Example
//!
//! ```no_run
//! use outbound_groups::outbound::{
//!     BlockOutbound, DialContext, Destination, DirectOutbound, Outbound, OutboundManager,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create outbound manager
//! let manager = OutboundManager::new();
//!
//! // Add direct outbound
//! manager.add(Box::new(DirectOutbound::simple("direct")));
//!
//! // Add block outbound for ads
//! manager.add(Box::new(BlockOutbound::new("adblock")));
//!
//! // Get and use an outbound
//! if let Some(outbound) = manager.get("direct") {
//!     let destination = Destination::domain("example.com", 80);
//!     let _stream = outbound.dial_stream(&DialContext::new(), &destination).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod block;
mod direct;
mod manager;
mod relay;
mod traits;
mod types;

pub use block::BlockOutbound;
pub use direct::DirectOutbound;
pub use manager::{GroupStatus, OutboundManager, OutboundManagerBuilder};
pub use relay::{relay_packets, relay_stream, RelayStats, DEFAULT_PACKET_IDLE_TIMEOUT};
pub use traits::{Outbound, OutboundRegistry};
pub use types::{
    BoxedPacketConn, BoxedStream, DialContext, Destination, InboundContext, Network, PacketConn,
    ProxyStream,
};
