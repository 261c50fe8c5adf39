//! outbound-groups: Outbound group strategies for proxy routers
//!
//! This crate decides which egress path carries each new connection. Groups
//! wrap several member outbounds behind the same [`Outbound`] interface the
//! members implement, so routers can treat a group like any other outbound.
//!
//! # Features
//!
//! - **Selector**: Operator-controlled member selection with a default
//! - **URL Test**: Latency-probed automatic selection with tolerance and failover
//! - **Load Balance**: Weighted round-robin dispatch
//! - **Nested Groups**: Groups may list groups, started in dependency order
//! - **Interrupts**: Optional force-close of connections on member switch
//!
//! # Architecture
//!
//! ```text
//! Inbound → Router → Group → chosen member → Destination
//!                      ↑
//!              URL test probe task
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use outbound_groups::config::load_config;
//! use outbound_groups::outbound::OutboundManagerBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration
//! let config = load_config("/etc/outbound-groups/config.json")?;
//!
//! // Create outbounds and groups
//! let mut builder = OutboundManagerBuilder::new();
//! builder.add_all_from_config(&config.outbounds)?;
//! let manager = builder.build();
//!
//! // Bind group members and start URL test probing
//! manager.start_groups()?;
//!
//! // Route traffic through manager.get("proxy")...
//!
//! manager.close_groups().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Connection interruption on member switch
//! - [`error`]: Error types
//! - [`group`]: Selector, URL test and load balance groups
//! - [`outbound`]: Outbound trait, reference outbounds and registry

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod error;
pub mod group;
pub mod outbound;

// Re-export commonly used types at the crate root
pub use config::{Config, OutboundConfig};
pub use error::{ConfigError, GroupError, OutboundError, RouterError};
pub use group::{Group, LoadBalance, OutboundGroup, Selector, UrlTest};
pub use outbound::{BlockOutbound, DirectOutbound, Outbound, OutboundManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
