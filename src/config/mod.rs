//! Configuration module for outbound-groups
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use outbound_groups::config::load_config;
//!
//! let config = load_config("/etc/outbound-groups/config.json").unwrap();
//! println!("Groups: {}", config.group_count());
//! ```

pub mod duration;
mod loader;
mod types;

pub use loader::{
    create_default_config, load_config, load_config_str, load_config_with_env, ENV_LOG_FORMAT,
    ENV_LOG_LEVEL,
};
pub use types::{
    BlockOptions, Config, DirectOptions, LoadBalanceOptions, LogConfig, OutboundConfig,
    OutboundOptions, SelectorOptions, UrlTestOptions,
};
