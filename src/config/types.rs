//! Configuration types for outbound-groups
//!
//! This module defines all configuration structures used by the router.
//! Configuration is loaded from JSON files and can be validated at startup.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, GroupError};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Outbound and outbound group configurations
    pub outbounds: Vec<OutboundConfig>,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate()?;

        if self.outbounds.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one outbound must be configured".into(),
            ));
        }

        let mut tags: HashSet<&str> = HashSet::new();
        for outbound in &self.outbounds {
            outbound.validate()?;
            if !tags.insert(&outbound.tag) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate outbound tag: {}",
                    outbound.tag
                )));
            }
        }

        Ok(())
    }

    /// Number of configured groups
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.outbounds.iter().filter(|o| o.options.is_group()).count()
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            log: LogConfig::default(),
            outbounds: vec![
                OutboundConfig::direct("direct"),
                OutboundConfig::block("block"),
                OutboundConfig::selector("select", vec!["direct".into(), "block".into()]),
            ],
        }
    }
}

/// One configured outbound: a tag plus type-specific options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundConfig {
    /// Unique tag (identifier)
    pub tag: String,

    /// Type-specific options, selected by the `type` field
    #[serde(flatten)]
    pub options: OutboundOptions,
}

impl OutboundConfig {
    /// Validate outbound configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for malformed tags or invalid
    /// group options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.is_empty() {
            return Err(ConfigError::ValidationError(
                "Outbound tag cannot be empty".into(),
            ));
        }

        if !self
            .tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::ValidationError(format!(
                "Outbound tag '{}' contains invalid characters (only alphanumeric, '-', '_' allowed)",
                self.tag
            )));
        }

        match &self.options {
            OutboundOptions::Direct(_) | OutboundOptions::Block(_) => {}
            OutboundOptions::Selector(options) => options.validate(&self.tag)?,
            OutboundOptions::UrlTest(options) => options.validate(&self.tag)?,
            OutboundOptions::LoadBalance(options) => options.validate(&self.tag)?,
        }

        Ok(())
    }

    /// Type name as written in configuration
    #[must_use]
    pub const fn outbound_type(&self) -> &'static str {
        self.options.type_name()
    }

    /// Create a direct outbound config
    pub fn direct(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            options: OutboundOptions::Direct(DirectOptions::default()),
        }
    }

    /// Create a block outbound config
    pub fn block(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            options: OutboundOptions::Block(BlockOptions {}),
        }
    }

    /// Create a selector group config
    pub fn selector(tag: impl Into<String>, outbounds: Vec<String>) -> Self {
        Self {
            tag: tag.into(),
            options: OutboundOptions::Selector(SelectorOptions {
                outbounds,
                ..SelectorOptions::default()
            }),
        }
    }

    /// Create a URL test group config with default probe settings
    pub fn urltest(tag: impl Into<String>, outbounds: Vec<String>) -> Self {
        Self {
            tag: tag.into(),
            options: OutboundOptions::UrlTest(UrlTestOptions {
                outbounds,
                ..UrlTestOptions::default()
            }),
        }
    }

    /// Create a load balance group config
    pub fn loadbalance(tag: impl Into<String>, outbounds: Vec<String>, weights: Vec<u32>) -> Self {
        Self {
            tag: tag.into(),
            options: OutboundOptions::LoadBalance(LoadBalanceOptions { outbounds, weights }),
        }
    }
}

/// Type-specific outbound options
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundOptions {
    /// Direct connection
    Direct(DirectOptions),
    /// Refuse everything
    Block(BlockOptions),
    /// Manually selected group
    Selector(SelectorOptions),
    /// Latency-tested group
    UrlTest(UrlTestOptions),
    /// Weighted round-robin group
    LoadBalance(LoadBalanceOptions),
}

impl OutboundOptions {
    /// Type name as written in configuration
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Block(_) => "block",
            Self::Selector(_) => "selector",
            Self::UrlTest(_) => "urltest",
            Self::LoadBalance(_) => "loadbalance",
        }
    }

    /// Whether these options describe an outbound group
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(
            self,
            Self::Selector(_) | Self::UrlTest(_) | Self::LoadBalance(_)
        )
    }
}

/// Direct outbound options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectOptions {
    /// Bind to this local address before connecting
    #[serde(default)]
    pub bind_address: Option<SocketAddr>,

    /// Connect timeout in seconds, used when the caller sets no deadline
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl DirectOptions {
    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DirectOptions {
    fn default() -> Self {
        Self {
            bind_address: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Block outbound options (none)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BlockOptions {}

/// Selector group options
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SelectorOptions {
    /// Member outbound tags
    #[serde(default)]
    pub outbounds: Vec<String>,

    /// Initially selected member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Close connections of the previous member on switch
    #[serde(default)]
    pub interrupt_exist_connections: bool,
}

impl SelectorOptions {
    /// Validate selector options
    ///
    /// # Errors
    ///
    /// Returns the `GroupError` the group constructor would return.
    pub fn validate(&self, tag: &str) -> Result<(), GroupError> {
        validate_members(tag, &self.outbounds)
    }
}

/// URL test group options
///
/// Zero durations, zero tolerance and an empty URL mean "use the default".
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UrlTestOptions {
    /// Member outbound tags
    #[serde(default)]
    pub outbounds: Vec<String>,

    /// Probe target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Probe period
    #[serde(default, with = "super::duration")]
    pub interval: Duration,

    /// Latency margin in milliseconds within which the current member is kept
    #[serde(default)]
    pub tolerance: u16,

    /// Probing pauses after this long without traffic
    #[serde(default, with = "super::duration")]
    pub idle_timeout: Duration,

    /// Close connections of the previous member on automatic switch
    #[serde(default)]
    pub interrupt_exist_connections: bool,
}

impl UrlTestOptions {
    /// Validate URL test options
    ///
    /// # Errors
    ///
    /// Returns the `GroupError` the group constructor would return.
    pub fn validate(&self, tag: &str) -> Result<(), GroupError> {
        validate_members(tag, &self.outbounds)?;
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            crate::group::probe_destination(url).map_err(|reason| GroupError::InvalidOption {
                group: tag.to_string(),
                reason,
            })?;
        }
        Ok(())
    }
}

impl Default for UrlTestOptions {
    fn default() -> Self {
        Self {
            outbounds: Vec::new(),
            url: None,
            interval: Duration::ZERO,
            tolerance: 0,
            idle_timeout: Duration::ZERO,
            interrupt_exist_connections: false,
        }
    }
}

/// Load balance group options
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoadBalanceOptions {
    /// Member outbound tags
    #[serde(default)]
    pub outbounds: Vec<String>,

    /// Per-member weights, parallel to `outbounds`; empty means 1 each
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weights: Vec<u32>,
}

impl LoadBalanceOptions {
    /// Validate load balance options
    ///
    /// # Errors
    ///
    /// Returns the `GroupError` the group constructor would return.
    pub fn validate(&self, tag: &str) -> Result<(), GroupError> {
        validate_members(tag, &self.outbounds)?;
        crate::group::resolve_weights(tag, &self.weights, self.outbounds.len()).map(|_| ())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for unknown levels or formats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

        if !LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}': expected one of {}",
                self.level,
                LEVELS.join(", ")
            )));
        }

        if !matches!(self.format.as_str(), "json" | "text") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format '{}': expected 'json' or 'text'",
                self.format
            )));
        }

        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            target: true,
        }
    }
}

fn validate_members(tag: &str, outbounds: &[String]) -> Result<(), GroupError> {
    if outbounds.is_empty() {
        return Err(GroupError::EmptyMembers {
            group: tag.to_string(),
        });
    }
    if outbounds.iter().any(|member| member == tag) {
        return Err(GroupError::SelfReference {
            group: tag.to_string(),
        });
    }
    Ok(())
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.group_count(), 1);
    }

    #[test]
    fn test_parse_all_outbound_types() {
        let json = r#"{
            "outbounds": [
                { "tag": "direct", "type": "direct", "bind_address": "127.0.0.1:0" },
                { "tag": "deny", "type": "block" },
                { "tag": "manual", "type": "selector", "outbounds": ["auto", "direct"],
                  "default": "auto", "interrupt_exist_connections": true },
                { "tag": "auto", "type": "urltest", "outbounds": ["direct", "deny"],
                  "url": "http://example.com/generate_204", "interval": "1m30s",
                  "tolerance": 20, "idle_timeout": 600 },
                { "tag": "spread", "type": "loadbalance", "outbounds": ["direct", "deny"],
                  "weights": [2, 1] }
            ]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.group_count(), 3);

        match &config.outbounds[0].options {
            OutboundOptions::Direct(options) => {
                assert!(options.bind_address.is_some());
                assert_eq!(options.connect_timeout(), Duration::from_secs(10));
            }
            other => panic!("unexpected options: {other:?}"),
        }

        match &config.outbounds[2].options {
            OutboundOptions::Selector(options) => {
                assert_eq!(options.default.as_deref(), Some("auto"));
                assert!(options.interrupt_exist_connections);
            }
            other => panic!("unexpected options: {other:?}"),
        }

        match &config.outbounds[3].options {
            OutboundOptions::UrlTest(options) => {
                assert_eq!(options.interval, Duration::from_secs(90));
                assert_eq!(options.idle_timeout, Duration::from_secs(600));
                assert_eq!(options.tolerance, 20);
                assert!(!options.interrupt_exist_connections);
            }
            other => panic!("unexpected options: {other:?}"),
        }

        match &config.outbounds[4].options {
            OutboundOptions::LoadBalance(options) => assert_eq!(options.weights, vec![2, 1]),
            other => panic!("unexpected options: {other:?}"),
        }
        assert_eq!(config.outbounds[4].outbound_type(), "loadbalance");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{ "outbounds": [{ "tag": "x", "type": "vmess" }] }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn test_duplicate_tags() {
        let config = Config {
            log: LogConfig::default(),
            outbounds: vec![OutboundConfig::direct("same"), OutboundConfig::block("same")],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_tag_characters() {
        assert!(OutboundConfig::direct("bad tag").validate().is_err());
        assert!(OutboundConfig::direct("").validate().is_err());
        assert!(OutboundConfig::direct("us-east_1").validate().is_ok());
    }

    #[test]
    fn test_group_validation() {
        let empty = OutboundConfig::selector("g", vec![]);
        assert!(empty.validate().is_err());

        let itself = OutboundConfig::loadbalance("g", vec!["g".into()], vec![]);
        assert!(itself.validate().is_err());

        let mismatch = OutboundConfig::loadbalance("g", vec!["a".into(), "b".into()], vec![1]);
        assert!(mismatch.validate().is_err());

        let zero = OutboundConfig::loadbalance("g", vec!["a".into(), "b".into()], vec![0, 0]);
        assert!(zero.validate().is_err());

        let mut bad_url = OutboundConfig::urltest("g", vec!["a".into()]);
        if let OutboundOptions::UrlTest(options) = &mut bad_url.options {
            options.url = Some("not a url".into());
        }
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn test_log_config_validation() {
        let mut log = LogConfig::default();
        assert!(log.validate().is_ok());

        log.level = "verbose".into();
        assert!(log.validate().is_err());

        log.level = "DEBUG".into();
        log.format = "xml".into();
        assert!(log.validate().is_err());
    }

    #[test]
    fn test_serialize_round_trip_keeps_type() {
        let config = Config::default_config();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""type":"selector""#));
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.outbounds.len(), config.outbounds.len());
    }
}
