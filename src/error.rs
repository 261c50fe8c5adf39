//! Error types for outbound-groups
//!
//! This module defines the error hierarchy for outbounds and outbound groups.
//! All errors are categorized by subsystem and include recovery hints.

use std::io;

use thiserror::Error;

use crate::outbound::Network;

/// Top-level error type for outbound-groups
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Outbound connection errors
    #[error("Outbound error: {0}")]
    Outbound(#[from] OutboundError),

    /// Outbound group construction, resolution and selection errors
    #[error("Group error: {0}")]
    Group(#[from] GroupError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RouterError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Outbound(e) => e.is_recoverable(),
            Self::Group(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

impl From<GroupError> for ConfigError {
    fn from(err: GroupError) -> Self {
        Self::ValidationError(err.to_string())
    }
}

/// Broad category of a [`GroupError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupErrorKind {
    /// Invalid group options, surfaced at construction
    Config,
    /// Member tags could not be bound, surfaced at start
    Resolution,
    /// A single traffic or control call could not be served
    Selection,
}

/// Outbound group errors
#[derive(Debug, Clone, Error)]
pub enum GroupError {
    /// Group configured without members
    #[error("group {group}: missing member outbounds")]
    EmptyMembers { group: String },

    /// Weight list does not line up with the member list
    #[error("group {group}: {weights} weights configured for {members} members")]
    WeightsMismatch {
        group: String,
        weights: usize,
        members: usize,
    },

    /// Every configured weight is zero
    #[error("group {group}: at least one weight must be positive")]
    ZeroWeights { group: String },

    /// Group lists its own tag as a member
    #[error("group {group} lists itself as a member")]
    SelfReference { group: String },

    /// Any other invalid option value
    #[error("group {group}: invalid option: {reason}")]
    InvalidOption { group: String, reason: String },

    /// Member tag missing from the registry
    #[error("outbound not found: {tag}")]
    OutboundNotFound { group: String, tag: String },

    /// Groups reference each other in a loop
    #[error("outbound dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    /// Members were already resolved
    #[error("group {group} is already started")]
    AlreadyStarted { group: String },

    /// Members have not been resolved yet
    #[error("group {group} is not started")]
    NotStarted { group: String },

    /// Background work needs a tokio runtime
    #[error("group {group} must be started inside a tokio runtime")]
    NoRuntime { group: String },

    /// Manual selection of a tag that is not a member
    #[error("member not found: {tag}")]
    MemberNotFound { group: String, tag: String },

    /// No eligible member handles the requested network
    #[error("group {group}: unsupported network {network}")]
    UnsupportedNetwork { group: String, network: Network },
}

impl GroupError {
    /// Get the category of this error
    #[must_use]
    pub const fn kind(&self) -> GroupErrorKind {
        match self {
            Self::EmptyMembers { .. }
            | Self::WeightsMismatch { .. }
            | Self::ZeroWeights { .. }
            | Self::SelfReference { .. }
            | Self::InvalidOption { .. } => GroupErrorKind::Config,
            Self::OutboundNotFound { .. }
            | Self::DependencyCycle { .. }
            | Self::AlreadyStarted { .. }
            | Self::NotStarted { .. }
            | Self::NoRuntime { .. } => GroupErrorKind::Resolution,
            Self::MemberNotFound { .. } | Self::UnsupportedNetwork { .. } => {
                GroupErrorKind::Selection
            }
        }
    }

    /// Check if this error is recoverable
    ///
    /// Selection errors are returned to the caller of one operation and leave
    /// the group usable; everything else needs a configuration change.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), GroupErrorKind::Selection)
    }

    /// Create an outbound not found error
    pub fn outbound_not_found(group: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::OutboundNotFound {
            group: group.into(),
            tag: tag.into(),
        }
    }

    /// Create a member not found error
    pub fn member_not_found(group: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::MemberNotFound {
            group: group.into(),
            tag: tag.into(),
        }
    }

    /// Create an unsupported network error
    pub fn unsupported_network(group: impl Into<String>, network: Network) -> Self {
        Self::UnsupportedNetwork {
            group: group.into(),
            network,
        }
    }

    /// Create a not started error
    pub fn not_started(group: impl Into<String>) -> Self {
        Self::NotStarted {
            group: group.into(),
        }
    }
}

/// Outbound connection errors
#[derive(Debug, Error)]
pub enum OutboundError {
    /// Connection failed
    #[error("Failed to connect to {destination}: {reason}")]
    ConnectionFailed { destination: String, reason: String },

    /// Connection timeout
    #[error("Connection to {destination} timed out after {timeout_ms}ms")]
    Timeout { destination: String, timeout_ms: u64 },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Outbound is disabled or refuses traffic
    #[error("Outbound {tag} is unavailable: {reason}")]
    Unavailable { tag: String, reason: String },

    /// Group-level failure while choosing a member
    #[error(transparent)]
    Group(#[from] GroupError),

    /// I/O error during connection
    #[error("Outbound I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl OutboundError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::Cancelled => false,
            Self::Unavailable { .. } => true,
            Self::Group(e) => e.is_recoverable(),
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(destination: impl ToString, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(destination: impl ToString, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            destination: destination.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}
