//! Outbound groups
//!
//! A group is itself an [`Outbound`] that hands every operation to one of
//! its members. Three strategies are provided:
//!
//! - [`Selector`]: the member picked by the operator (or the configured
//!   default).
//! - [`UrlTest`]: the lowest-latency member, re-evaluated by a background
//!   probe task with a tolerance margin against flapping.
//! - [`LoadBalance`]: weighted round-robin over all members.
//!
//! Members are referenced by tag at construction and bound to live handles
//! in [`OutboundGroup::start`], after every outbound has been registered.
//! Groups may list other groups as members.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use outbound_groups::config::SelectorOptions;
//! use outbound_groups::group::{OutboundGroup, Selector};
//! use outbound_groups::outbound::{DirectOutbound, Outbound};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry: HashMap<String, Arc<dyn Outbound>> = HashMap::new();
//! registry.insert("a".into(), Arc::new(DirectOutbound::simple("a")));
//! registry.insert("b".into(), Arc::new(DirectOutbound::simple("b")));
//!
//! let selector = Selector::new(
//!     "proxy",
//!     &SelectorOptions {
//!         outbounds: vec!["a".into(), "b".into()],
//!         ..SelectorOptions::default()
//!     },
//! )?;
//! selector.start(&registry)?;
//! selector.select_member("b")?;
//! assert_eq!(selector.now(), "b");
//! # Ok(())
//! # }
//! ```

mod loadbalance;
mod probe;
mod selector;
mod urltest;

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::config::{OutboundConfig, OutboundOptions};
use crate::error::GroupError;
use crate::outbound::{Network, Outbound, OutboundRegistry};

pub use loadbalance::{resolve_weights, LoadBalance};
pub use probe::{probe_destination, ConnectProber, LatencyProber, DEFAULT_PROBE_URL};
pub use selector::Selector;
pub use urltest::{
    MemberHealth, MemberStatus, UrlTest, DEFAULT_IDLE_TIMEOUT, DEFAULT_INTERVAL,
    DEFAULT_TOLERANCE, MAX_CONCURRENT_PROBES, PROBE_TIMEOUT,
};

/// Operations shared by every group strategy
#[async_trait]
pub trait OutboundGroup: Outbound {
    /// Tag of the member currently preferred for new traffic
    fn now(&self) -> String;

    /// Member tags in configuration order
    fn all(&self) -> &[String];

    /// Bind member tags to live outbounds and start background work.
    ///
    /// # Errors
    ///
    /// Returns `OutboundNotFound` for the first unknown member (nothing is
    /// retained), `AlreadyStarted` on a second call, or `NoRuntime` if the
    /// group needs a tokio runtime and none is running.
    fn start(&self, registry: &dyn OutboundRegistry) -> Result<(), GroupError>;

    /// Stop background work. Members are not closed.
    async fn close(&self);
}

/// Ordered member list resolved once from tags to handles
pub struct Members {
    group: String,
    tags: Vec<String>,
    resolved: OnceLock<Vec<Arc<dyn Outbound>>>,
}

impl Members {
    /// Create an unresolved member list.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMembers` for an empty list and `SelfReference` if the
    /// group lists its own tag.
    pub fn new(group: &str, tags: Vec<String>) -> Result<Self, GroupError> {
        if tags.is_empty() {
            return Err(GroupError::EmptyMembers {
                group: group.to_string(),
            });
        }
        if tags.iter().any(|tag| tag == group) {
            return Err(GroupError::SelfReference {
                group: group.to_string(),
            });
        }
        Ok(Self {
            group: group.to_string(),
            tags,
            resolved: OnceLock::new(),
        })
    }

    /// Member tags in configuration order
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Always false; member lists are never empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Position of `tag` in the member list
    #[must_use]
    pub fn index_of(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|t| t == tag)
    }

    /// Whether `resolve` has succeeded
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Look every tag up in `registry` and publish the handles.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown tag without publishing anything, or with
    /// `AlreadyStarted` if the members were resolved before.
    pub fn resolve(&self, registry: &dyn OutboundRegistry) -> Result<(), GroupError> {
        if self.is_resolved() {
            return Err(GroupError::AlreadyStarted {
                group: self.group.clone(),
            });
        }

        let mut outbounds = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            let outbound = registry
                .outbound(tag)
                .ok_or_else(|| GroupError::outbound_not_found(&self.group, tag))?;
            outbounds.push(outbound);
        }

        self.resolved
            .set(outbounds)
            .map_err(|_| GroupError::AlreadyStarted {
                group: self.group.clone(),
            })
    }

    /// Resolved handles, same order as [`tags`](Self::tags).
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` before resolution.
    pub fn get(&self) -> Result<&[Arc<dyn Outbound>], GroupError> {
        self.resolved
            .get()
            .map(Vec::as_slice)
            .ok_or_else(|| GroupError::not_started(&self.group))
    }

    /// Union of member networks; every network before resolution
    #[must_use]
    pub fn network_union(&self) -> Vec<Network> {
        match self.resolved.get() {
            Some(members) => Network::ALL
                .into_iter()
                .filter(|network| members.iter().any(|m| m.supports(*network)))
                .collect(),
            None => Network::ALL.to_vec(),
        }
    }
}

impl fmt::Debug for Members {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Members")
            .field("group", &self.group)
            .field("tags", &self.tags)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A configured group of any strategy
#[derive(Clone, Debug)]
pub enum Group {
    /// Manually selected group
    Selector(Arc<Selector>),
    /// Latency-tested group
    UrlTest(Arc<UrlTest>),
    /// Weighted round-robin group
    LoadBalance(Arc<LoadBalance>),
}

impl Group {
    /// Build a group from configuration.
    ///
    /// Returns `Ok(None)` if the configuration does not describe a group.
    ///
    /// # Errors
    ///
    /// Returns the construction error of the group.
    pub fn from_config(
        config: &OutboundConfig,
        prober: &Arc<dyn LatencyProber>,
    ) -> Result<Option<Self>, GroupError> {
        let group = match &config.options {
            OutboundOptions::Selector(options) => {
                Self::Selector(Arc::new(Selector::new(&config.tag, options)?))
            }
            OutboundOptions::UrlTest(options) => Self::UrlTest(Arc::new(UrlTest::new(
                &config.tag,
                options,
                Arc::clone(prober),
            )?)),
            OutboundOptions::LoadBalance(options) => {
                Self::LoadBalance(Arc::new(LoadBalance::new(&config.tag, options)?))
            }
            OutboundOptions::Direct(_) | OutboundOptions::Block(_) => return Ok(None),
        };
        Ok(Some(group))
    }

    /// Group tag
    #[must_use]
    pub fn tag(&self) -> &str {
        self.as_group().tag()
    }

    /// Strategy type name
    #[must_use]
    pub fn group_type(&self) -> &str {
        self.as_group().outbound_type()
    }

    /// Shared group operations
    #[must_use]
    pub fn as_group(&self) -> &dyn OutboundGroup {
        match self {
            Self::Selector(group) => group.as_ref(),
            Self::UrlTest(group) => group.as_ref(),
            Self::LoadBalance(group) => group.as_ref(),
        }
    }

    /// The group as a plain outbound handle, for registration
    #[must_use]
    pub fn as_outbound(&self) -> Arc<dyn Outbound> {
        match self {
            Self::Selector(group) => Arc::clone(group) as Arc<dyn Outbound>,
            Self::UrlTest(group) => Arc::clone(group) as Arc<dyn Outbound>,
            Self::LoadBalance(group) => Arc::clone(group) as Arc<dyn Outbound>,
        }
    }

    /// The selector, if this is one
    #[must_use]
    pub fn as_selector(&self) -> Option<&Arc<Selector>> {
        match self {
            Self::Selector(group) => Some(group),
            _ => None,
        }
    }

    /// The URL test group, if this is one
    #[must_use]
    pub fn as_urltest(&self) -> Option<&Arc<UrlTest>> {
        match self {
            Self::UrlTest(group) => Some(group),
            _ => None,
        }
    }

    /// The load balance group, if this is one
    #[must_use]
    pub fn as_loadbalance(&self) -> Option<&Arc<LoadBalance>> {
        match self {
            Self::LoadBalance(group) => Some(group),
            _ => None,
        }
    }
}
