//! Outbound Manager
//!
//! This module provides centralized management of outbounds and outbound
//! groups: registration, lookup by tag, dependency-ordered group start-up
//! and shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use super::traits::{Outbound, OutboundRegistry};
use super::{BlockOutbound, DirectOutbound};
use crate::config::{OutboundConfig, OutboundOptions};
use crate::error::GroupError;
use crate::group::{ConnectProber, Group, LatencyProber};

/// Snapshot of one group for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    /// Strategy type name
    #[serde(rename = "type")]
    pub group_type: String,
    /// Member currently preferred for new traffic
    pub now: String,
    /// Member tags in configuration order
    pub members: Vec<String>,
}

/// Manages all configured outbounds and groups
pub struct OutboundManager {
    /// Map of outbound tag to outbound implementation (groups included)
    outbounds: DashMap<String, Arc<dyn Outbound>>,
    /// Map of group tag to group
    groups: DashMap<String, Group>,
}

impl OutboundManager {
    /// Create a new outbound manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            outbounds: DashMap::new(),
            groups: DashMap::new(),
        }
    }

    /// Add an outbound to the manager
    pub fn add(&self, outbound: Box<dyn Outbound>) {
        self.add_arc(Arc::from(outbound));
    }

    /// Add a shared outbound to the manager
    pub fn add_arc(&self, outbound: Arc<dyn Outbound>) {
        let tag = outbound.tag().to_string();
        info!(
            "Adding outbound: {} (type: {})",
            tag,
            outbound.outbound_type()
        );
        self.outbounds.insert(tag, outbound);
    }

    /// Add a group; it is also registered as an outbound under its tag
    pub fn add_group(&self, group: Group) {
        let tag = group.tag().to_string();
        info!(
            "Adding group: {} (type: {}, members: {:?})",
            tag,
            group.group_type(),
            group.as_group().all()
        );
        self.outbounds.insert(tag.clone(), group.as_outbound());
        self.groups.insert(tag, group);
    }

    /// Get an outbound by tag
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.outbounds.get(tag).map(|r| Arc::clone(r.value()))
    }

    /// Get a group by tag
    #[must_use]
    pub fn group(&self, tag: &str) -> Option<Group> {
        self.groups.get(tag).map(|r| r.value().clone())
    }

    /// Check if an outbound exists
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.outbounds.contains_key(tag)
    }

    /// Get all outbound tags
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.outbounds.iter().map(|r| r.key().clone()).collect()
    }

    /// Get all groups
    #[must_use]
    pub fn groups(&self) -> Vec<Group> {
        self.groups.iter().map(|r| r.value().clone()).collect()
    }

    /// Get the number of registered outbounds
    #[must_use]
    pub fn len(&self) -> usize {
        self.outbounds.len()
    }

    /// Check if no outbounds are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outbounds.is_empty()
    }

    /// Group tags ordered so that every group comes after the groups it
    /// depends on.
    ///
    /// # Errors
    ///
    /// Returns `DependencyCycle` naming the first cycle found.
    pub fn start_order(&self) -> Result<Vec<String>, GroupError> {
        let dependencies: HashMap<String, Vec<String>> = self
            .groups
            .iter()
            .map(|r| (r.key().clone(), r.value().as_group().dependencies().to_vec()))
            .collect();

        let mut tags: Vec<&String> = dependencies.keys().collect();
        tags.sort();

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(tags.len());
        for tag in tags {
            visit(tag, &dependencies, &mut marks, &mut path, &mut order)?;
        }
        Ok(order)
    }

    /// Resolve the members of every group, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns `DependencyCycle` before anything starts, or the first
    /// group's start error.
    pub fn start_groups(&self) -> Result<(), GroupError> {
        let order = self.start_order()?;
        for tag in &order {
            if let Some(group) = self.group(tag) {
                group.as_group().start(self)?;
            }
        }
        info!("Started {} groups", order.len());
        Ok(())
    }

    /// Stop background work of every group
    pub async fn close_groups(&self) {
        for group in self.groups() {
            group.as_group().close().await;
        }
        debug!("All groups closed");
    }

    /// Current selection of every group
    #[must_use]
    pub fn group_summary(&self) -> HashMap<String, GroupStatus> {
        self.groups
            .iter()
            .map(|r| {
                let group = r.value().as_group();
                let status = GroupStatus {
                    group_type: group.outbound_type().to_string(),
                    now: group.now(),
                    members: group.all().to_vec(),
                };
                (r.key().clone(), status)
            })
            .collect()
    }

    /// Log current status of all outbounds and groups
    pub fn log_status(&self) {
        for entry in &self.outbounds {
            let outbound = entry.value();
            debug!(
                "Outbound {}: type={} network={:?}",
                outbound.tag(),
                outbound.outbound_type(),
                outbound.network()
            );
        }
        for (tag, status) in self.group_summary() {
            info!(
                "Group {}: type={} now={} members={:?}",
                tag, status.group_type, status.now, status.members
            );
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first post-order walk over group dependencies
fn visit<'a>(
    tag: &'a str,
    dependencies: &'a HashMap<String, Vec<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<(), GroupError> {
    match marks.get(tag) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|t| *t == tag).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
            cycle.push(tag.to_string());
            return Err(GroupError::DependencyCycle { path: cycle });
        }
        None => {}
    }

    // Plain outbounds have no dependencies
    let Some(members) = dependencies.get(tag) else {
        return Ok(());
    };

    marks.insert(tag, Mark::Visiting);
    path.push(tag);
    for member in members {
        visit(member, dependencies, marks, path, order)?;
    }
    path.pop();
    marks.insert(tag, Mark::Done);
    order.push(tag.to_string());
    Ok(())
}

impl OutboundRegistry for OutboundManager {
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.get(tag)
    }
}

impl Default for OutboundManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutboundManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundManager")
            .field("count", &self.len())
            .field("groups", &self.groups.len())
            .field("tags", &self.tags())
            .finish()
    }
}

/// Builder for creating an `OutboundManager` from configuration
pub struct OutboundManagerBuilder {
    manager: OutboundManager,
    prober: Arc<dyn LatencyProber>,
}

impl OutboundManagerBuilder {
    /// Create a new builder using the connect-time prober for URL tests
    #[must_use]
    pub fn new() -> Self {
        Self {
            manager: OutboundManager::new(),
            prober: Arc::new(ConnectProber::new()),
        }
    }

    /// Use `prober` for URL test groups added after this call
    #[must_use]
    pub fn with_prober(mut self, prober: Arc<dyn LatencyProber>) -> Self {
        self.prober = prober;
        self
    }

    /// Add an outbound or group from configuration
    ///
    /// # Errors
    ///
    /// Returns the group construction error for invalid group options.
    pub fn add_from_config(&mut self, config: &OutboundConfig) -> Result<&mut Self, GroupError> {
        match &config.options {
            OutboundOptions::Direct(options) => {
                self.manager
                    .add(Box::new(DirectOutbound::new(&config.tag, options.clone())));
            }
            OutboundOptions::Block(_) => {
                self.manager.add(Box::new(BlockOutbound::new(&config.tag)));
            }
            OutboundOptions::Selector(_)
            | OutboundOptions::UrlTest(_)
            | OutboundOptions::LoadBalance(_) => {
                if let Some(group) = Group::from_config(config, &self.prober)? {
                    self.manager.add_group(group);
                }
            }
        }
        Ok(self)
    }

    /// Add multiple outbounds from configuration
    ///
    /// # Errors
    ///
    /// Stops at the first invalid group.
    pub fn add_all_from_config(
        &mut self,
        configs: &[OutboundConfig],
    ) -> Result<&mut Self, GroupError> {
        for config in configs {
            self.add_from_config(config)?;
        }
        Ok(self)
    }

    /// Build the manager
    #[must_use]
    pub fn build(self) -> OutboundManager {
        self.manager
    }
}

impl Default for OutboundManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
