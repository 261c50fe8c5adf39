//! Load balance group: weighted round-robin over members
//!
//! Each member receives `weight` consecutive dispatches before the rotation
//! moves on. With weights `[2, 1, 3]` over `[A, B, C]` the rotation yields
//! `A A B C C C A A B C ...`. A weight of zero takes the member out of the
//! rotation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Members, OutboundGroup};
use crate::config::LoadBalanceOptions;
use crate::error::{GroupError, OutboundError};
use crate::outbound::{
    BoxedPacketConn, BoxedStream, DialContext, Destination, InboundContext, Network, Outbound,
    OutboundRegistry,
};

/// Expand configured weights to one per member.
///
/// An empty list means weight 1 for every member.
///
/// # Errors
///
/// Returns `WeightsMismatch` if the list length differs from the member
/// count, or `ZeroWeights` if no weight is positive.
pub fn resolve_weights(group: &str, weights: &[u32], members: usize) -> Result<Vec<u32>, GroupError> {
    if weights.is_empty() {
        return Ok(vec![1; members]);
    }
    if weights.len() != members {
        return Err(GroupError::WeightsMismatch {
            group: group.to_string(),
            weights: weights.len(),
            members,
        });
    }
    if weights.iter().all(|&w| w == 0) {
        return Err(GroupError::ZeroWeights {
            group: group.to_string(),
        });
    }
    Ok(weights.to_vec())
}

/// Rotation cursor: member index and dispatches it already received
#[derive(Debug, Clone, Copy, Default)]
struct Rotation {
    index: usize,
    credit: u32,
}

impl Rotation {
    /// Hand out the next dispatch. Terminates because at least one weight
    /// is positive.
    fn advance(&mut self, weights: &[u32]) -> usize {
        loop {
            if self.credit < weights[self.index] {
                self.credit += 1;
                return self.index;
            }
            self.credit = 0;
            self.index = (self.index + 1) % weights.len();
        }
    }
}

/// Weighted round-robin group
pub struct LoadBalance {
    tag: String,
    members: Members,
    weights: Vec<u32>,
    rotation: Mutex<Rotation>,
}

impl LoadBalance {
    /// Create a load balance group from options.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMembers`, `SelfReference`, `WeightsMismatch` or
    /// `ZeroWeights` for invalid options.
    pub fn new(tag: &str, options: &LoadBalanceOptions) -> Result<Self, GroupError> {
        let members = Members::new(tag, options.outbounds.clone())?;
        let weights = resolve_weights(tag, &options.weights, members.len())?;

        Ok(Self {
            tag: tag.to_string(),
            members,
            weights,
            rotation: Mutex::new(Rotation::default()),
        })
    }

    /// Effective weights, parallel to the member list
    #[must_use]
    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    /// Take the next member in the rotation.
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` before [`start`](OutboundGroup::start).
    pub fn next(&self) -> Result<Arc<dyn Outbound>, GroupError> {
        let members = self.members.get()?;
        let index = self.rotation.lock().advance(&self.weights);
        Ok(Arc::clone(&members[index]))
    }

    /// Take the next member able to carry `network`, skipping the others
    /// within the same lock acquisition.
    fn next_supporting(&self, network: Network) -> Result<Arc<dyn Outbound>, OutboundError> {
        let members = self.members.get()?;

        let eligible = members
            .iter()
            .zip(&self.weights)
            .any(|(member, &weight)| weight > 0 && member.supports(network));
        if !eligible {
            return Err(GroupError::unsupported_network(&self.tag, network).into());
        }

        let mut rotation = self.rotation.lock();
        loop {
            let index = rotation.advance(&self.weights);
            if members[index].supports(network) {
                return Ok(Arc::clone(&members[index]));
            }
        }
    }
}

#[async_trait]
impl Outbound for LoadBalance {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        "loadbalance"
    }

    fn network(&self) -> Vec<Network> {
        self.members.network_union()
    }

    fn dependencies(&self) -> &[String] {
        self.members.tags()
    }

    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedStream, OutboundError> {
        let member = self.next_supporting(Network::Tcp)?;
        debug!(group = %self.tag, member = member.tag(), %destination, "Dispatching stream");
        member.dial_stream(ctx, destination).await
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedPacketConn, OutboundError> {
        let member = self.next_supporting(Network::Udp)?;
        debug!(group = %self.tag, member = member.tag(), %destination, "Dispatching packets");
        member.listen_packet(ctx, destination).await
    }

    async fn new_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedStream,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        let member = self.next_supporting(Network::Tcp)?;
        member.new_connection(ctx, conn, metadata).await
    }

    async fn new_packet_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedPacketConn,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        let member = self.next_supporting(Network::Udp)?;
        member.new_packet_connection(ctx, conn, metadata).await
    }
}

#[async_trait]
impl OutboundGroup for LoadBalance {
    /// Member the next dispatch would go to; the rotation is not advanced.
    fn now(&self) -> String {
        let mut preview = *self.rotation.lock();
        let index = preview.advance(&self.weights);
        self.members.tags()[index].clone()
    }

    fn all(&self) -> &[String] {
        self.members.tags()
    }

    fn start(&self, registry: &dyn OutboundRegistry) -> Result<(), GroupError> {
        self.members.resolve(registry)?;
        info!(group = %self.tag, weights = ?self.weights, "Load balance started");
        Ok(())
    }

    async fn close(&self) {}
}

impl std::fmt::Debug for LoadBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalance")
            .field("tag", &self.tag)
            .field("members", &self.members)
            .field("weights", &self.weights)
            .finish()
    }
}
