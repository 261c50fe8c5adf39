//! Selector group: traffic goes to the member chosen by the operator

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::{Members, OutboundGroup};
use crate::config::SelectorOptions;
use crate::connection::InterruptGroup;
use crate::error::{GroupError, OutboundError};
use crate::outbound::{
    BoxedPacketConn, BoxedStream, DialContext, Destination, InboundContext, Network, Outbound,
    OutboundRegistry,
};

/// Manually switched group
pub struct Selector {
    tag: String,
    members: Members,
    /// Index into `members` of the selected member
    selected: RwLock<usize>,
    interrupt_exist_connections: bool,
    connections: InterruptGroup,
}

impl Selector {
    /// Create a selector from options.
    ///
    /// The initial selection is `default` when it names a member, else the
    /// first member.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMembers` or `SelfReference` for invalid member lists.
    pub fn new(tag: &str, options: &SelectorOptions) -> Result<Self, GroupError> {
        let members = Members::new(tag, options.outbounds.clone())?;

        let selected = match options.default.as_deref() {
            Some(default) => members.index_of(default).unwrap_or_else(|| {
                warn!(
                    group = tag,
                    default, "Default outbound is not a member, using first member"
                );
                0
            }),
            None => 0,
        };

        Ok(Self {
            tag: tag.to_string(),
            members,
            selected: RwLock::new(selected),
            interrupt_exist_connections: options.interrupt_exist_connections,
            connections: InterruptGroup::new(),
        })
    }

    /// Switch to the member tagged `tag`.
    ///
    /// Selecting the current member is a no-op. With
    /// `interrupt_exist_connections`, connections opened through the
    /// previous member are closed after the switch.
    ///
    /// # Errors
    ///
    /// Returns `MemberNotFound` if `tag` is not a member; the selection is
    /// left unchanged.
    pub fn select_member(&self, tag: &str) -> Result<(), GroupError> {
        let index = self
            .members
            .index_of(tag)
            .ok_or_else(|| GroupError::member_not_found(&self.tag, tag))?;

        let previous = {
            let mut selected = self.selected.write();
            if *selected == index {
                return Ok(());
            }
            std::mem::replace(&mut *selected, index)
        };

        let previous_tag = &self.members.tags()[previous];
        info!(group = %self.tag, from = %previous_tag, to = tag, "Selector switched");

        if self.interrupt_exist_connections {
            self.connections.interrupt(previous_tag);
        }
        Ok(())
    }

    /// Tag of the selected member
    #[must_use]
    pub fn current(&self) -> String {
        self.now()
    }

    fn selected(&self, network: Network) -> Result<Arc<dyn Outbound>, OutboundError> {
        let members = self.members.get()?;
        let member = Arc::clone(&members[*self.selected.read()]);
        if member.supports(network) {
            Ok(member)
        } else {
            Err(GroupError::unsupported_network(&self.tag, network).into())
        }
    }

    fn track_stream(&self, member: &str, stream: BoxedStream) -> BoxedStream {
        if self.interrupt_exist_connections {
            self.connections.wrap_stream(member, stream)
        } else {
            stream
        }
    }

    fn track_packets(&self, member: &str, conn: BoxedPacketConn) -> BoxedPacketConn {
        if self.interrupt_exist_connections {
            self.connections.wrap_packet_conn(member, conn)
        } else {
            conn
        }
    }
}

#[async_trait]
impl Outbound for Selector {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        "selector"
    }

    fn network(&self) -> Vec<Network> {
        match self.members.get() {
            Ok(members) => members[*self.selected.read()].network(),
            Err(_) => Network::ALL.to_vec(),
        }
    }

    fn dependencies(&self) -> &[String] {
        self.members.tags()
    }

    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedStream, OutboundError> {
        let member = self.selected(Network::Tcp)?;
        let stream = member.dial_stream(ctx, destination).await?;
        Ok(self.track_stream(member.tag(), stream))
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedPacketConn, OutboundError> {
        let member = self.selected(Network::Udp)?;
        let conn = member.listen_packet(ctx, destination).await?;
        Ok(self.track_packets(member.tag(), conn))
    }

    async fn new_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedStream,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        let member = self.selected(Network::Tcp)?;
        let conn = self.track_stream(member.tag(), conn);
        member.new_connection(ctx, conn, metadata).await
    }

    async fn new_packet_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedPacketConn,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        let member = self.selected(Network::Udp)?;
        let conn = self.track_packets(member.tag(), conn);
        member.new_packet_connection(ctx, conn, metadata).await
    }
}

#[async_trait]
impl OutboundGroup for Selector {
    fn now(&self) -> String {
        self.members.tags()[*self.selected.read()].clone()
    }

    fn all(&self) -> &[String] {
        self.members.tags()
    }

    fn start(&self, registry: &dyn OutboundRegistry) -> Result<(), GroupError> {
        self.members.resolve(registry)?;
        info!(group = %self.tag, selected = %self.now(), "Selector started");
        Ok(())
    }

    async fn close(&self) {
        if self.interrupt_exist_connections {
            self.connections.interrupt_all();
        }
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("tag", &self.tag)
            .field("members", &self.members)
            .field("selected", &self.now())
            .field(
                "interrupt_exist_connections",
                &self.interrupt_exist_connections,
            )
            .finish()
    }
}
