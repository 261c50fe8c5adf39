//! Direct outbound implementation
//!
//! This module provides the `DirectOutbound` type which connects directly
//! to the destination, optionally from a specific local address.
//!
//! Supports both TCP and UDP protocols.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::debug;

use super::relay::{relay_packets, relay_stream, DEFAULT_PACKET_IDLE_TIMEOUT};
use super::traits::Outbound;
use super::types::{
    BoxedPacketConn, BoxedStream, DialContext, Destination, InboundContext, Network, PacketConn,
};
use crate::config::DirectOptions;
use crate::error::OutboundError;

/// Direct outbound - connects directly to the destination
///
/// Supports:
/// - `bind_address`: Bind to a specific local address
/// - `connect_timeout_secs`: Deadline used when the caller sets none
pub struct DirectOutbound {
    /// Tag for this outbound
    tag: String,
    /// Options
    options: DirectOptions,
    /// Successful stream dials
    connections: AtomicU64,
}

impl DirectOutbound {
    /// Create a new direct outbound from options
    pub fn new(tag: impl Into<String>, options: DirectOptions) -> Self {
        Self {
            tag: tag.into(),
            options,
            connections: AtomicU64::new(0),
        }
    }

    /// Create a simple direct outbound with just a tag
    pub fn simple(tag: impl Into<String>) -> Self {
        Self::new(tag, DirectOptions::default())
    }

    /// Number of successful stream dials
    #[must_use]
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        if let Some(bind) = self.options.bind_address {
            socket.bind(bind)?;
        }

        let stream = socket.connect(addr).await?;

        // Enable TCP keepalive to detect dead peers on long-lived connections
        // - time: 60s idle before first probe
        // - interval: 15s between probes
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(15));
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            debug!(tag = %self.tag, error = %e, "Failed to enable TCP keepalive");
        }

        Ok(stream)
    }

    async fn bind_udp(&self, destination: &Destination) -> io::Result<UdpSocket> {
        let local = match self.options.bind_address {
            Some(addr) => addr,
            None => match destination {
                Destination::Socket(addr) if addr.is_ipv6() => "[::]:0".parse().map_err(invalid)?,
                _ => "0.0.0.0:0".parse().map_err(invalid)?,
            },
        };
        UdpSocket::bind(local).await
    }
}

fn invalid(e: std::net::AddrParseError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e)
}

#[async_trait]
impl Outbound for DirectOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        "direct"
    }

    fn network(&self) -> Vec<Network> {
        Network::ALL.to_vec()
    }

    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedStream, OutboundError> {
        let deadline = ctx.timeout().unwrap_or_else(|| self.options.connect_timeout());

        let attempt = async {
            let addr = destination
                .resolve()
                .await
                .map_err(|e| OutboundError::connection_failed(destination, e.to_string()))?;
            self.connect(addr)
                .await
                .map_err(|e| OutboundError::connection_failed(destination, e.to_string()))
        };

        let stream = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(OutboundError::Cancelled),
            result = tokio::time::timeout(deadline, attempt) => {
                result.map_err(|_| OutboundError::timeout(destination, deadline))??
            }
        };

        self.connections.fetch_add(1, Ordering::Relaxed);
        debug!(tag = %self.tag, %destination, "Direct stream established");
        Ok(Box::new(stream))
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedPacketConn, OutboundError> {
        if ctx.is_cancelled() {
            return Err(OutboundError::Cancelled);
        }

        let socket = self
            .bind_udp(destination)
            .await
            .map_err(|e| OutboundError::connection_failed(destination, e.to_string()))?;

        debug!(tag = %self.tag, %destination, "Direct packet conduit opened");
        Ok(Box::new(DirectPacketConn { socket }))
    }

    async fn new_connection(
        &self,
        ctx: &DialContext,
        mut conn: BoxedStream,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        let mut upstream = self.dial_stream(ctx, &metadata.destination).await?;
        let stats = relay_stream(&mut conn, &mut upstream).await?;
        debug!(
            tag = %self.tag,
            inbound = %metadata.inbound,
            destination = %metadata.destination,
            rx = stats.client_to_upstream,
            tx = stats.upstream_to_client,
            "Direct relay finished"
        );
        Ok(())
    }

    async fn new_packet_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedPacketConn,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        let upstream = self.listen_packet(ctx, &metadata.destination).await?;
        let stats = relay_packets(conn.as_ref(), upstream.as_ref(), DEFAULT_PACKET_IDLE_TIMEOUT).await?;
        debug!(
            tag = %self.tag,
            inbound = %metadata.inbound,
            sent = stats.client_to_upstream,
            received = stats.upstream_to_client,
            "Direct packet relay finished"
        );
        Ok(())
    }
}

impl std::fmt::Debug for DirectOutbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectOutbound")
            .field("tag", &self.tag)
            .field("bind_address", &self.options.bind_address)
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// Unconnected UDP socket used as a direct packet conduit
struct DirectPacketConn {
    socket: UdpSocket,
}

#[async_trait]
impl PacketConn for DirectPacketConn {
    async fn send_to(&self, buf: &[u8], target: &Destination) -> io::Result<usize> {
        let addr = target.resolve().await?;
        self.socket.send_to(buf, addr).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Destination)> {
        let (n, addr) = self.socket.recv_from(buf).await?;
        Ok((n, Destination::Socket(addr)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
