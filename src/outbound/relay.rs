//! Relay helpers shared by outbounds that proxy inbound connections
//!
//! Stream relays use tokio's bidirectional copy; packet relays pump
//! datagrams in both directions until the pair goes idle.

use std::io;
use std::time::Duration;

use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};
use tracing::debug;

use super::types::PacketConn;

/// Largest datagram relayed in one piece
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Default idle timeout for packet relays
pub const DEFAULT_PACKET_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bytes moved by a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes transferred from client to upstream
    pub client_to_upstream: u64,
    /// Bytes transferred from upstream to client
    pub upstream_to_client: u64,
}

/// Copy data between `client` and `upstream` until both directions close.
///
/// # Errors
///
/// Returns the first I/O error seen on either side.
pub async fn relay_stream<A, B>(client: &mut A, upstream: &mut B) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let (client_to_upstream, upstream_to_client) = copy_bidirectional(client, upstream).await?;
    Ok(RelayStats {
        client_to_upstream,
        upstream_to_client,
    })
}

/// Pump datagrams between an inbound conduit and an upstream conduit.
///
/// Client datagrams go to the destination they were addressed to; replies
/// go back to the client tagged with the address that sent them. The relay
/// ends cleanly once neither side has produced a datagram for
/// `idle_timeout`.
///
/// # Errors
///
/// Returns the first I/O error from either conduit.
pub async fn relay_packets(
    client: &dyn PacketConn,
    upstream: &dyn PacketConn,
    idle_timeout: Duration,
) -> io::Result<RelayStats> {
    let mut stats = RelayStats::default();
    let mut client_buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut upstream_buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            result = client.recv_from(&mut client_buf) => {
                let (n, target) = result?;
                upstream.send_to(&client_buf[..n], &target).await?;
                stats.client_to_upstream += n as u64;
            }
            result = upstream.recv_from(&mut upstream_buf) => {
                let (n, source) = result?;
                client.send_to(&upstream_buf[..n], &source).await?;
                stats.upstream_to_client += n as u64;
            }
            () = tokio::time::sleep(idle_timeout) => {
                debug!(
                    sent = stats.client_to_upstream,
                    received = stats.upstream_to_client,
                    "Packet relay idle, closing"
                );
                return Ok(stats);
            }
        }
    }
}
