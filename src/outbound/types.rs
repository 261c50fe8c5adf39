//! Shared outbound value types
//!
//! Network kinds, destinations, per-call dial context and the boxed
//! stream/packet conduits handed between outbounds and groups.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Transport network carried by an outbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Stream-oriented traffic
    Tcp,
    /// Packet-oriented traffic
    Udp,
}

impl Network {
    /// Both networks, in canonical order
    pub const ALL: [Self; 2] = [Self::Tcp, Self::Udp];

    /// Get the network as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of an outbound connection: an address or a host name with port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Resolved socket address
    Socket(SocketAddr),
    /// Domain name resolved by the outbound
    Domain(String, u16),
}

impl Destination {
    /// Create a domain destination
    pub fn domain(host: impl Into<String>, port: u16) -> Self {
        Self::Domain(host.into(), port)
    }

    /// Destination port
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Self::Socket(addr) => addr.port(),
            Self::Domain(_, port) => *port,
        }
    }

    /// Resolve to a socket address, using the system resolver for domains.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the name does not resolve.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Socket(addr) => Ok(*addr),
            Self::Domain(host, port) => tokio::net::lookup_host((host.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
                }),
        }
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        Self::Socket(addr)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(addr) => write!(f, "{addr}"),
            Self::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Metadata describing an inbound connection handed to an outbound.
#[derive(Debug, Clone)]
pub struct InboundContext {
    /// Tag of the inbound that accepted the connection
    pub inbound: String,
    /// Network of the connection
    pub network: Network,
    /// Client address, if known
    pub source: Option<SocketAddr>,
    /// Requested destination
    pub destination: Destination,
}

impl InboundContext {
    /// Create metadata for a new inbound connection
    pub fn new(inbound: impl Into<String>, network: Network, destination: Destination) -> Self {
        Self {
            inbound: inbound.into(),
            network,
            source: None,
            destination,
        }
    }
}

/// Per-call context: caller cancellation plus an optional deadline.
///
/// Groups forward the context unchanged to the member they pick.
#[derive(Debug, Clone, Default)]
pub struct DialContext {
    token: CancellationToken,
    timeout: Option<Duration>,
}

impl DialContext {
    /// Create a context without a deadline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context bound to an existing cancellation token
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            timeout: None,
        }
    }

    /// Set the deadline applied to connection establishment
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancellation token of the caller
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Connection deadline, if any
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the caller has cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the caller cancels
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Bidirectional byte stream produced or consumed by an outbound.
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProxyStream for T {}

/// Owned, type-erased stream
pub type BoxedStream = Box<dyn ProxyStream>;

/// Packet-oriented conduit.
///
/// For an outbound conduit `recv_from` yields the sender of a reply; for an
/// inbound conduit it yields the destination the client addressed.
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Send one datagram to `target`
    async fn send_to(&self, buf: &[u8], target: &Destination) -> io::Result<usize>;

    /// Receive one datagram
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Destination)>;

    /// Local address of the conduit
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Owned, type-erased packet conduit
pub type BoxedPacketConn = Box<dyn PacketConn>;
