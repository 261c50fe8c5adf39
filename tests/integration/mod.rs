//! Integration tests for outbound-groups
//!
//! This module contains integration tests that drive groups through the
//! public API with real `DirectOutbound` members and local echo servers.
//!
//! # Test Organization
//!
//! - `group_integration`: Configuration-driven registries, nested groups,
//!   resolution and cycle errors, load balancing across real dials
//! - `failover_integration`: URL test failover, fail-static behavior and
//!   connection interruption on member switch
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests failover
//! ```
//!
//! # Test Requirements
//!
//! - Tests only bind loopback sockets and don't require network access

pub mod failover_integration;
pub mod group_integration;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use outbound_groups::group::LatencyProber;
use outbound_groups::outbound::{DialContext, Destination, Outbound, PacketConn};
use outbound_groups::OutboundError;

/// Spawn a TCP echo server on loopback and return its address
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Spawn a UDP echo server on loopback and return its address
pub async fn spawn_udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            if socket.send_to(&buf[..n], peer).await.is_err() {
                break;
            }
        }
    });

    addr
}

type Datagram = (Vec<u8>, Destination);

/// In-memory packet conduit standing in for an inbound's UDP session
pub struct MemoryPacketConn {
    tx: UnboundedSender<Datagram>,
    rx: tokio::sync::Mutex<UnboundedReceiver<Datagram>>,
}

impl MemoryPacketConn {
    /// Connected pair: the client half for the test, the server half for
    /// the outbound
    pub fn pair() -> (Self, Self) {
        let (client_tx, client_rx) = unbounded_channel();
        let (server_tx, server_rx) = unbounded_channel();
        (
            Self {
                tx: server_tx,
                rx: tokio::sync::Mutex::new(client_rx),
            },
            Self {
                tx: client_tx,
                rx: tokio::sync::Mutex::new(server_rx),
            },
        )
    }
}

#[async_trait]
impl PacketConn for MemoryPacketConn {
    async fn send_to(&self, buf: &[u8], target: &Destination) -> io::Result<usize> {
        self.tx
            .send((buf.to_vec(), target.clone()))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Destination)> {
        let (data, from) = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok((n, from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(([127, 0, 0, 1], 0).into())
    }
}

/// Prober reporting latencies from a mutable table; absent tags fail
#[derive(Default)]
pub struct TableProber {
    latencies: Mutex<HashMap<String, Duration>>,
}

impl TableProber {
    pub fn set(&self, tag: &str, millis: u64) {
        self.latencies
            .lock()
            .insert(tag.to_string(), Duration::from_millis(millis));
    }

    pub fn fail(&self, tag: &str) {
        self.latencies.lock().remove(tag);
    }
}

#[async_trait]
impl LatencyProber for TableProber {
    async fn probe(
        &self,
        _ctx: &DialContext,
        outbound: &dyn Outbound,
        _url: &str,
    ) -> Result<Duration, OutboundError> {
        let latency = self.latencies.lock().get(outbound.tag()).copied();
        latency.ok_or_else(|| OutboundError::unavailable(outbound.tag(), "unreachable"))
    }
}
