//! Force-closing connections opened through a member
//!
//! Every stream or packet conduit a group hands out (or relays) through a
//! member is bound to that member's current cancellation generation. When
//! the group switches away from the member it interrupts the generation:
//! pending and future I/O on those connections fails with
//! `ConnectionAborted`, while connections opened afterwards get a fresh
//! generation.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::outbound::{BoxedPacketConn, BoxedStream, Destination, PacketConn};

fn interrupted_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "connection interrupted by outbound switch",
    )
}

/// Per-group registry of member connection generations
#[derive(Debug, Default)]
pub struct InterruptGroup {
    generations: Mutex<HashMap<String, CancellationToken>>,
}

impl InterruptGroup {
    /// Create an empty interrupt group
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token tied to the current generation of `member`
    ///
    /// A dial still in flight when `member` is interrupted is wrapped after
    /// it completes and so joins the next generation; only connections
    /// already handed out are closed.
    pub fn token(&self, member: &str) -> CancellationToken {
        let mut generations = self.generations.lock();
        generations
            .entry(member.to_string())
            .or_default()
            .child_token()
    }

    /// Close every connection opened through `member` so far.
    ///
    /// Returns `true` if the member had a live generation.
    pub fn interrupt(&self, member: &str) -> bool {
        let token = self.generations.lock().remove(member);
        match token {
            Some(token) => {
                token.cancel();
                debug!(member, "Interrupted existing connections");
                true
            }
            None => false,
        }
    }

    /// Close connections of every member
    pub fn interrupt_all(&self) {
        let drained: Vec<_> = self.generations.lock().drain().collect();
        for (_, token) in drained {
            token.cancel();
        }
    }

    /// Bind a stream to `member`'s current generation
    pub fn wrap_stream(&self, member: &str, stream: BoxedStream) -> BoxedStream {
        Box::new(InterruptibleStream::new(stream, self.token(member)))
    }

    /// Bind a packet conduit to `member`'s current generation
    pub fn wrap_packet_conn(&self, member: &str, conn: BoxedPacketConn) -> BoxedPacketConn {
        Box::new(InterruptiblePacketConn {
            inner: conn,
            token: self.token(member),
        })
    }
}

/// Stream that fails all I/O once its token is cancelled
pub struct InterruptibleStream<S> {
    inner: S,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    interrupted: bool,
}

impl<S> InterruptibleStream<S> {
    /// Wrap `inner`, failing once `token` is cancelled
    pub fn new(inner: S, token: CancellationToken) -> Self {
        Self {
            inner,
            cancelled: Box::pin(token.cancelled_owned()),
            interrupted: false,
        }
    }

    fn poll_interrupt(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if !self.interrupted && self.cancelled.as_mut().poll(cx).is_ready() {
            self.interrupted = true;
        }
        if self.interrupted {
            Err(interrupted_error())
        } else {
            Ok(())
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for InterruptibleStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_interrupt(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for InterruptibleStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_interrupt(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_interrupt(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Shutdown always reaches the inner stream so it can be torn down
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Packet conduit that fails all I/O once its token is cancelled
struct InterruptiblePacketConn {
    inner: BoxedPacketConn,
    token: CancellationToken,
}

#[async_trait]
impl PacketConn for InterruptiblePacketConn {
    async fn send_to(&self, buf: &[u8], target: &Destination) -> io::Result<usize> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(interrupted_error()),
            result = self.inner.send_to(buf, target) => result,
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Destination)> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(interrupted_error()),
            result = self.inner.recv_from(buf) => result,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
