//! URL test group: traffic goes to the fastest healthy member
//!
//! A background task probes every member each `interval` and moves the
//! selection to the lowest-latency healthy member, keeping the current one
//! while it stays within `tolerance` of the best. Probing pauses after
//! `idle_timeout` without traffic and resumes on the next connection.
//!
//! Traffic never waits for a probe: it always uses the last committed
//! selection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::probe::{probe_destination, LatencyProber, DEFAULT_PROBE_URL};
use super::{Members, OutboundGroup};
use crate::config::UrlTestOptions;
use crate::connection::InterruptGroup;
use crate::error::{GroupError, OutboundError};
use crate::outbound::{
    BoxedPacketConn, BoxedStream, DialContext, Destination, InboundContext, Network, Outbound,
    OutboundRegistry,
};

/// Probe period used when none is configured
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Idle threshold used when none is configured
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Latency margin used when none is configured
pub const DEFAULT_TOLERANCE: Duration = Duration::from_millis(50);

/// Hard limit on a single probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes in flight per cycle
pub const MAX_CONCURRENT_PROBES: usize = 10;

/// Last probe outcome for one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemberHealth {
    /// Never probed
    #[default]
    Unknown,
    /// Last probe succeeded with this latency
    Healthy(Duration),
    /// Last probe failed or timed out
    Unhealthy,
}

impl MemberHealth {
    /// Latency of a healthy member
    #[must_use]
    pub const fn latency(&self) -> Option<Duration> {
        match self {
            Self::Healthy(latency) => Some(*latency),
            Self::Unknown | Self::Unhealthy => None,
        }
    }
}

/// Probe history for one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberStatus {
    /// Last probe outcome
    pub health: MemberHealth,
    /// When the last probe finished
    pub last_checked_at: Option<Instant>,
}

/// Pick the member new traffic should use.
///
/// Keeps `current` while it is healthy and no slower than the best latency
/// plus `tolerance`; otherwise moves to the fastest healthy member (lowest
/// index on ties). Returns `None` when nothing is healthy.
fn choose(current: usize, health: &[MemberHealth], tolerance: Duration) -> Option<usize> {
    let (best, best_latency) = health
        .iter()
        .enumerate()
        .filter_map(|(index, h)| h.latency().map(|latency| (index, latency)))
        .min_by_key(|&(_, latency)| latency)?;

    match health.get(current).and_then(MemberHealth::latency) {
        Some(latency) if latency <= best_latency.saturating_add(tolerance) => Some(current),
        _ => Some(best),
    }
}

struct Settings {
    url: String,
    interval: Duration,
    tolerance: Duration,
    idle_timeout: Duration,
    interrupt_exist_connections: bool,
}

struct SelectionState {
    selected: usize,
    status: Vec<MemberStatus>,
}

/// State shared between the group handle and its probe task
struct Inner {
    tag: String,
    members: Members,
    settings: Settings,
    prober: Arc<dyn LatencyProber>,
    state: RwLock<SelectionState>,
    last_used: Mutex<Instant>,
    paused: AtomicBool,
    checking: AtomicBool,
    checked: Notify,
    wake: Notify,
    connections: InterruptGroup,
}

/// Clears the in-progress flag even if the cycle is cancelled
struct CheckGuard<'a>(&'a Inner);

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.0.checking.store(false, Ordering::Release);
        self.0.checked.notify_waiters();
    }
}

impl Inner {
    fn now(&self) -> String {
        self.members.tags()[self.state.read().selected].clone()
    }

    fn is_idle(&self) -> bool {
        self.last_used.lock().elapsed() >= self.settings.idle_timeout
    }

    /// Record traffic and wake a paused probe task
    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
        if self.paused.load(Ordering::Acquire) {
            self.wake.notify_one();
        }
    }

    /// Ask the probe task for an out-of-cycle check
    fn request_check(&self) {
        self.wake.notify_one();
    }

    async fn probe_member(&self, member: &Arc<dyn Outbound>) -> MemberHealth {
        let ctx = DialContext::new().with_timeout(PROBE_TIMEOUT);
        let probe = self.prober.probe(&ctx, member.as_ref(), &self.settings.url);

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(latency)) => {
                debug!(group = %self.tag, member = member.tag(), ?latency, "Probe succeeded");
                MemberHealth::Healthy(latency)
            }
            Ok(Err(e)) => {
                debug!(group = %self.tag, member = member.tag(), error = %e, "Probe failed");
                MemberHealth::Unhealthy
            }
            Err(_) => {
                ctx.token().cancel();
                debug!(group = %self.tag, member = member.tag(), "Probe timed out");
                MemberHealth::Unhealthy
            }
        }
    }

    /// Probe every member and commit the resulting selection.
    ///
    /// A cycle requested while another runs is skipped; returns whether
    /// this call ran one.
    async fn check_outbounds(&self) -> bool {
        if self.checking.swap(true, Ordering::AcqRel) {
            debug!(group = %self.tag, "Probe cycle already running, skipping");
            return false;
        }
        let _guard = CheckGuard(self);

        let Ok(members) = self.members.get() else {
            return true;
        };

        let probes: Vec<BoxFuture<'_, (usize, MemberHealth)>> = members
            .iter()
            .enumerate()
            .map(|(index, member)| {
                async move { (index, self.probe_member(member).await) }.boxed()
            })
            .collect();
        let results: Vec<(usize, MemberHealth)> = stream::iter(probes)
            .buffer_unordered(MAX_CONCURRENT_PROBES)
            .collect()
            .await;

        let checked_at = Instant::now();
        let (previous, next) = {
            let mut state = self.state.write();
            for (index, health) in results {
                state.status[index] = MemberStatus {
                    health,
                    last_checked_at: Some(checked_at),
                };
            }
            let health: Vec<MemberHealth> = state.status.iter().map(|s| s.health).collect();
            let previous = state.selected;
            let next = choose(previous, &health, self.settings.tolerance);
            if let Some(next) = next {
                state.selected = next;
            }
            (previous, next)
        };

        let tags = self.members.tags();
        match next {
            None => warn!(
                group = %self.tag,
                selected = %tags[previous],
                "No healthy member, keeping current selection"
            ),
            Some(next) if next != previous => {
                info!(group = %self.tag, from = %tags[previous], to = %tags[next], "URL test switched");
                if self.settings.interrupt_exist_connections {
                    self.connections.interrupt(&tags[previous]);
                }
            }
            Some(_) => {}
        }
        true
    }

    /// Wait until no probe cycle is running
    async fn wait_for_cycle(&self) {
        loop {
            let notified = self.checked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.checking.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Member for `network`: the selection, else the best healthy member
    /// supporting it, else the first member supporting it.
    fn select(&self, network: Network) -> Result<Arc<dyn Outbound>, OutboundError> {
        let members = self.members.get()?;
        let state = self.state.read();

        let current = &members[state.selected];
        if current.supports(network) {
            return Ok(Arc::clone(current));
        }

        let fallback = state
            .status
            .iter()
            .enumerate()
            .filter(|(index, _)| members[*index].supports(network))
            .filter_map(|(index, status)| status.health.latency().map(|latency| (index, latency)))
            .min_by_key(|&(_, latency)| latency)
            .map(|(index, _)| index)
            .or_else(|| members.iter().position(|m| m.supports(network)));

        fallback
            .map(|index| Arc::clone(&members[index]))
            .ok_or_else(|| GroupError::unsupported_network(&self.tag, network).into())
    }

    fn track_stream(&self, member: &str, stream: BoxedStream) -> BoxedStream {
        if self.settings.interrupt_exist_connections {
            self.connections.wrap_stream(member, stream)
        } else {
            stream
        }
    }

    fn track_packets(&self, member: &str, conn: BoxedPacketConn) -> BoxedPacketConn {
        if self.settings.interrupt_exist_connections {
            self.connections.wrap_packet_conn(member, conn)
        } else {
            conn
        }
    }

    /// Log a failed traffic call and schedule a re-check.
    fn on_failure(&self, member: &str, error: &OutboundError) {
        if !matches!(error, OutboundError::Cancelled) {
            warn!(group = %self.tag, member, error = %error, "Traffic through selected member failed");
            self.request_check();
        }
    }
}

/// Probe task: tick, wake or shutdown, then a probe cycle.
async fn run(inner: Arc<Inner>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(inner.settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                if inner.is_idle() {
                    inner.paused.store(true, Ordering::Release);
                    // Traffic may have landed between the check and the flag
                    if inner.is_idle() {
                        debug!(group = %inner.tag, "No recent traffic, pausing probes");
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            () = inner.wake.notified() => {}
                        }
                        debug!(group = %inner.tag, "Traffic resumed, probing");
                    }
                    inner.paused.store(false, Ordering::Release);
                    ticker.reset();
                }
            }
            () = inner.wake.notified() => {}
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = inner.check_outbounds() => {}
        }
    }

    debug!(group = %inner.tag, "URL test task stopped");
}

/// Latency-tested group with automatic failover
pub struct UrlTest {
    inner: Arc<Inner>,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UrlTest {
    /// Create a URL test group from options, applying defaults to zero or
    /// empty settings.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMembers`, `SelfReference`, or `InvalidOption` for a
    /// probe URL without host or port.
    pub fn new(
        tag: &str,
        options: &UrlTestOptions,
        prober: Arc<dyn LatencyProber>,
    ) -> Result<Self, GroupError> {
        let members = Members::new(tag, options.outbounds.clone())?;

        let url = options
            .url
            .clone()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_PROBE_URL.to_string());
        probe_destination(&url).map_err(|reason| GroupError::InvalidOption {
            group: tag.to_string(),
            reason,
        })?;

        let settings = Settings {
            url,
            interval: or_default(options.interval, DEFAULT_INTERVAL),
            tolerance: or_default(
                Duration::from_millis(u64::from(options.tolerance)),
                DEFAULT_TOLERANCE,
            ),
            idle_timeout: or_default(options.idle_timeout, DEFAULT_IDLE_TIMEOUT),
            interrupt_exist_connections: options.interrupt_exist_connections,
        };

        let state = SelectionState {
            selected: 0,
            status: vec![MemberStatus::default(); members.len()],
        };
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            inner: Arc::new(Inner {
                tag: tag.to_string(),
                members,
                settings,
                prober,
                state: RwLock::new(state),
                last_used: Mutex::new(Instant::now()),
                paused: AtomicBool::new(false),
                checking: AtomicBool::new(false),
                checked: Notify::new(),
                wake: Notify::new(),
                connections: InterruptGroup::new(),
            }),
            shutdown,
            task: Mutex::new(None),
        })
    }

    /// Run a probe cycle now and return every member's health.
    ///
    /// If a cycle is already running, waits for it and returns its results
    /// instead of starting another.
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` before [`start`](OutboundGroup::start).
    pub async fn url_test(&self) -> Result<Vec<(String, MemberHealth)>, GroupError> {
        self.inner.members.get()?;
        if !self.inner.check_outbounds().await {
            self.inner.wait_for_cycle().await;
        }
        Ok(self
            .history()
            .into_iter()
            .map(|(tag, status)| (tag, status.health))
            .collect())
    }

    /// Probe history of every member in configuration order
    #[must_use]
    pub fn history(&self) -> Vec<(String, MemberStatus)> {
        let state = self.inner.state.read();
        self.inner
            .members
            .tags()
            .iter()
            .cloned()
            .zip(state.status.iter().copied())
            .collect()
    }

    /// Whether probing is paused for lack of traffic
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Configured probe URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.settings.url
    }

    /// Effective probe interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.settings.interval
    }

    /// Effective tolerance
    #[must_use]
    pub fn tolerance(&self) -> Duration {
        self.inner.settings.tolerance
    }

    /// Effective idle timeout
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.inner.settings.idle_timeout
    }
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

#[async_trait]
impl Outbound for UrlTest {
    fn tag(&self) -> &str {
        &self.inner.tag
    }

    fn outbound_type(&self) -> &str {
        "urltest"
    }

    fn network(&self) -> Vec<Network> {
        self.inner.members.network_union()
    }

    fn dependencies(&self) -> &[String] {
        self.inner.members.tags()
    }

    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedStream, OutboundError> {
        self.inner.touch();
        let member = self.inner.select(Network::Tcp)?;
        match member.dial_stream(ctx, destination).await {
            Ok(stream) => Ok(self.inner.track_stream(member.tag(), stream)),
            Err(e) => {
                self.inner.on_failure(member.tag(), &e);
                Err(e)
            }
        }
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxedPacketConn, OutboundError> {
        self.inner.touch();
        let member = self.inner.select(Network::Udp)?;
        match member.listen_packet(ctx, destination).await {
            Ok(conn) => Ok(self.inner.track_packets(member.tag(), conn)),
            Err(e) => {
                self.inner.on_failure(member.tag(), &e);
                Err(e)
            }
        }
    }

    async fn new_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedStream,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        self.inner.touch();
        let member = self.inner.select(Network::Tcp)?;
        let conn = self.inner.track_stream(member.tag(), conn);
        let result = member.new_connection(ctx, conn, metadata).await;
        if let Err(e) = &result {
            self.inner.on_failure(member.tag(), e);
        }
        result
    }

    async fn new_packet_connection(
        &self,
        ctx: &DialContext,
        conn: BoxedPacketConn,
        metadata: InboundContext,
    ) -> Result<(), OutboundError> {
        self.inner.touch();
        let member = self.inner.select(Network::Udp)?;
        let conn = self.inner.track_packets(member.tag(), conn);
        let result = member.new_packet_connection(ctx, conn, metadata).await;
        if let Err(e) = &result {
            self.inner.on_failure(member.tag(), e);
        }
        result
    }
}

#[async_trait]
impl OutboundGroup for UrlTest {
    fn now(&self) -> String {
        self.inner.now()
    }

    fn all(&self) -> &[String] {
        self.inner.members.tags()
    }

    fn start(&self, registry: &dyn OutboundRegistry) -> Result<(), GroupError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| GroupError::NoRuntime {
            group: self.inner.tag.clone(),
        })?;
        self.inner.members.resolve(registry)?;

        *self.inner.last_used.lock() = Instant::now();
        let task = handle.spawn(run(Arc::clone(&self.inner), self.shutdown.subscribe()));
        *self.task.lock() = Some(task);

        info!(
            group = %self.inner.tag,
            url = %self.inner.settings.url,
            interval_secs = self.inner.settings.interval.as_secs(),
            tolerance = ?self.inner.settings.tolerance,
            "URL test started"
        );
        Ok(())
    }

    async fn close(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        let _ = self.shutdown.send(());
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!(group = %self.inner.tag, error = %e, "URL test task failed");
            }
        }
        if self.inner.settings.interrupt_exist_connections {
            self.inner.connections.interrupt_all();
        }
        info!(group = %self.inner.tag, "URL test closed");
    }
}

impl Drop for UrlTest {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for UrlTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlTest")
            .field("tag", &self.inner.tag)
            .field("members", &self.inner.members)
            .field("selected", &self.inner.now())
            .field("url", &self.inner.settings.url)
            .field("interval", &self.inner.settings.interval)
            .field("tolerance", &self.inner.settings.tolerance)
            .field("idle_timeout", &self.inner.settings.idle_timeout)
            .field("paused", &self.is_paused())
            .finish()
    }
}
