//! Latency probing for URL test groups
//!
//! The probe exchange itself is pluggable through [`LatencyProber`]. The
//! bundled [`ConnectProber`] measures how long the member takes to open a
//! stream to the probe URL's host.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Uri;
use tokio::time::Instant;

use crate::error::OutboundError;
use crate::outbound::{DialContext, Destination, Outbound};

/// Default probe target
pub const DEFAULT_PROBE_URL: &str = "https://www.gstatic.com/generate_204";

/// Measures the latency of one outbound towards a URL
#[async_trait]
pub trait LatencyProber: Send + Sync {
    /// Probe `url` through `outbound`.
    ///
    /// # Errors
    ///
    /// Any error marks the member unhealthy for this cycle.
    async fn probe(
        &self,
        ctx: &DialContext,
        outbound: &dyn Outbound,
        url: &str,
    ) -> Result<Duration, OutboundError>;
}

/// Extract the host and port a probe URL points at.
///
/// The port defaults to 443 for `https` and 80 for `http`.
///
/// # Errors
///
/// Returns a description of the problem if the URL has no host or no
/// derivable port.
pub fn probe_destination(url: &str) -> Result<Destination, String> {
    let uri: Uri = url
        .parse()
        .map_err(|e| format!("invalid probe url '{url}': {e}"))?;

    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| format!("probe url '{url}' has no host"))?;

    let port = match (uri.port_u16(), uri.scheme_str()) {
        (Some(port), _) => port,
        (None, Some("https")) => 443,
        (None, Some("http")) => 80,
        (None, _) => return Err(format!("probe url '{url}' has no port")),
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok(match host.parse::<IpAddr>() {
        Ok(ip) => Destination::Socket((ip, port).into()),
        Err(_) => Destination::domain(host, port),
    })
}

/// Prober measuring stream establishment time through the member
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectProber;

impl ConnectProber {
    /// Create a connect-time prober
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LatencyProber for ConnectProber {
    async fn probe(
        &self,
        ctx: &DialContext,
        outbound: &dyn Outbound,
        url: &str,
    ) -> Result<Duration, OutboundError> {
        let destination = probe_destination(url)
            .map_err(|reason| OutboundError::connection_failed(url, reason))?;

        let started = Instant::now();
        let stream = outbound.dial_stream(ctx, &destination).await?;
        let latency = started.elapsed();
        drop(stream);

        Ok(latency)
    }
}
