//! Failover integration tests
//!
//! Tests URL test failover, fail-static selection and interruption of
//! relayed connections when a group moves to another member.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use outbound_groups::config::{SelectorOptions, UrlTestOptions};
use outbound_groups::group::{MemberHealth, OutboundGroup, Selector, UrlTest};
use outbound_groups::outbound::{
    DialContext, Destination, DirectOutbound, InboundContext, Network, Outbound, PacketConn,
};
use outbound_groups::OutboundError;

use super::{spawn_echo_server, spawn_udp_echo_server, MemoryPacketConn, TableProber};

// ============================================================================
// Helpers
// ============================================================================

fn members() -> (Arc<DirectOutbound>, Arc<DirectOutbound>, HashMap<String, Arc<dyn Outbound>>) {
    let a = Arc::new(DirectOutbound::simple("a"));
    let b = Arc::new(DirectOutbound::simple("b"));
    let mut registry: HashMap<String, Arc<dyn Outbound>> = HashMap::new();
    registry.insert("a".into(), a.clone());
    registry.insert("b".into(), b.clone());
    (a, b, registry)
}

fn urltest_options(interval: Duration, interrupt: bool) -> UrlTestOptions {
    UrlTestOptions {
        outbounds: vec!["a".into(), "b".into()],
        interval,
        interrupt_exist_connections: interrupt,
        ..UrlTestOptions::default()
    }
}

/// Wait until the probe cycle triggered by start has recorded every member
async fn wait_for_first_cycle(group: &UrlTest) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while group
            .history()
            .iter()
            .any(|(_, status)| status.last_checked_at.is_none())
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first probe cycle did not finish");
}

/// Relay an in-memory inbound connection through `outbound` to `target`
fn spawn_relay(
    outbound: Arc<dyn Outbound>,
    target: std::net::SocketAddr,
) -> (DuplexStream, JoinHandle<Result<(), OutboundError>>) {
    let (client, server) = duplex(4096);
    let metadata = InboundContext::new("test-in", Network::Tcp, target.into());
    let task = tokio::spawn(async move {
        outbound
            .new_connection(&DialContext::new(), Box::new(server), metadata)
            .await
    });
    (client, task)
}

async fn ping(client: &mut DuplexStream, payload: &[u8]) {
    client.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, payload);
}

// ============================================================================
// URL test failover
// ============================================================================

#[tokio::test]
async fn test_urltest_failover_and_recovery() {
    let (_, _, registry) = members();
    let prober = Arc::new(TableProber::default());
    prober.set("a", 30);
    prober.set("b", 60);

    let options = urltest_options(Duration::from_secs(3600), false);
    let group = UrlTest::new("auto", &options, prober.clone()).unwrap();
    group.start(&registry).unwrap();
    wait_for_first_cycle(&group).await;
    assert_eq!(group.now(), "a");

    // Selected member fails
    prober.fail("a");
    let health = group.url_test().await.unwrap();
    assert_eq!(health[0], ("a".to_string(), MemberHealth::Unhealthy));
    assert_eq!(group.now(), "b");

    // Recovery within tolerance does not switch back
    prober.set("a", 30);
    group.url_test().await.unwrap();
    assert_eq!(group.now(), "b");

    // Current member degrades past the tolerance
    prober.set("b", 200);
    group.url_test().await.unwrap();
    assert_eq!(group.now(), "a");

    // Nothing healthy keeps the last selection
    prober.fail("a");
    prober.fail("b");
    let health = group.url_test().await.unwrap();
    assert!(health.iter().all(|(_, h)| *h == MemberHealth::Unhealthy));
    assert_eq!(group.now(), "a");

    group.close().await;
}

#[tokio::test]
async fn test_urltest_carries_traffic_after_failover() {
    let echo = spawn_echo_server().await;
    let (a, b, registry) = members();
    let prober = Arc::new(TableProber::default());
    prober.set("a", 10);
    prober.set("b", 90);

    let options = urltest_options(Duration::from_secs(3600), false);
    let group = Arc::new(UrlTest::new("auto", &options, prober.clone()).unwrap());
    group.start(&registry).unwrap();
    wait_for_first_cycle(&group).await;

    let mut stream = group
        .dial_stream(&DialContext::new(), &echo.into())
        .await
        .unwrap();
    stream.write_all(b"via a").await.unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(a.connection_count(), 1);

    prober.fail("a");
    group.url_test().await.unwrap();

    let _stream = group
        .dial_stream(&DialContext::new(), &echo.into())
        .await
        .unwrap();
    assert_eq!(b.connection_count(), 1);
    assert_eq!(a.connection_count(), 1);

    group.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_urltest_background_probing_switches() {
    let (_, _, registry) = members();
    let prober = Arc::new(TableProber::default());
    prober.set("a", 80);
    prober.set("b", 10);

    let options = urltest_options(Duration::from_secs(60), false);
    let group = UrlTest::new("auto", &options, prober.clone()).unwrap();
    group.start(&registry).unwrap();
    wait_for_first_cycle(&group).await;
    assert_eq!(group.now(), "b");

    prober.fail("b");
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(group.now(), "a");

    group.close().await;
}

// ============================================================================
// Interruption
// ============================================================================

#[tokio::test]
async fn test_selector_switch_interrupts_relayed_connection() {
    let echo = spawn_echo_server().await;
    let (_, b, registry) = members();

    let selector = Arc::new(
        Selector::new(
            "proxy",
            &SelectorOptions {
                outbounds: vec!["a".into(), "b".into()],
                default: None,
                interrupt_exist_connections: true,
            },
        )
        .unwrap(),
    );
    selector.start(&registry).unwrap();

    let (mut client, task) = spawn_relay(selector.clone(), echo);
    ping(&mut client, b"before switch").await;

    selector.select_member("b").unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("relay was not interrupted")
        .unwrap();
    assert!(result.is_err());

    // New connections go through the new member
    let (mut client, _task) = spawn_relay(selector.clone(), echo);
    ping(&mut client, b"after switch").await;
    assert_eq!(b.connection_count(), 1);
}

#[tokio::test]
async fn test_selector_switch_interrupts_packet_relay() {
    let echo = spawn_udp_echo_server().await;
    let (_, _, registry) = members();

    let selector = Arc::new(
        Selector::new(
            "proxy",
            &SelectorOptions {
                outbounds: vec!["a".into(), "b".into()],
                default: None,
                interrupt_exist_connections: true,
            },
        )
        .unwrap(),
    );
    selector.start(&registry).unwrap();

    let (client, server) = MemoryPacketConn::pair();
    let relay = {
        let selector = selector.clone();
        let metadata = InboundContext::new("test-in", Network::Udp, echo.into());
        tokio::spawn(async move {
            selector
                .new_packet_connection(&DialContext::new(), Box::new(server), metadata)
                .await
        })
    };

    client.send_to(b"hey", &echo.into()).await.unwrap();
    let mut buf = [0u8; 16];
    let (n, from) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .expect("no echo through the relay")
        .unwrap();
    assert_eq!(&buf[..n], b"hey");
    assert_eq!(from, Destination::from(echo));

    selector.select_member("b").unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("packet relay was not interrupted")
        .unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_selector_switch_without_interrupt_keeps_relay() {
    let echo = spawn_echo_server().await;
    let (_, _, registry) = members();

    let selector = Arc::new(
        Selector::new(
            "proxy",
            &SelectorOptions {
                outbounds: vec!["a".into(), "b".into()],
                ..SelectorOptions::default()
            },
        )
        .unwrap(),
    );
    selector.start(&registry).unwrap();

    let (mut client, task) = spawn_relay(selector.clone(), echo);
    ping(&mut client, b"one").await;

    selector.select_member("b").unwrap();
    ping(&mut client, b"two").await;
    assert!(!task.is_finished());

    drop(client);
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_urltest_automatic_switch_interrupts() {
    let echo = spawn_echo_server().await;
    let (_, _, registry) = members();
    let prober = Arc::new(TableProber::default());
    prober.set("a", 10);
    prober.set("b", 90);

    let options = urltest_options(Duration::from_secs(3600), true);
    let group = Arc::new(UrlTest::new("auto", &options, prober.clone()).unwrap());
    group.start(&registry).unwrap();
    wait_for_first_cycle(&group).await;

    let (mut client, task) = spawn_relay(group.clone(), echo);
    ping(&mut client, b"via a").await;

    prober.set("a", 500);
    group.url_test().await.unwrap();
    assert_eq!(group.now(), "b");

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("relay was not interrupted")
        .unwrap();
    assert!(result.is_err());

    group.close().await;
}
