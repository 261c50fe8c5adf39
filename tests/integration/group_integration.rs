//! Group integration tests
//!
//! Builds registries from JSON configuration and drives real dials through
//! nested groups against a loopback echo server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use outbound_groups::config::{load_config_str, OutboundConfig};
use outbound_groups::group::OutboundGroup;
use outbound_groups::outbound::{
    DialContext, DirectOutbound, Outbound, OutboundManager, OutboundManagerBuilder,
};
use outbound_groups::{ConfigError, GroupError, OutboundError};

use super::{spawn_echo_server, TableProber};

// ============================================================================
// Helpers
// ============================================================================

const GROUPS_CONFIG: &str = r#"{
    "log": { "level": "debug" },
    "outbounds": [
        { "tag": "a", "type": "direct" },
        { "tag": "b", "type": "direct", "connect_timeout_secs": 3 },
        { "tag": "reject", "type": "block" },
        { "tag": "proxy", "type": "selector", "outbounds": ["auto", "lb", "reject"], "default": "lb" },
        { "tag": "auto", "type": "urltest", "outbounds": ["a", "b"], "interval": "1m", "tolerance": 80 },
        { "tag": "lb", "type": "loadbalance", "outbounds": ["a", "b"], "weights": [2, 1] }
    ]
}"#;

fn build(configs: &[OutboundConfig]) -> OutboundManager {
    let prober = Arc::new(TableProber::default());
    prober.set("a", 40);
    prober.set("b", 20);

    let mut builder = OutboundManagerBuilder::new().with_prober(prober);
    builder.add_all_from_config(configs).unwrap();
    builder.build()
}

/// Write a payload through `outbound` and expect it echoed back
async fn assert_echo(outbound: &dyn Outbound, addr: SocketAddr, payload: &[u8]) {
    let mut stream = outbound
        .dial_stream(&DialContext::new(), &addr.into())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();

    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, payload);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_registry_from_config() {
    let config = load_config_str(GROUPS_CONFIG).unwrap();
    assert_eq!(config.group_count(), 3);

    let manager = build(&config.outbounds);
    assert_eq!(manager.len(), 6);
    assert_eq!(manager.groups().len(), 3);

    manager.start_groups().unwrap();

    let summary = manager.group_summary();
    assert_eq!(summary["proxy"].group_type, "selector");
    assert_eq!(summary["proxy"].now, "lb");
    assert_eq!(summary["proxy"].members, vec!["auto", "lb", "reject"]);
    assert_eq!(summary["lb"].now, "a");

    let auto = manager.group("auto").unwrap();
    let urltest = auto.as_urltest().unwrap();
    assert_eq!(urltest.interval(), std::time::Duration::from_secs(60));
    assert_eq!(urltest.tolerance(), std::time::Duration::from_millis(80));

    manager.close_groups().await;
}

#[test]
fn test_invalid_groups_rejected_at_load() {
    let mismatch = r#"{
        "outbounds": [
            { "tag": "a", "type": "direct" },
            { "tag": "lb", "type": "loadbalance", "outbounds": ["a"], "weights": [1, 2] }
        ]
    }"#;
    assert!(matches!(
        load_config_str(mismatch),
        Err(ConfigError::ValidationError(_))
    ));

    let empty = r#"{
        "outbounds": [
            { "tag": "sel", "type": "selector", "outbounds": [] }
        ]
    }"#;
    assert!(load_config_str(empty).is_err());

    let zero = r#"{
        "outbounds": [
            { "tag": "a", "type": "direct" },
            { "tag": "lb", "type": "loadbalance", "outbounds": ["a"], "weights": [0] }
        ]
    }"#;
    assert!(load_config_str(zero).is_err());
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_dependency_cycle_detected() {
    let manager = build(&[
        OutboundConfig::direct("a"),
        OutboundConfig::selector("x", vec!["a".into(), "y".into()]),
        OutboundConfig::selector("y", vec!["x".into()]),
    ]);

    let err = manager.start_groups().unwrap_err();
    match err {
        GroupError::DependencyCycle { path } => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"x".to_string()));
            assert!(path.contains(&"y".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing was resolved, so traffic reports the group as not started
    let x = manager.get("x").unwrap();
    let err = x
        .dial_stream(&DialContext::new(), &"127.0.0.1:1".parse::<SocketAddr>().unwrap().into())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, OutboundError::Group(GroupError::NotStarted { .. })));
}

#[tokio::test]
async fn test_missing_member_leaves_group_unresolved() {
    let manager = build(&[
        OutboundConfig::direct("a"),
        OutboundConfig::loadbalance("lb", vec!["a".into(), "ghost".into()], vec![]),
    ]);

    let err = manager.start_groups().unwrap_err();
    assert!(matches!(err, GroupError::OutboundNotFound { ref tag, .. } if tag == "ghost"));

    let group = manager.group("lb").unwrap();
    let lb = group.as_loadbalance().unwrap();
    assert!(matches!(lb.next(), Err(GroupError::NotStarted { .. })));

    // A second start after the registry is fixed binds everything at once
    manager.add(Box::new(DirectOutbound::simple("ghost")));
    lb.start(&manager).unwrap();
    assert_eq!(lb.next().unwrap().tag(), "a");
    assert_eq!(lb.next().unwrap().tag(), "ghost");
}

// ============================================================================
// Traffic
// ============================================================================

#[tokio::test]
async fn test_weighted_dispatch_over_real_dials() {
    let echo = spawn_echo_server().await;

    let a = Arc::new(DirectOutbound::simple("a"));
    let b = Arc::new(DirectOutbound::simple("b"));
    let manager = OutboundManager::new();
    manager.add_arc(a.clone());
    manager.add_arc(b.clone());

    let mut builder = OutboundManagerBuilder::new();
    builder
        .add_from_config(&OutboundConfig::loadbalance(
            "lb",
            vec!["a".into(), "b".into()],
            vec![2, 1],
        ))
        .unwrap();
    for group in builder.build().groups() {
        manager.add_group(group);
    }
    manager.start_groups().unwrap();

    let lb = manager.get("lb").unwrap();
    for i in 0..6u8 {
        assert_echo(lb.as_ref(), echo, &[i; 16]).await;
    }

    assert_eq!(a.connection_count(), 4);
    assert_eq!(b.connection_count(), 2);
}

#[tokio::test]
async fn test_nested_groups_follow_selection() {
    let echo = spawn_echo_server().await;
    let config = load_config_str(GROUPS_CONFIG).unwrap();
    let manager = build(&config.outbounds);
    manager.start_groups().unwrap();

    let proxy = manager.get("proxy").unwrap();
    assert_echo(proxy.as_ref(), echo, b"through lb").await;

    let group = manager.group("proxy").unwrap();
    let selector = group.as_selector().unwrap();

    selector.select_member("reject").unwrap();
    let err = proxy
        .dial_stream(&DialContext::new(), &echo.into())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, OutboundError::Unavailable { .. }));

    selector.select_member("auto").unwrap();
    assert_eq!(manager.group_summary()["proxy"].now, "auto");
    assert_echo(proxy.as_ref(), echo, b"through auto").await;

    manager.close_groups().await;
}

#[tokio::test]
async fn test_unknown_selection_keeps_current() {
    let config = load_config_str(GROUPS_CONFIG).unwrap();
    let manager = build(&config.outbounds);
    manager.start_groups().unwrap();

    let group = manager.group("proxy").unwrap();
    let selector = group.as_selector().unwrap();

    let err = selector.select_member("a").unwrap_err();
    assert!(matches!(err, GroupError::MemberNotFound { .. }));
    assert!(err.is_recoverable());
    assert_eq!(selector.now(), "lb");

    manager.close_groups().await;
}
