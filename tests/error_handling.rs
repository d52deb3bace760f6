//! Error handling and edge case tests.

use property_monitor::{
    ClientRef, MonitorConfig, PropertyError, Registry, SubscriptionState, Value,
};
use crossbeam_channel::unbounded;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_registry(dir: &TempDir) -> Registry {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Registry::start(MonitorConfig::with_roots(
        dir.path().join("user"),
        dir.path().join("system"),
    ))
    .unwrap()
}

fn user_prop(dir: &TempDir, ns: &str, name: &str) -> PathBuf {
    let path = dir.path().join("user/namespaces").join(ns);
    fs::create_dir_all(&path).unwrap();
    path.join(name)
}

// --- Rejected keys ---

#[test]
fn test_subscribe_unknown_key() {
    let dir = TempDir::new().unwrap();
    let registry = test_registry(&dir);

    for key in ["", "NoNamespace", "Bad./abs"] {
        let mut client = registry.client(key);
        client.subscribe();
        client.wait_for_subscription(true);
        assert_eq!(client.get_value(Value::from("def")), Value::from("def"));
    }

    let snapshot = registry.snapshot().wait(TIMEOUT).unwrap();
    assert!(snapshot.handlers.is_empty());
}

#[test]
fn test_write_without_location_fails() {
    let dir = TempDir::new().unwrap();
    let registry = test_registry(&dir);

    // Unknown key
    let unknown = registry.write("NoNamespace", Value::Int(1)).wait(TIMEOUT).unwrap();
    assert!(!unknown);

    // Known key, but no file to write to
    let missing = registry.write("Battery.Level", Value::Int(1)).wait(TIMEOUT).unwrap();
    assert!(!missing);
}

// --- Idempotence ---

#[test]
fn test_unsubscribe_without_subscribe() {
    let dir = TempDir::new().unwrap();
    let registry = test_registry(&dir);

    let (tx, _rx) = unbounded();
    let client = ClientRef::new(tx);
    registry
        .unsubscribe("Battery.Level", client.id())
        .wait(TIMEOUT)
        .unwrap();

    let mut handle = registry.client("Battery.Level");
    handle.unsubscribe();
    assert_eq!(handle.state(), SubscriptionState::Initial);
}

#[test]
fn test_double_unsubscribe_race() {
    let dir = TempDir::new().unwrap();
    let registry = test_registry(&dir);
    let (tx, _rx) = unbounded();
    let client = ClientRef::new(tx);

    registry.subscribe("Battery.Level", &client).wait(TIMEOUT).unwrap();
    let a = registry.unsubscribe("Battery.Level", client.id());
    let b = registry.unsubscribe("Battery.Level", client.id());
    a.wait(TIMEOUT).unwrap();
    b.wait(TIMEOUT).unwrap();

    let snapshot = registry.snapshot().wait(TIMEOUT).unwrap();
    assert!(!snapshot.contains("Battery.Level"));
}

// --- Degraded reads ---

#[test]
fn test_emptied_file_yields_default_of_same_kind() {
    let dir = TempDir::new().unwrap();
    let path = user_prop(&dir, "Battery", "Level");
    fs::write(&path, "88").unwrap();
    let registry = test_registry(&dir);

    let mut level = registry.client("Battery.Level");
    level.subscribe();
    level.wait_for_subscription(true);
    assert_eq!(level.get_value(Value::Unset), Value::Int(88));

    fs::write(&path, "").unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while level.get_value(Value::Unset) != Value::Int(0) && Instant::now() < deadline {
        level.wait_for_change(Duration::from_millis(50));
    }
    assert_eq!(level.get_value(Value::Unset), Value::Int(0));
}

#[test]
fn test_refresh_unknown_key_keeps_registry_alive() {
    let dir = TempDir::new().unwrap();
    let registry = test_registry(&dir);

    registry.refresh("Nothing.Here");
    registry.refresh("");
    let snapshot = registry.snapshot().wait(TIMEOUT).unwrap();
    assert!(snapshot.handlers.is_empty());
}

// --- Broken protocol ---

#[test]
fn test_requests_after_shutdown_report_broken_reply() {
    let dir = TempDir::new().unwrap();
    let registry = test_registry(&dir);
    let handle = registry.handle();
    registry.shutdown();

    let result = handle.write("Battery.Level", Value::Int(1)).wait(TIMEOUT);
    assert!(matches!(result, Err(PropertyError::ReplyBroken)));

    let result = handle.snapshot().wait(TIMEOUT);
    assert!(matches!(result, Err(PropertyError::ReplyBroken)));
}

#[test]
fn test_client_degrades_when_registry_stops() {
    let dir = TempDir::new().unwrap();
    fs::write(user_prop(&dir, "Battery", "Level"), "30").unwrap();
    let registry = test_registry(&dir);

    let mut level = registry.client("Battery.Level");
    level.subscribe();
    level.wait_for_subscription(true);
    assert_eq!(level.get_value(Value::Unset), Value::Int(30));

    registry.shutdown();

    // Cached value stays, new requests fail fast instead of blocking
    let started = Instant::now();
    level.unsubscribe();
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(level.state(), SubscriptionState::Initial);
    assert_eq!(level.get_value(Value::Unset), Value::Int(30));

    level.subscribe();
    level.wait_for_subscription(true);
    assert_eq!(level.state(), SubscriptionState::Subscribed);
    assert!(matches!(
        level.write(Value::Int(1)).wait(TIMEOUT),
        Err(PropertyError::ReplyBroken)
    ));
}

#[test]
fn test_subscribe_timeout_is_bounded() {
    let dir = TempDir::new().unwrap();
    let mut config =
        MonitorConfig::with_roots(dir.path().join("user"), dir.path().join("system"));
    config.client.subscribe_ms = 0;
    let registry = Registry::start(config).unwrap();

    let mut client = registry.client("Battery.Level");
    client.subscribe();
    let started = Instant::now();
    client.wait_for_subscription(true);
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(client.state(), SubscriptionState::Subscribed);
}
