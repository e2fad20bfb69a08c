//! Integration tests for the event bus.
//!
//! Covers priority ordering, one-shot listeners, interceptors,
//! unsubscription and listener failures.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vellum_core::eventbus::{EventBus, EventError, ListenerOptions};

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(bus: &EventBus, event: &str, log: &Arc<Mutex<Vec<String>>>, tag: &str, priority: i32) {
    let log = log.clone();
    let tag = tag.to_string();
    bus.on(
        event,
        move |_| {
            let log = log.clone();
            let tag = tag.clone();
            async move {
                log.lock().push(tag);
                Ok(())
            }
        },
        ListenerOptions::new().with_priority(priority),
    );
}

#[tokio::test]
async fn test_priority_ordering() {
    let bus = EventBus::new();
    let log = recorder();

    // Registered low priority first to show order is not insertion order.
    record(&bus, "x", &log, "h2", 5);
    record(&bus, "x", &log, "h1", 10);

    for _ in 0..3 {
        bus.emit("x", json!(1)).await.unwrap();
    }
    assert_eq!(*log.lock(), vec!["h1", "h2", "h1", "h2", "h1", "h2"]);
}

#[tokio::test]
async fn test_equal_priority_keeps_insertion_order() {
    let bus = EventBus::new();
    let log = recorder();
    record(&bus, "x", &log, "first", 0);
    record(&bus, "x", &log, "second", 0);
    record(&bus, "x", &log, "third", 0);

    bus.emit("x", json!(null)).await.unwrap();
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_once_fires_exactly_once() {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    bus.once(
        "ready",
        move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
        ListenerOptions::new(),
    );
    assert_eq!(bus.listener_count("ready"), 1);

    bus.emit("ready", json!({})).await.unwrap();
    bus.emit("ready", json!({})).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.listener_count("ready"), 0);
    assert!(!bus.has_listeners("ready"));
}

#[tokio::test]
async fn test_interceptor_skips_listener() {
    let bus = EventBus::new();
    let seen = recorder();
    let log = seen.clone();
    bus.on(
        "pen",
        move |data| {
            let log = log.clone();
            async move {
                log.lock().push(data["id"].as_str().unwrap_or_default().to_string());
                Ok(())
            }
        },
        ListenerOptions::new().with_interceptor(|data| async move { data["visible"] == json!(true) }),
    );

    bus.emit("pen", json!({"id": "a", "visible": true})).await.unwrap();
    bus.emit("pen", json!({"id": "b", "visible": false})).await.unwrap();
    assert_eq!(*seen.lock(), vec!["a"]);
}

#[tokio::test]
async fn test_skipped_once_listener_stays_registered() {
    let bus = EventBus::new();
    bus.once(
        "pen",
        |_| async { Ok(()) },
        ListenerOptions::new().with_interceptor(|data| async move { data == json!("go") }),
    );

    bus.emit("pen", json!("wait")).await.unwrap();
    assert_eq!(bus.listener_count("pen"), 1);

    bus.emit("pen", json!("go")).await.unwrap();
    assert_eq!(bus.listener_count("pen"), 0);
}

#[tokio::test]
async fn test_unsubscribe_and_off() {
    let bus = EventBus::new();
    let log = recorder();

    let sub_log = log.clone();
    let subscription = bus.on(
        "x",
        move |_| {
            let log = sub_log.clone();
            async move {
                log.lock().push("sub".to_string());
                Ok(())
            }
        },
        ListenerOptions::new(),
    );
    record(&bus, "x", &log, "other", 0);

    assert!(subscription.unsubscribe());
    bus.emit("x", json!(null)).await.unwrap();
    assert_eq!(*log.lock(), vec!["other"]);

    bus.off("x", None);
    assert_eq!(bus.listener_count("x"), 0);
}

#[tokio::test]
async fn test_listener_error_aborts_emission() {
    let bus = EventBus::new();
    let log = recorder();
    bus.on(
        "save",
        |_| async { Err(anyhow::anyhow!("disk full")) },
        ListenerOptions::new().with_priority(10),
    );
    record(&bus, "save", &log, "after", 0);

    let err = bus.emit("save", json!({})).await.unwrap_err();
    let EventError::Listener { event, .. } = &err;
    assert_eq!(event, "save");
    assert!(err.to_string().contains("save"));
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_emit_without_listeners_is_noop() {
    let bus = EventBus::new();
    bus.emit("nothing", json!(null)).await.unwrap();
    assert!(bus.event_names().is_empty());
}

#[tokio::test]
async fn test_emit_sync_spawns_on_runtime() {
    let bus = EventBus::new();
    let log = recorder();
    record(&bus, "tick", &log, "tick", 0);

    bus.emit_sync("tick", json!(null));
    for _ in 0..10 {
        if !log.lock().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(*log.lock(), vec!["tick"]);
}

#[test]
fn test_emit_sync_outside_runtime_completes_inline() {
    let bus = EventBus::new();
    let log = recorder();
    record(&bus, "tick", &log, "tick", 0);

    bus.emit_sync("tick", json!(null));
    assert_eq!(*log.lock(), vec!["tick"]);
}

#[test]
fn test_emit_sync_outside_runtime_supports_timers() {
    let bus = EventBus::new();
    let log = recorder();
    let sink = log.clone();
    bus.on(
        "autosave",
        move |_| {
            let sink = sink.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                sink.lock().push("saved".to_string());
                Ok(())
            }
        },
        ListenerOptions::new(),
    );

    bus.emit_sync("autosave", json!(null));
    assert_eq!(*log.lock(), vec!["saved"]);
}

#[tokio::test]
async fn test_clones_share_listeners() {
    let bus = EventBus::new();
    let clone = bus.clone();
    let log = recorder();
    record(&clone, "x", &log, "clone", 0);

    bus.emit("x", json!(null)).await.unwrap();
    assert_eq!(*log.lock(), vec!["clone"]);
    assert_eq!(bus.event_names(), vec!["x"]);

    bus.clear();
    assert_eq!(clone.listener_count("x"), 0);
}
