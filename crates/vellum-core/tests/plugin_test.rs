//! Integration tests for the plugin manager.

use async_trait::async_trait;
use parking_lot::Mutex;
use semver::Version;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vellum_core::eventbus::{EventBus, ListenerOptions};
use vellum_core::events;
use vellum_core::plugin::{
    DynPlugin, Plugin, PluginContext, PluginError, PluginManager, PluginMetadata, PluginState,
};

/// Records activation order in a shared log.
struct Recording {
    metadata: PluginMetadata,
    log: Arc<Mutex<Vec<String>>>,
    fail_activate: AtomicBool,
    fail_deactivate: AtomicBool,
}

impl Recording {
    fn new(id: &str, deps: &[&str], log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        let mut metadata = PluginMetadata::new(id, id.to_uppercase(), Version::new(1, 0, 0));
        for dep in deps {
            metadata = metadata.with_dependency(*dep);
        }
        Arc::new(Self {
            metadata,
            log: log.clone(),
            fail_activate: AtomicBool::new(false),
            fail_deactivate: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Plugin for Recording {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn activate(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        if self.fail_activate.load(Ordering::SeqCst) {
            anyhow::bail!("cannot start {}", self.metadata.id);
        }
        self.log.lock().push(format!("+{}", self.metadata.id));
        ctx.set(format!("{}.active", self.metadata.id), json!(true));
        Ok(())
    }

    async fn deactivate(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        if self.fail_deactivate.load(Ordering::SeqCst) {
            anyhow::bail!("cannot stop {}", self.metadata.id);
        }
        self.log.lock().push(format!("-{}", self.metadata.id));
        Ok(())
    }
}

fn log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn capture(bus: &EventBus, names: &[&str]) -> Arc<Mutex<Vec<(String, Value)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in names {
        let seen = seen.clone();
        let event = name.to_string();
        bus.on(
            *name,
            move |data| {
                let seen = seen.clone();
                let event = event.clone();
                async move {
                    seen.lock().push((event, data));
                    Ok(())
                }
            },
            ListenerOptions::new(),
        );
    }
    seen
}

#[tokio::test]
async fn test_activate_activates_dependencies_first() {
    let bus = EventBus::new();
    let activated = capture(&bus, &[events::PLUGIN_ACTIVATED]);
    let manager = PluginManager::new(bus);
    let order = log();

    manager.register(Recording::new("p1", &[], &order)).unwrap();
    manager.register(Recording::new("p2", &["p1"], &order)).unwrap();

    manager.activate("p2").await.unwrap();

    assert_eq!(manager.get_plugin_state("p1"), Some(PluginState::Activated));
    assert_eq!(manager.get_plugin_state("p2"), Some(PluginState::Activated));
    assert_eq!(*order.lock(), vec!["+p1", "+p2"]);

    let ids: Vec<Value> = activated.lock().iter().map(|(_, d)| d["pluginId"].clone()).collect();
    assert_eq!(ids, vec![json!("p1"), json!("p2")]);
}

#[tokio::test]
async fn test_deactivation_guard() {
    let manager = PluginManager::new(EventBus::new());
    let order = log();
    manager.register(Recording::new("p1", &[], &order)).unwrap();
    manager.register(Recording::new("p2", &["p1"], &order)).unwrap();
    manager.activate("p2").await.unwrap();

    let err = manager.deactivate("p1").await.unwrap_err();
    match err {
        PluginError::HasDependents { plugin, dependent } => {
            assert_eq!(plugin, "p1");
            assert_eq!(dependent, "p2");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.is_activated("p1"));
    assert!(manager.is_activated("p2"));

    manager.deactivate("p2").await.unwrap();
    manager.deactivate("p1").await.unwrap();
    assert_eq!(manager.get_plugin_state("p1"), Some(PluginState::Installed));
}

#[tokio::test]
async fn test_missing_dependency() {
    let manager = PluginManager::new(EventBus::new());
    manager.register(Recording::new("p2", &["p1"], &log())).unwrap();

    let err = manager.activate("p2").await.unwrap_err();
    assert!(matches!(
        err,
        PluginError::DependencyMissing { ref dependency, .. } if dependency == "p1"
    ));
    assert_eq!(manager.get_plugin_state("p2"), Some(PluginState::Installed));
}

#[tokio::test]
async fn test_activation_failure_sets_error_state() {
    let bus = EventBus::new();
    let errors = capture(&bus, &[events::PLUGIN_ERROR]);
    let manager = PluginManager::new(bus);
    let plugin = Recording::new("broken", &[], &log());
    plugin.fail_activate.store(true, Ordering::SeqCst);
    manager.register(plugin).unwrap();

    let err = manager.activate("broken").await.unwrap_err();
    assert!(matches!(err, PluginError::ActivationFailed { .. }));
    assert_eq!(manager.get_plugin_state("broken"), Some(PluginState::Error));
    assert_eq!(
        manager.get_plugin_error("broken").as_deref(),
        Some("cannot start broken")
    );

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1["pluginId"], "broken");
}

#[tokio::test]
async fn test_deactivation_failure_sets_error_state() {
    let bus = EventBus::new();
    let errors = capture(&bus, &[events::PLUGIN_ERROR]);
    let manager = PluginManager::new(bus);
    let plugin = Recording::new("sticky", &[], &log());
    manager.register(plugin.clone()).unwrap();
    manager.activate("sticky").await.unwrap();

    plugin.fail_deactivate.store(true, Ordering::SeqCst);
    let err = manager.deactivate("sticky").await.unwrap_err();
    assert!(matches!(err, PluginError::DeactivationFailed { .. }));
    assert_eq!(manager.get_plugin_state("sticky"), Some(PluginState::Error));
    assert_eq!(errors.lock().len(), 1);
}

#[tokio::test]
async fn test_activate_all_and_deactivate_all_order() {
    let manager = PluginManager::new(EventBus::new());
    let order = log();
    manager.register(Recording::new("ui", &["core", "shapes"], &order)).unwrap();
    manager.register(Recording::new("shapes", &["core"], &order)).unwrap();
    manager.register(Recording::new("core", &[], &order)).unwrap();

    assert_eq!(manager.sort_by_dependencies(), vec!["core", "shapes", "ui"]);

    manager.activate_all().await.unwrap();
    manager.deactivate_all().await.unwrap();
    assert_eq!(
        *order.lock(),
        vec!["+core", "+shapes", "+ui", "-ui", "-shapes", "-core"]
    );
}

#[tokio::test]
async fn test_already_active_and_inactive_are_noops() {
    let manager = PluginManager::new(EventBus::new());
    let order = log();
    manager.register(Recording::new("p", &[], &order)).unwrap();

    manager.deactivate("p").await.unwrap();
    manager.activate("p").await.unwrap();
    manager.activate("p").await.unwrap();
    assert_eq!(*order.lock(), vec!["+p"]);
}

#[tokio::test]
async fn test_unknown_plugin() {
    let manager = PluginManager::new(EventBus::new());
    assert!(matches!(
        manager.activate("ghost").await,
        Err(PluginError::NotFound(_))
    ));
    assert!(matches!(
        manager.deactivate("ghost").await,
        Err(PluginError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_context_data_and_registered_event() {
    let bus = EventBus::new();
    let registered = capture(&bus, &[events::PLUGIN_REGISTERED]);
    let manager = PluginManager::new(bus);
    manager.set_context_data("theme", json!("dark"));

    let plugins: Vec<DynPlugin> = vec![
        Recording::new("a", &[], &log()),
        Recording::new("b", &[], &log()),
    ];
    manager.register_plugins(plugins).unwrap();
    manager.activate("a").await.unwrap();

    assert_eq!(manager.context_data("theme"), Some(json!("dark")));
    assert_eq!(manager.context_data("a.active"), Some(json!(true)));
    assert!(manager.context().event_bus().has_listeners(events::PLUGIN_REGISTERED));

    let names: Vec<String> = manager.get_all_plugins().into_iter().map(|m| m.id).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(
        manager.get_plugin_metadata("b").map(|m| m.version),
        Some(Version::new(1, 0, 0))
    );

    // plugin:registered is fired without awaiting; let the spawned emissions run.
    for _ in 0..10 {
        if registered.lock().len() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(registered.lock().len(), 2);
}

#[tokio::test]
async fn test_destroy_deactivates_and_clears() {
    let bus = EventBus::new();
    let destroyed = capture(&bus, &[events::PLUGIN_DESTROYED]);
    let manager = PluginManager::new(bus);
    let order = log();
    manager.register(Recording::new("core", &[], &order)).unwrap();
    manager.register(Recording::new("ui", &["core"], &order)).unwrap();
    manager.initialize().await.unwrap();

    manager.destroy().await;
    assert_eq!(*order.lock(), vec!["+core", "+ui", "-ui", "-core"]);
    assert!(manager.get_all_plugins().is_empty());
    assert_eq!(destroyed.lock().len(), 1);
}
