//! Plugin manager.
//!
//! Tracks registered plugins in registration order together with their
//! lifecycle state. Activation is depth-first: every dependency is activated
//! before its dependent, and a dependency chain that loops back on itself
//! is rejected with [`PluginError::CircularDependency`].

use super::types::{DynPlugin, PluginContext, PluginMetadata, PluginState};
use super::{PluginError, Result};
use crate::eventbus::EventBus;
use crate::events;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct PluginDescriptor {
    plugin: DynPlugin,
    state: PluginState,
    error: Option<String>,
}

#[derive(Default)]
struct Registry {
    plugins: HashMap<String, PluginDescriptor>,
    order: Vec<String>,
}

impl Registry {
    fn set_state(&mut self, id: &str, state: PluginState, error: Option<String>) {
        if let Some(descriptor) = self.plugins.get_mut(id) {
            descriptor.state = state;
            descriptor.error = error;
        }
    }
}

/// Plugin manager.
pub struct PluginManager {
    registry: RwLock<Registry>,
    context: Arc<PluginContext>,
    event_bus: EventBus,
}

impl PluginManager {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            context: Arc::new(PluginContext::new(event_bus.clone())),
            event_bus,
        }
    }

    /// Register a plugin in the `Installed` state.
    pub fn register(&self, plugin: DynPlugin) -> Result<()> {
        let id = plugin.metadata().id.clone();
        {
            let mut registry = self.registry.write();
            if registry.plugins.contains_key(&id) {
                return Err(PluginError::AlreadyRegistered(id));
            }
            registry.plugins.insert(
                id.clone(),
                PluginDescriptor {
                    plugin,
                    state: PluginState::Installed,
                    error: None,
                },
            );
            registry.order.push(id.clone());
        }

        tracing::debug!(plugin = %id, "Plugin registered");
        self.event_bus
            .emit_sync(events::PLUGIN_REGISTERED, json!({ "pluginId": id }));
        Ok(())
    }

    /// Register several plugins, stopping at the first duplicate.
    pub fn register_plugins(&self, plugins: impl IntoIterator<Item = DynPlugin>) -> Result<()> {
        for plugin in plugins {
            self.register(plugin)?;
        }
        Ok(())
    }

    /// Activate a plugin and, first, every dependency that is not active yet.
    pub async fn activate(&self, plugin_id: &str) -> Result<()> {
        self.activate_with_path(plugin_id.to_string(), Vec::new()).await
    }

    fn activate_with_path(&self, plugin_id: String, path: Vec<String>) -> BoxFuture<'_, Result<()>> {
        async move {
            let (plugin, dependencies) = {
                let registry = self.registry.read();
                let descriptor = registry
                    .plugins
                    .get(&plugin_id)
                    .ok_or_else(|| PluginError::NotFound(plugin_id.clone()))?;
                if descriptor.state == PluginState::Activated {
                    tracing::warn!("Plugin \"{}\" already activated", plugin_id);
                    return Ok(());
                }
                (
                    descriptor.plugin.clone(),
                    descriptor.plugin.metadata().dependencies.clone(),
                )
            };

            if path.contains(&plugin_id) {
                let mut chain = path;
                chain.push(plugin_id);
                return Err(PluginError::CircularDependency {
                    chain: chain.join(" -> "),
                });
            }

            for dependency in dependencies {
                let state = self.get_plugin_state(&dependency).ok_or_else(|| {
                    PluginError::DependencyMissing {
                        plugin: plugin_id.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                if state != PluginState::Activated {
                    let mut next = path.clone();
                    next.push(plugin_id.clone());
                    self.activate_with_path(dependency, next).await?;
                }
            }

            self.registry
                .write()
                .set_state(&plugin_id, PluginState::Activating, None);

            match plugin.activate(&self.context).await {
                Ok(()) => {
                    self.registry
                        .write()
                        .set_state(&plugin_id, PluginState::Activated, None);
                    tracing::info!(plugin = %plugin_id, "Plugin activated");
                    self.event_bus
                        .notify(events::PLUGIN_ACTIVATED, json!({ "pluginId": plugin_id }))
                        .await;
                    Ok(())
                }
                Err(source) => {
                    tracing::error!("Failed to activate plugin \"{}\": {}", plugin_id, source);
                    self.fail(&plugin_id, &source).await;
                    Err(PluginError::ActivationFailed {
                        plugin: plugin_id,
                        source,
                    })
                }
            }
        }
        .boxed()
    }

    /// Deactivate an active plugin.
    ///
    /// Fails with [`PluginError::HasDependents`] while any active plugin
    /// lists this one as a dependency.
    pub async fn deactivate(&self, plugin_id: &str) -> Result<()> {
        let plugin = {
            let registry = self.registry.read();
            let descriptor = registry
                .plugins
                .get(plugin_id)
                .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
            if descriptor.state != PluginState::Activated {
                tracing::warn!("Plugin \"{}\" is not activated", plugin_id);
                return Ok(());
            }

            let dependent = registry.order.iter().find(|id| {
                registry.plugins.get(*id).is_some_and(|d| {
                    d.state == PluginState::Activated && d.plugin.metadata().depends_on(plugin_id)
                })
            });
            if let Some(dependent) = dependent {
                return Err(PluginError::HasDependents {
                    plugin: plugin_id.to_string(),
                    dependent: dependent.clone(),
                });
            }
            descriptor.plugin.clone()
        };

        self.registry
            .write()
            .set_state(plugin_id, PluginState::Deactivating, None);

        match plugin.deactivate(&self.context).await {
            Ok(()) => {
                self.registry
                    .write()
                    .set_state(plugin_id, PluginState::Installed, None);
                tracing::info!(plugin = %plugin_id, "Plugin deactivated");
                self.event_bus
                    .notify(events::PLUGIN_DEACTIVATED, json!({ "pluginId": plugin_id }))
                    .await;
                Ok(())
            }
            Err(source) => {
                tracing::error!("Failed to deactivate plugin \"{}\": {}", plugin_id, source);
                self.fail(plugin_id, &source).await;
                Err(PluginError::DeactivationFailed {
                    plugin: plugin_id.to_string(),
                    source,
                })
            }
        }
    }

    async fn fail(&self, plugin_id: &str, source: &anyhow::Error) {
        self.registry
            .write()
            .set_state(plugin_id, PluginState::Error, Some(source.to_string()));
        self.event_bus
            .notify(
                events::PLUGIN_ERROR,
                json!({ "pluginId": plugin_id, "error": source.to_string() }),
            )
            .await;
    }

    /// Activate every plugin in dependency order.
    pub async fn activate_all(&self) -> Result<()> {
        for plugin_id in self.sort_by_dependencies() {
            self.activate(&plugin_id).await?;
        }
        Ok(())
    }

    /// Deactivate every active plugin in reverse dependency order.
    pub async fn deactivate_all(&self) -> Result<()> {
        for plugin_id in self.sort_by_dependencies().into_iter().rev() {
            if self.is_activated(&plugin_id) {
                self.deactivate(&plugin_id).await?;
            }
        }
        Ok(())
    }

    /// Registered plugin ids, each listed after all of its dependencies.
    ///
    /// Depth-first post-order over registration order. Unregistered
    /// dependencies are skipped, and a dependency leading back into the
    /// current path is ignored so cycles still yield a complete order.
    pub fn sort_by_dependencies(&self) -> Vec<String> {
        fn visit(
            id: &str,
            registry: &Registry,
            visiting: &mut HashSet<String>,
            visited: &mut HashSet<String>,
            sorted: &mut Vec<String>,
        ) {
            if visited.contains(id) || visiting.contains(id) {
                return;
            }
            let Some(descriptor) = registry.plugins.get(id) else {
                return;
            };

            visiting.insert(id.to_string());
            for dependency in &descriptor.plugin.metadata().dependencies {
                visit(dependency, registry, visiting, visited, sorted);
            }
            visiting.remove(id);

            visited.insert(id.to_string());
            sorted.push(id.to_string());
        }

        let registry = self.registry.read();
        let mut sorted = Vec::with_capacity(registry.order.len());
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        for id in &registry.order {
            visit(id, &registry, &mut visiting, &mut visited, &mut sorted);
        }
        sorted
    }

    pub fn get_plugin_state(&self, plugin_id: &str) -> Option<PluginState> {
        self.registry.read().plugins.get(plugin_id).map(|d| d.state)
    }

    /// Message of the last activation or deactivation failure.
    pub fn get_plugin_error(&self, plugin_id: &str) -> Option<String> {
        self.registry
            .read()
            .plugins
            .get(plugin_id)
            .and_then(|d| d.error.clone())
    }

    pub fn get_plugin_metadata(&self, plugin_id: &str) -> Option<PluginMetadata> {
        self.registry
            .read()
            .plugins
            .get(plugin_id)
            .map(|d| d.plugin.metadata().clone())
    }

    /// Metadata of every plugin, in registration order.
    pub fn get_all_plugins(&self) -> Vec<PluginMetadata> {
        let registry = self.registry.read();
        registry
            .order
            .iter()
            .filter_map(|id| registry.plugins.get(id))
            .map(|d| d.plugin.metadata().clone())
            .collect()
    }

    pub fn has_plugin(&self, plugin_id: &str) -> bool {
        self.registry.read().plugins.contains_key(plugin_id)
    }

    pub fn is_activated(&self, plugin_id: &str) -> bool {
        self.get_plugin_state(plugin_id)
            .is_some_and(|state| state.is_active())
    }

    /// Store extension data visible to every plugin through its context.
    pub fn set_context_data(&self, key: impl Into<String>, value: Value) {
        self.context.set(key, value);
    }

    pub fn context_data(&self, key: &str) -> Option<Value> {
        self.context.get(key)
    }

    pub fn context(&self) -> &Arc<PluginContext> {
        &self.context
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Activate every registered plugin.
    pub async fn initialize(&self) -> Result<()> {
        self.activate_all().await
    }

    /// Deactivate everything and clear the registry.
    ///
    /// Deactivation failures are logged; teardown always completes.
    pub async fn destroy(&self) {
        if let Err(e) = self.deactivate_all().await {
            tracing::error!("Failed to deactivate plugins during destroy: {}", e);
        }
        {
            let mut registry = self.registry.write();
            registry.plugins.clear();
            registry.order.clear();
        }
        self.context.clear();
        self.event_bus.notify(events::PLUGIN_DESTROYED, json!({})).await;
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.registry.read().order)
            .finish()
    }
}
