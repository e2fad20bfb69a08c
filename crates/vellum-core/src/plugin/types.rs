//! Plugin type definitions.

use crate::eventbus::EventBus;
use async_trait::async_trait;
use parking_lot::RwLock;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Plugin metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Semantic version.
    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ids of plugins that must be active before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PluginMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version,
            description: None,
            dependencies: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, plugin_id: impl Into<String>) -> Self {
        self.dependencies.push(plugin_id.into());
        self
    }

    pub fn depends_on(&self, plugin_id: &str) -> bool {
        self.dependencies.iter().any(|d| d == plugin_id)
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Uninstalled,
    Installed,
    Activating,
    Activated,
    Deactivating,
    Error,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Uninstalled => "uninstalled",
            PluginState::Installed => "installed",
            PluginState::Activating => "activating",
            PluginState::Activated => "activated",
            PluginState::Deactivating => "deactivating",
            PluginState::Error => "error",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PluginState::Activated)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context shared by every plugin of a manager.
///
/// Always carries the event bus; arbitrary extension data is stored as JSON
/// under string keys.
#[derive(Debug)]
pub struct PluginContext {
    event_bus: EventBus,
    data: RwLock<HashMap<String, Value>>,
}

impl PluginContext {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            data: RwLock::new(HashMap::new()),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.write().insert(key.into(), value);
    }

    pub(crate) fn clear(&self) {
        self.data.write().clear();
    }
}

/// A plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Called when the plugin is activated.
    async fn activate(&self, ctx: &PluginContext) -> anyhow::Result<()>;

    /// Called when the plugin is deactivated. Does nothing by default.
    async fn deactivate(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shared plugin handle.
pub type DynPlugin = Arc<dyn Plugin>;
