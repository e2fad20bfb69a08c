//! Plugin system.
//!
//! Plugins declare metadata (id, name, semver version, dependency ids) and
//! are activated by the [`PluginManager`], which activates dependencies
//! first and refuses to deactivate a plugin that active plugins depend on.

pub mod manager;
pub mod types;

pub use manager::PluginManager;
pub use types::{DynPlugin, Plugin, PluginContext, PluginMetadata, PluginState};

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Plugin error types.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A plugin with the same id is already registered.
    #[error("Plugin \"{0}\" already registered")]
    AlreadyRegistered(String),

    /// Plugin not found.
    #[error("Plugin \"{0}\" not found")]
    NotFound(String),

    /// A declared dependency is not registered.
    #[error("Dependency \"{dependency}\" not found for plugin \"{plugin}\"")]
    DependencyMissing { plugin: String, dependency: String },

    /// Plugins depend on each other in a cycle.
    #[error("Circular plugin dependency: {chain}")]
    CircularDependency { chain: String },

    /// The plugin's activate handler failed.
    #[error("Failed to activate plugin \"{plugin}\": {source}")]
    ActivationFailed {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    /// The plugin's deactivate handler failed.
    #[error("Failed to deactivate plugin \"{plugin}\": {source}")]
    DeactivationFailed {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    /// An active plugin still depends on the one being deactivated.
    #[error("Cannot deactivate \"{plugin}\", plugin \"{dependent}\" depends on it")]
    HasDependents { plugin: String, dependent: String },
}
