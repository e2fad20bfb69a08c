//! Unified error handling for Vellum.
//!
//! Each subsystem reports failures through its own error enum. This module
//! provides a crate-wide error type that wraps all of them, so the editor
//! façade and the CLI can use a single `Result`.

use crate::command::CommandError;
use crate::config::ConfigError;
use crate::container::ContainerError;
use crate::eventbus::EventError;
use crate::plugin::PluginError;
use crate::state::StateError;

/// Unified error type for Vellum.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Dependency injection failures.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Listener failures raised while emitting an event.
    #[error(transparent)]
    Event(#[from] EventError),

    /// Command execution or history failures.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Plugin registration or lifecycle failures.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// State machine failures.
    #[error(transparent)]
    State(#[from] StateError),

    /// Invalid or unreadable editor options.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The rendering collaborator rejected an operation.
    #[error("Renderer error: {0}")]
    Renderer(#[source] anyhow::Error),

    /// The editor was used before `init`.
    #[error("Editor is not initialized, call init() first")]
    NotInitialized,
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;
