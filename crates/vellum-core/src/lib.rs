//! Runtime core of the Vellum diagram editor.
//!
//! Five cooperating subsystems, composed by [`Editor`]:
//! dependency injection ([`container`]), a priority event bus ([`eventbus`]),
//! commands with undo/redo ([`command`]), plugins with dependency-ordered
//! activation ([`plugin`]) and a finite state machine ([`state`]).

pub mod command;
pub mod config;
pub mod container;
pub mod editor;
pub mod error;
pub mod eventbus;
pub mod events;
pub mod plugin;
pub mod renderer;
pub mod state;

pub use command::{Command, CommandContext, CommandError, CommandManager, DynCommand};
pub use config::{ConfigError, EditorOptions, EditorOptionsPatch};
pub use container::{Container, ContainerError, Lifecycle, ServiceId};
pub use editor::{Editor, EditorContext, EditorState};
pub use error::{Error, Result};
pub use eventbus::{EventBus, EventData, EventError, ListenerOptions, SharedEventBus, Subscription};
pub use plugin::{DynPlugin, Plugin, PluginContext, PluginError, PluginManager, PluginMetadata, PluginState};
pub use renderer::{MemoryRenderer, Pen, Point, Renderer, SharedRenderer};
pub use state::{DynState, State, StateError, StateMachine, Transition};

/// Re-exports commonly used types.
pub mod prelude {
    // Error handling
    pub use crate::error::{Error, Result};

    // Configuration
    pub use crate::config::{env_vars, EditorOptions, EditorOptionsPatch};

    // Subsystems
    pub use crate::command::{Command, CommandContext, CommandManager, DynCommand};
    pub use crate::container::{Container, Lifecycle, ServiceId};
    pub use crate::eventbus::{EventBus, EventData, ListenerOptions, Subscription};
    pub use crate::plugin::{DynPlugin, Plugin, PluginContext, PluginManager, PluginMetadata, PluginState};
    pub use crate::state::{DynState, State, StateMachine, Transition};

    // Editor
    pub use crate::editor::{modes, Editor, EditorContext};
    pub use crate::events;
    pub use crate::renderer::{Pen, Point, Renderer, SharedRenderer};

    pub use async_trait::async_trait;
}
