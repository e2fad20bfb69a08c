//! Names of the events emitted by the core.
//!
//! Payloads are JSON objects with camelCase keys.

// Command manager
pub const COMMAND_EXECUTED: &str = "command:executed";
pub const COMMAND_UNDO: &str = "command:undo";
pub const COMMAND_REDO: &str = "command:redo";
pub const COMMAND_ERROR: &str = "command:error";
pub const COMMAND_HISTORY_CLEARED: &str = "command:history-cleared";
pub const COMMAND_DESTROYED: &str = "command:destroyed";

// Plugin manager
pub const PLUGIN_REGISTERED: &str = "plugin:registered";
pub const PLUGIN_ACTIVATED: &str = "plugin:activated";
pub const PLUGIN_DEACTIVATED: &str = "plugin:deactivated";
pub const PLUGIN_ERROR: &str = "plugin:error";
pub const PLUGIN_DESTROYED: &str = "plugin:destroyed";

// State machine
pub const STATE_CHANGED: &str = "state:changed";
pub const STATE_DESTROYED: &str = "state:destroyed";

// Editor façade
pub const EDITOR_INITIALIZED: &str = "editor:initialized";
pub const EDITOR_DESTROYED: &str = "editor:destroyed";
pub const EDITOR_ERROR: &str = "editor:error";
pub const EDITOR_DATA_CHANGED: &str = "editor:data-changed";
pub const EDITOR_SELECTION_CHANGED: &str = "editor:selection-changed";
pub const EDITOR_SCALE_CHANGED: &str = "editor:scale-changed";
pub const EDITOR_OPTIONS_CHANGED: &str = "editor:options-changed";
pub const EDITOR_PLUGIN_LOADED: &str = "editor:plugin-loaded";
pub const EDITOR_PLUGIN_UNLOADED: &str = "editor:plugin-unloaded";

/// Every event name above.
pub const ALL: &[&str] = &[
    COMMAND_EXECUTED,
    COMMAND_UNDO,
    COMMAND_REDO,
    COMMAND_ERROR,
    COMMAND_HISTORY_CLEARED,
    COMMAND_DESTROYED,
    PLUGIN_REGISTERED,
    PLUGIN_ACTIVATED,
    PLUGIN_DEACTIVATED,
    PLUGIN_ERROR,
    PLUGIN_DESTROYED,
    STATE_CHANGED,
    STATE_DESTROYED,
    EDITOR_INITIALIZED,
    EDITOR_DESTROYED,
    EDITOR_ERROR,
    EDITOR_DATA_CHANGED,
    EDITOR_SELECTION_CHANGED,
    EDITOR_SCALE_CHANGED,
    EDITOR_OPTIONS_CHANGED,
    EDITOR_PLUGIN_LOADED,
    EDITOR_PLUGIN_UNLOADED,
];
