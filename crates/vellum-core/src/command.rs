//! Command manager with bounded undo/redo history.
//!
//! Commands are registered once under their id and executed by id. A
//! successful execution of an undoable command:
//! - pushes exactly one [`HistoryEntry`] onto the undo stack
//! - evicts the oldest entry when the stack exceeds its maximum size
//! - clears the redo stack
//!
//! A failed undo or redo puts the entry back where it came from, so history
//! is never lost to a failing handler.

use crate::config::history::DEFAULT_MAX_HISTORY_SIZE;
use crate::eventbus::EventBus;
use crate::events;
use crate::renderer::SharedRenderer;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Context handed to every command invocation.
///
/// Carries the rendering collaborator (when the editor has one) and a map of
/// JSON arguments. The same context is replayed on undo and redo.
#[derive(Clone, Default)]
pub struct CommandContext {
    renderer: Option<SharedRenderer>,
    args: Map<String, Value>,
}

impl CommandContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the rendering collaborator.
    pub fn with_renderer(mut self, renderer: SharedRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Add a named argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn renderer(&self) -> Option<&SharedRenderer> {
        self.renderer.as_ref()
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    pub(crate) fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("renderer", &self.renderer.is_some())
            .field("args", &self.args)
            .finish()
    }
}

/// An editor action.
///
/// A command takes part in history only when it reports both `undoable()`
/// and `has_undo()`; the latter must be overridden together with
/// [`Command::undo`]. [`Command::redo`] defaults to running `execute` again.
#[async_trait]
pub trait Command: Send + Sync {
    /// Unique command id.
    fn id(&self) -> &str;

    /// Human-readable label, e.g. for an "Undo <label>" menu entry.
    fn label(&self) -> &str;

    /// Whether successful executions are recorded for undo.
    fn undoable(&self) -> bool {
        false
    }

    /// Whether [`Command::undo`] is implemented.
    fn has_undo(&self) -> bool {
        false
    }

    /// Perform the action.
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()>;

    /// Revert the action.
    async fn undo(&self, _ctx: &CommandContext) -> anyhow::Result<()> {
        Err(CommandError::UndoUnsupported(self.id().to_string()).into())
    }

    /// Re-apply the action after an undo.
    async fn redo(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        self.execute(ctx).await
    }
}

/// Shared command handle.
pub type DynCommand = Arc<dyn Command>;

/// Which handler of a command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Execute,
    Undo,
    Redo,
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandAction::Execute => write!(f, "execute"),
            CommandAction::Undo => write!(f, "undo"),
            CommandAction::Redo => write!(f, "redo"),
        }
    }
}

/// Command manager errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Command '{0}' does not support undo")]
    UndoUnsupported(String),

    #[error("Failed to {action} command '{command}': {source}")]
    Failed {
        command: String,
        action: CommandAction,
        #[source]
        source: anyhow::Error,
    },
}

impl CommandError {
    fn from_handler(command: &str, action: CommandAction, source: anyhow::Error) -> Self {
        match source.downcast::<CommandError>() {
            Ok(err) => err,
            Err(source) => CommandError::Failed {
                command: command.to_string(),
                action,
                source,
            },
        }
    }
}

/// One recorded execution.
#[derive(Clone)]
pub struct HistoryEntry {
    command: DynCommand,
    context: CommandContext,
    timestamp: i64,
}

impl HistoryEntry {
    fn new(command: DynCommand, context: CommandContext) -> Self {
        Self {
            command,
            context,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn command(&self) -> &DynCommand {
        &self.command
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    /// Execution time in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl fmt::Debug for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("command", &self.command.id())
            .field("context", &self.context)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

struct History {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    max_size: usize,
}

impl History {
    fn push_undo(&mut self, entry: HistoryEntry) {
        self.undo.push_back(entry);
        self.trim();
    }

    fn trim(&mut self) {
        while self.undo.len() > self.max_size {
            self.undo.pop_front();
        }
    }
}

/// Command manager.
pub struct CommandManager {
    commands: RwLock<HashMap<String, DynCommand>>,
    history: Mutex<History>,
    event_bus: EventBus,
}

impl CommandManager {
    /// Create a manager with the default history bound (50).
    pub fn new(event_bus: EventBus) -> Self {
        Self::with_max_history_size(event_bus, DEFAULT_MAX_HISTORY_SIZE)
    }

    /// Create a manager with a custom history bound.
    pub fn with_max_history_size(event_bus: EventBus, max_size: usize) -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            history: Mutex::new(History {
                undo: VecDeque::new(),
                redo: Vec::new(),
                max_size,
            }),
            event_bus,
        }
    }

    /// Register a command. A duplicate id replaces the earlier command.
    pub fn register_command(&self, command: DynCommand) {
        let id = command.id().to_string();
        let mut commands = self.commands.write();
        if commands.contains_key(&id) {
            tracing::warn!("Command \"{}\" already registered, replacing it", id);
        }
        commands.insert(id, command);
    }

    /// Register several commands.
    pub fn register_commands(&self, commands: impl IntoIterator<Item = DynCommand>) {
        for command in commands {
            self.register_command(command);
        }
    }

    pub fn has_command(&self, id: &str) -> bool {
        self.commands.read().contains_key(id)
    }

    /// Registered command ids, sorted.
    pub fn command_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.commands.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Execute a registered command.
    pub async fn execute(&self, command_id: &str, context: CommandContext) -> Result<(), CommandError> {
        let command = self
            .commands
            .read()
            .get(command_id)
            .cloned()
            .ok_or_else(|| CommandError::NotFound(command_id.to_string()))?;

        if let Err(source) = command.execute(&context).await {
            tracing::error!("Failed to execute command \"{}\": {}", command_id, source);
            self.event_bus
                .notify(
                    events::COMMAND_ERROR,
                    json!({
                        "commandId": command_id,
                        "action": CommandAction::Execute.to_string(),
                        "error": source.to_string(),
                    }),
                )
                .await;
            return Err(CommandError::from_handler(command_id, CommandAction::Execute, source));
        }

        if command.undoable() && !command.has_undo() {
            tracing::warn!(
                "Command \"{}\" is undoable but has no undo handler, not recorded",
                command_id
            );
        }

        if command.undoable() && command.has_undo() {
            let args = context.args().clone();
            {
                let mut history = self.history.lock();
                history.push_undo(HistoryEntry::new(command.clone(), context));
                history.redo.clear();
            }

            tracing::debug!(command = command_id, "Command executed");
            self.event_bus
                .notify(
                    events::COMMAND_EXECUTED,
                    json!({ "commandId": command_id, "context": args }),
                )
                .await;
        }

        Ok(())
    }

    /// Undo the most recent command. Warns and does nothing when the undo
    /// stack is empty.
    pub async fn undo(&self) -> Result<(), CommandError> {
        let Some(entry) = self.history.lock().undo.pop_back() else {
            tracing::warn!("Nothing to undo");
            return Ok(());
        };

        let command_id = entry.command.id().to_string();
        match entry.command.undo(&entry.context).await {
            Ok(()) => {
                let args = entry.context.args().clone();
                self.history.lock().redo.push(entry);

                tracing::debug!(command = %command_id, "Command undone");
                self.event_bus
                    .notify(
                        events::COMMAND_UNDO,
                        json!({ "commandId": command_id, "context": args }),
                    )
                    .await;
                Ok(())
            }
            Err(source) => {
                tracing::error!("Failed to undo command \"{}\": {}", command_id, source);
                self.history.lock().undo.push_back(entry);
                self.report_failure(&command_id, CommandAction::Undo, &source).await;
                Err(CommandError::from_handler(&command_id, CommandAction::Undo, source))
            }
        }
    }

    /// Redo the most recently undone command. Warns and does nothing when
    /// the redo stack is empty.
    pub async fn redo(&self) -> Result<(), CommandError> {
        let Some(entry) = self.history.lock().redo.pop() else {
            tracing::warn!("Nothing to redo");
            return Ok(());
        };

        let command_id = entry.command.id().to_string();
        match entry.command.redo(&entry.context).await {
            Ok(()) => {
                let args = entry.context.args().clone();
                self.history.lock().push_undo(entry);

                tracing::debug!(command = %command_id, "Command redone");
                self.event_bus
                    .notify(
                        events::COMMAND_REDO,
                        json!({ "commandId": command_id, "context": args }),
                    )
                    .await;
                Ok(())
            }
            Err(source) => {
                tracing::error!("Failed to redo command \"{}\": {}", command_id, source);
                self.history.lock().redo.push(entry);
                self.report_failure(&command_id, CommandAction::Redo, &source).await;
                Err(CommandError::from_handler(&command_id, CommandAction::Redo, source))
            }
        }
    }

    async fn report_failure(&self, command_id: &str, action: CommandAction, source: &anyhow::Error) {
        self.event_bus
            .notify(
                events::COMMAND_ERROR,
                json!({
                    "commandId": command_id,
                    "action": action.to_string(),
                    "error": source.to_string(),
                }),
            )
            .await;
    }

    /// Empty both stacks.
    pub async fn clear_history(&self) {
        {
            let mut history = self.history.lock();
            history.undo.clear();
            history.redo.clear();
        }
        self.event_bus
            .notify(events::COMMAND_HISTORY_CLEARED, json!({}))
            .await;
    }

    pub fn can_undo(&self) -> bool {
        !self.history.lock().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.history.lock().redo.is_empty()
    }

    pub fn get_undo_stack_size(&self) -> usize {
        self.history.lock().undo.len()
    }

    pub fn get_redo_stack_size(&self) -> usize {
        self.history.lock().redo.len()
    }

    pub fn max_history_size(&self) -> usize {
        self.history.lock().max_size
    }

    /// Change the history bound. Excess entries are evicted oldest first.
    pub fn set_max_history_size(&self, size: usize) {
        let mut history = self.history.lock();
        history.max_size = size;
        history.trim();
    }

    /// Label of the command `undo` would revert.
    pub fn undo_label(&self) -> Option<String> {
        self.history
            .lock()
            .undo
            .back()
            .map(|entry| entry.command.label().to_string())
    }

    /// Label of the command `redo` would re-apply.
    pub fn redo_label(&self) -> Option<String> {
        self.history
            .lock()
            .redo
            .last()
            .map(|entry| entry.command.label().to_string())
    }

    /// Clear history and the command registry.
    pub async fn destroy(&self) {
        self.clear_history().await;
        self.commands.write().clear();
        self.event_bus
            .notify(events::COMMAND_DESTROYED, json!({}))
            .await;
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

impl fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let history = self.history.lock();
        f.debug_struct("CommandManager")
            .field("commands", &self.commands.read().len())
            .field("undo", &history.undo.len())
            .field("redo", &history.redo.len())
            .field("max_size", &history.max_size)
            .finish()
    }
}
