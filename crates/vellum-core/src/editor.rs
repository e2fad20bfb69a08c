//! Editor composition root.
//!
//! Wires the event bus, command manager, plugin manager and the editor
//! state machine through the [`Container`] and exposes a façade over them
//! and the rendering collaborator.

use crate::command::{CommandContext, CommandManager, DynCommand};
use crate::config::{env_vars, EditorOptions, EditorOptionsPatch};
use crate::container::{Container, ServiceId};
use crate::error::{Error, Result};
use crate::eventbus::EventBus;
use crate::events;
use crate::plugin::{DynPlugin, PluginManager};
use crate::renderer::{Pen, Point, SharedRenderer};
use crate::state::{DynState, State, StateMachine, Transition};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Interaction modes of the editor state machine.
pub mod modes {
    pub const IDLE: &str = "idle";
    pub const DRAWING: &str = "drawing";
    pub const DRAGGING: &str = "dragging";
    pub const SELECTING: &str = "selecting";
}

/// Runtime interaction state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    /// Name of the current mode.
    pub name: String,
    pub selected_pens: Vec<Pen>,
    pub mouse_position: Point,
    pub scale: f64,
    pub center: Point,
    pub is_drawing: bool,
    pub is_dragging: bool,
    pub readonly: bool,
}

impl Default for EditorState {
    fn default() -> Self {
        Self {
            name: modes::IDLE.to_string(),
            selected_pens: Vec::new(),
            mouse_position: Point::default(),
            scale: 1.0,
            center: Point::default(),
            is_drawing: false,
            is_dragging: false,
            readonly: false,
        }
    }
}

/// Context shared by the editor, its states and its commands.
#[derive(Default)]
pub struct EditorContext {
    options: RwLock<EditorOptions>,
    state: RwLock<EditorState>,
    renderer: RwLock<Option<SharedRenderer>>,
    initialized: AtomicBool,
}

impl EditorContext {
    pub fn options(&self) -> EditorOptions {
        self.options.read().clone()
    }

    /// Snapshot of the interaction state.
    pub fn state(&self) -> EditorState {
        self.state.read().clone()
    }

    /// Mutate the interaction state in place.
    pub fn update_state(&self, f: impl FnOnce(&mut EditorState)) {
        f(&mut self.state.write());
    }

    pub fn renderer(&self) -> Option<SharedRenderer> {
        self.renderer.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        *self.options.write() = EditorOptions::default();
        *self.state.write() = EditorState::default();
        *self.renderer.write() = None;
        self.initialized.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for EditorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorContext")
            .field("options", &*self.options.read())
            .field("state", &*self.state.read())
            .field("renderer", &self.renderer.read().is_some())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

struct IdleState;

#[async_trait]
impl State<EditorContext> for IdleState {
    fn name(&self) -> &str {
        modes::IDLE
    }

    async fn on_enter(&self, ctx: &EditorContext) -> anyhow::Result<()> {
        tracing::debug!("Entering idle mode");
        ctx.update_state(|s| {
            s.name = modes::IDLE.to_string();
            s.is_drawing = false;
            s.is_dragging = false;
        });
        Ok(())
    }
}

struct DrawingState;

#[async_trait]
impl State<EditorContext> for DrawingState {
    fn name(&self) -> &str {
        modes::DRAWING
    }

    async fn on_enter(&self, ctx: &EditorContext) -> anyhow::Result<()> {
        tracing::debug!("Entering drawing mode");
        ctx.update_state(|s| {
            s.name = modes::DRAWING.to_string();
            s.is_drawing = true;
        });
        Ok(())
    }

    async fn on_exit(&self, ctx: &EditorContext) -> anyhow::Result<()> {
        ctx.update_state(|s| s.is_drawing = false);
        Ok(())
    }
}

struct DraggingState;

#[async_trait]
impl State<EditorContext> for DraggingState {
    fn name(&self) -> &str {
        modes::DRAGGING
    }

    async fn on_enter(&self, ctx: &EditorContext) -> anyhow::Result<()> {
        tracing::debug!("Entering dragging mode");
        ctx.update_state(|s| {
            s.name = modes::DRAGGING.to_string();
            s.is_dragging = true;
        });
        Ok(())
    }

    async fn on_exit(&self, ctx: &EditorContext) -> anyhow::Result<()> {
        ctx.update_state(|s| s.is_dragging = false);
        Ok(())
    }
}

struct SelectingState;

#[async_trait]
impl State<EditorContext> for SelectingState {
    fn name(&self) -> &str {
        modes::SELECTING
    }

    async fn on_enter(&self, ctx: &EditorContext) -> anyhow::Result<()> {
        tracing::debug!("Entering selecting mode");
        ctx.update_state(|s| s.name = modes::SELECTING.to_string());
        Ok(())
    }
}

/// The editor.
pub struct Editor {
    container: Container,
    event_bus: Arc<EventBus>,
    command_manager: Arc<CommandManager>,
    plugin_manager: Arc<PluginManager>,
    state_machine: Arc<StateMachine<EditorContext>>,
    context: Arc<EditorContext>,
}

impl Editor {
    /// Build the core services and the editor state topology.
    pub fn new() -> Result<Self> {
        let context = Arc::new(EditorContext::default());
        let container = Container::new();
        Self::register_services(&container, context.clone());

        let event_bus = container.resolve_type::<EventBus>()?;
        let command_manager = container.resolve_type::<CommandManager>()?;
        let plugin_manager = container.resolve_type::<PluginManager>()?;
        let state_machine = container.resolve_type::<StateMachine<EditorContext>>()?;

        Self::setup_state_machine(&state_machine)?;

        Ok(Self {
            container,
            event_bus,
            command_manager,
            plugin_manager,
            state_machine,
            context,
        })
    }

    fn register_services(container: &Container, context: Arc<EditorContext>) {
        let bus = ServiceId::of::<EventBus>();

        container
            .register_singleton(bus.clone(), |_| Ok(EventBus::new()), vec![])
            .register_singleton(
                ServiceId::of::<CommandManager>(),
                |deps| {
                    let bus = deps.get::<EventBus>(0)?;
                    Ok(CommandManager::with_max_history_size(
                        EventBus::clone(&bus),
                        env_vars::max_history_size(),
                    ))
                },
                vec![bus.clone()],
            )
            .register_singleton(
                ServiceId::of::<PluginManager>(),
                |deps| {
                    let bus = deps.get::<EventBus>(0)?;
                    Ok(PluginManager::new(EventBus::clone(&bus)))
                },
                vec![bus.clone()],
            )
            .register_singleton(
                ServiceId::of::<StateMachine<EditorContext>>(),
                move |deps| {
                    let bus = deps.get::<EventBus>(0)?;
                    Ok(StateMachine::with_shared_context(
                        context.clone(),
                        EventBus::clone(&bus),
                    ))
                },
                vec![bus],
            );
    }

    fn setup_state_machine(machine: &StateMachine<EditorContext>) -> Result<()> {
        machine.add_states([
            Arc::new(IdleState) as DynState<EditorContext>,
            Arc::new(DrawingState) as DynState<EditorContext>,
            Arc::new(DraggingState) as DynState<EditorContext>,
            Arc::new(SelectingState) as DynState<EditorContext>,
        ])?;

        machine.add_transitions([
            Transition::initial(modes::IDLE),
            Transition::new(modes::IDLE, modes::DRAWING),
            Transition::new(modes::IDLE, modes::DRAGGING),
            Transition::new(modes::IDLE, modes::SELECTING),
            Transition::new(modes::DRAWING, modes::IDLE),
            Transition::new(modes::DRAGGING, modes::IDLE),
            Transition::new(modes::SELECTING, modes::IDLE),
        ]);
        Ok(())
    }

    /// Initialise the editor with a renderer.
    ///
    /// Merges `patch` over the current options, validates them, initialises
    /// the renderer, enters `idle` and activates every registered plugin.
    /// Calling `init` twice is a no-op with a warning. On failure, plugins
    /// activated so far are deactivated and a renderer that was already
    /// initialised is destroyed.
    pub async fn init(&self, patch: EditorOptionsPatch, renderer: SharedRenderer) -> Result<()> {
        if self.context.is_initialized() {
            tracing::warn!("Editor already initialized");
            return Ok(());
        }

        match self.try_init(patch, renderer).await {
            Ok(()) => {
                self.context.initialized.store(true, Ordering::SeqCst);
                tracing::info!("Editor initialized");
                let options = serde_json::to_value(self.context.options()).unwrap_or(Value::Null);
                self.event_bus
                    .notify(events::EDITOR_INITIALIZED, json!({ "options": options }))
                    .await;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to initialize editor: {}", e);
                self.rollback_init().await;
                self.report_error(&e).await;
                Err(e)
            }
        }
    }

    /// Undo the parts of a failed `init` that already took effect.
    async fn rollback_init(&self) {
        if let Err(e) = self.plugin_manager.deactivate_all().await {
            tracing::error!("Failed to deactivate plugins after failed init: {}", e);
        }
        if let Some(renderer) = self.context.renderer() {
            renderer.destroy();
        }
        self.context.reset();
    }

    async fn try_init(&self, patch: EditorOptionsPatch, renderer: SharedRenderer) -> Result<()> {
        let options = self.context.options().merged(&patch);
        options.validate()?;

        renderer.initialize(&options).map_err(Error::Renderer)?;
        renderer.update_options(&options);

        self.context.update_state(|s| {
            s.readonly = options.readonly;
            s.scale = options.scale;
        });
        *self.context.options.write() = options;
        *self.context.renderer.write() = Some(renderer);

        self.state_machine.transition_to(modes::IDLE).await?;
        self.plugin_manager.initialize().await?;
        Ok(())
    }

    /// Tear everything down.
    ///
    /// Order: renderer, plugins, commands, state machine, then the
    /// `editor:destroyed` event, the event bus and the container.
    pub async fn destroy(self) {
        if !self.context.is_initialized() {
            return;
        }

        if let Some(renderer) = self.context.renderer() {
            renderer.destroy();
        }
        self.plugin_manager.destroy().await;
        self.command_manager.destroy().await;
        self.state_machine.destroy().await;

        self.event_bus.notify(events::EDITOR_DESTROYED, json!({})).await;
        self.event_bus.clear();
        self.container.clear();
        self.context.reset();
        tracing::info!("Editor destroyed");
    }

    fn renderer(&self) -> Result<SharedRenderer> {
        if !self.context.is_initialized() {
            return Err(Error::NotInitialized);
        }
        self.context.renderer().ok_or(Error::NotInitialized)
    }

    async fn report_error(&self, error: &Error) {
        self.event_bus
            .notify(events::EDITOR_ERROR, json!({ "error": error.to_string() }))
            .await;
    }

    /// Execute a registered command. The editor's renderer is attached to
    /// the context unless the caller supplied one.
    pub async fn execute_command(&self, command_id: &str, context: CommandContext) -> Result<()> {
        let renderer = self.renderer()?;
        let context = if context.has_renderer() {
            context
        } else {
            context.with_renderer(renderer)
        };

        if let Err(e) = self.command_manager.execute(command_id, context).await {
            let e = Error::from(e);
            self.report_error(&e).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn undo(&self) -> Result<()> {
        self.renderer()?;
        self.command_manager.undo().await?;
        Ok(())
    }

    pub async fn redo(&self) -> Result<()> {
        self.renderer()?;
        self.command_manager.redo().await?;
        Ok(())
    }

    pub fn register_command(&self, command: DynCommand) {
        self.command_manager.register_command(command);
    }

    /// Register a plugin without activating it.
    pub fn register_plugin(&self, plugin: DynPlugin) -> Result<()> {
        self.plugin_manager.register(plugin)?;
        Ok(())
    }

    /// Register (if needed) and activate a plugin on a running editor.
    pub async fn load_plugin(&self, plugin: DynPlugin) -> Result<()> {
        self.renderer()?;
        let metadata = plugin.metadata().clone();
        if !self.plugin_manager.has_plugin(&metadata.id) {
            self.plugin_manager.register(plugin)?;
        }
        self.plugin_manager.activate(&metadata.id).await?;
        self.event_bus
            .notify(
                events::EDITOR_PLUGIN_LOADED,
                json!({ "pluginId": metadata.id, "name": metadata.name }),
            )
            .await;
        Ok(())
    }

    pub async fn unload_plugin(&self, plugin_id: &str) -> Result<()> {
        self.renderer()?;
        self.plugin_manager.deactivate(plugin_id).await?;
        self.event_bus
            .notify(events::EDITOR_PLUGIN_UNLOADED, json!({ "pluginId": plugin_id }))
            .await;
        Ok(())
    }

    /// Switch interaction mode.
    pub async fn transition_to(&self, mode: &str) -> Result<()> {
        self.state_machine.transition_to(mode).await?;
        Ok(())
    }

    /// Forward a time step to the current mode.
    pub fn update(&self, delta_time: f64) {
        self.state_machine.update(delta_time);
    }

    pub fn get_options(&self) -> EditorOptions {
        self.context.options()
    }

    /// Merge and validate new options, then push them to the renderer.
    pub async fn set_options(&self, patch: EditorOptionsPatch) -> Result<()> {
        let renderer = self.renderer()?;
        let options = self.context.options().merged(&patch);
        options.validate()?;

        renderer.update_options(&options);
        self.context.update_state(|s| s.readonly = options.readonly);
        *self.context.options.write() = options.clone();

        let options = serde_json::to_value(options).unwrap_or(Value::Null);
        self.event_bus
            .notify(events::EDITOR_OPTIONS_CHANGED, json!({ "options": options }))
            .await;
        Ok(())
    }

    pub fn get_data(&self) -> Result<Value> {
        Ok(self.renderer()?.get_data())
    }

    pub async fn set_data(&self, data: Value) -> Result<()> {
        self.renderer()?.set_data(data.clone());
        self.event_bus
            .notify(events::EDITOR_DATA_CHANGED, json!({ "data": data }))
            .await;
        Ok(())
    }

    pub fn get_selected(&self) -> Result<Vec<Pen>> {
        Ok(self.renderer()?.get_selected())
    }

    pub async fn set_selected(&self, pens: Vec<Pen>) -> Result<()> {
        self.renderer()?.set_selected(pens.clone());
        self.context
            .update_state(|s| s.selected_pens = pens.clone());
        self.event_bus
            .notify(events::EDITOR_SELECTION_CHANGED, json!({ "pens": pens }))
            .await;
        Ok(())
    }

    /// Zoom to `scale`, clamped into the configured bounds. Returns the
    /// applied scale.
    pub async fn zoom_to(&self, scale: f64, center: Option<Point>) -> Result<f64> {
        let renderer = self.renderer()?;
        let scale = self.context.options().clamp_scale(scale);
        renderer.zoom(scale, center);
        self.context.update_state(|s| {
            s.scale = scale;
            if let Some(center) = center {
                s.center = center;
            }
        });
        self.notify_scale(scale).await;
        Ok(scale)
    }

    pub async fn fit_view(&self) -> Result<()> {
        let renderer = self.renderer()?;
        renderer.fit_view();
        let scale = renderer.scale();
        self.context.update_state(|s| s.scale = scale);
        self.notify_scale(scale).await;
        Ok(())
    }

    async fn notify_scale(&self, scale: f64) {
        self.event_bus
            .notify(events::EDITOR_SCALE_CHANGED, json!({ "scale": scale }))
            .await;
    }

    pub fn get_scale(&self) -> Result<f64> {
        Ok(self.renderer()?.scale())
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_initialized()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn command_manager(&self) -> &CommandManager {
        &self.command_manager
    }

    pub fn plugin_manager(&self) -> &PluginManager {
        &self.plugin_manager
    }

    pub fn state_machine(&self) -> &StateMachine<EditorContext> {
        &self.state_machine
    }

    pub fn context(&self) -> &Arc<EditorContext> {
        &self.context
    }

    pub fn container(&self) -> &Container {
        &self.container
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("initialized", &self.is_initialized())
            .field("mode", &self.state_machine.get_current_state_name())
            .finish()
    }
}
