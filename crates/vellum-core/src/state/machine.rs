//! State machine implementation.
//!
//! Registered transitions are not a whitelist. A transition record matching
//! `(current, target)` only contributes its condition and its before/after
//! hooks; moving to any registered state is allowed whether or not a record
//! exists. Before the first transition the current state is reported as
//! [`INITIAL_STATE`] when matching records.

use super::StateError;
use crate::eventbus::EventBus;
use crate::events;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Name matched as the `from` side of a transition while no state is current.
pub const INITIAL_STATE: &str = "null";

/// A named state with optional enter/exit/update hooks.
#[async_trait]
pub trait State<C: Send + Sync + 'static>: Send + Sync {
    fn name(&self) -> &str;

    async fn on_enter(&self, _ctx: &C) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_exit(&self, _ctx: &C) -> anyhow::Result<()> {
        Ok(())
    }

    /// Time-stepped behaviour while the state is current.
    fn on_update(&self, _ctx: &C, _delta_time: f64) {}
}

/// Shared state handle.
pub type DynState<C> = Arc<dyn State<C>>;

type Condition<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, bool> + Send + Sync>;
type Hook<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A `(from, to)` edge with an optional condition and hooks.
pub struct Transition<C> {
    from: String,
    to: String,
    condition: Option<Condition<C>>,
    before: Option<Hook<C>>,
    after: Option<Hook<C>>,
}

impl<C> Clone for Transition<C> {
    fn clone(&self) -> Self {
        Self {
            from: self.from.clone(),
            to: self.to.clone(),
            condition: self.condition.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> Transition<C> {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
            before: None,
            after: None,
        }
    }

    /// Edge taken by the very first transition.
    pub fn initial(to: impl Into<String>) -> Self {
        Self::new(INITIAL_STATE, to)
    }

    /// Gate the transition; a `false` result leaves the machine unchanged.
    pub fn with_condition<F, Fut>(mut self, condition: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.condition = Some(Arc::new(move |ctx| condition(ctx).boxed()));
        self
    }

    /// Run before the current state is exited.
    pub fn on_before<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.before = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// Run after the target state is entered.
    pub fn on_after<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.after = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn has_condition(&self) -> bool {
        self.condition.is_some()
    }
}

impl<C> std::fmt::Debug for Transition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("condition", &self.condition.is_some())
            .finish()
    }
}

/// State machine over a shared context `C`.
pub struct StateMachine<C: Send + Sync + 'static> {
    states: RwLock<HashMap<String, DynState<C>>>,
    transitions: RwLock<Vec<Transition<C>>>,
    current: RwLock<Option<DynState<C>>>,
    context: RwLock<Arc<C>>,
    event_bus: EventBus,
}

impl<C: Send + Sync + 'static> StateMachine<C> {
    pub fn new(context: C, event_bus: EventBus) -> Self {
        Self::with_shared_context(Arc::new(context), event_bus)
    }

    /// Create a machine over a context the caller keeps a handle to.
    pub fn with_shared_context(context: Arc<C>, event_bus: EventBus) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            transitions: RwLock::new(Vec::new()),
            current: RwLock::new(None),
            context: RwLock::new(context),
            event_bus,
        }
    }

    /// Register a state. Names must be unique.
    pub fn add_state(&self, state: DynState<C>) -> Result<&Self, StateError> {
        let name = state.name().to_string();
        let mut states = self.states.write();
        if states.contains_key(&name) {
            return Err(StateError::DuplicateState(name));
        }
        states.insert(name, state);
        Ok(self)
    }

    pub fn add_states(
        &self,
        states: impl IntoIterator<Item = DynState<C>>,
    ) -> Result<&Self, StateError> {
        for state in states {
            self.add_state(state)?;
        }
        Ok(self)
    }

    /// Register a transition record. The first record for a given
    /// `(from, to)` pair wins.
    pub fn add_transition(&self, transition: Transition<C>) -> &Self {
        self.transitions.write().push(transition);
        self
    }

    pub fn add_transitions(&self, transitions: impl IntoIterator<Item = Transition<C>>) -> &Self {
        self.transitions.write().extend(transitions);
        self
    }

    /// Move to `state_name`.
    ///
    /// Order of effects: condition, before hook, `on_exit` of the current
    /// state, pointer update, `on_enter` of the target, after hook, then a
    /// `state:changed` event. A false condition aborts with a warning and
    /// returns `Ok`.
    pub async fn transition_to(&self, state_name: &str) -> Result<(), StateError> {
        let target = self
            .states
            .read()
            .get(state_name)
            .cloned()
            .ok_or_else(|| StateError::UnknownState(state_name.to_string()))?;

        let previous = self.current.read().clone();
        let from_name = previous
            .as_ref()
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| INITIAL_STATE.to_string());

        let transition = self
            .transitions
            .read()
            .iter()
            .find(|t| t.from == from_name && t.to == state_name)
            .cloned();

        let ctx = self.context();

        if let Some(condition) = transition.as_ref().and_then(|t| t.condition.clone()) {
            if !condition(ctx.clone()).await {
                tracing::warn!(
                    "Transition from \"{}\" to \"{}\" blocked by condition",
                    from_name,
                    state_name
                );
                return Ok(());
            }
        }

        if let Some(before) = transition.as_ref().and_then(|t| t.before.clone()) {
            before(ctx.clone()).await.map_err(|source| StateError::Hook {
                state: state_name.to_string(),
                hook: "before_transition",
                source,
            })?;
        }

        if let Some(current) = &previous {
            current.on_exit(&ctx).await.map_err(|source| StateError::Hook {
                state: current.name().to_string(),
                hook: "on_exit",
                source,
            })?;
        }

        *self.current.write() = Some(target.clone());

        target.on_enter(&ctx).await.map_err(|source| StateError::Hook {
            state: state_name.to_string(),
            hook: "on_enter",
            source,
        })?;

        if let Some(after) = transition.as_ref().and_then(|t| t.after.clone()) {
            after(ctx.clone()).await.map_err(|source| StateError::Hook {
                state: state_name.to_string(),
                hook: "after_transition",
                source,
            })?;
        }

        let from = previous.as_ref().map(|s| s.name().to_string());
        tracing::debug!(from = ?from, to = state_name, "State changed");
        self.event_bus
            .notify(
                events::STATE_CHANGED,
                json!({ "from": from, "to": state_name }),
            )
            .await;
        Ok(())
    }

    /// Forward a time step to the current state.
    pub fn update(&self, delta_time: f64) {
        let current = self.current.read().clone();
        if let Some(state) = current {
            state.on_update(&self.context(), delta_time);
        }
    }

    pub fn get_current_state(&self) -> Option<DynState<C>> {
        self.current.read().clone()
    }

    pub fn get_current_state_name(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.name().to_string())
    }

    pub fn is_in_state(&self, state_name: &str) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|s| s.name() == state_name)
    }

    /// Replace the context handed to hooks.
    pub fn update_context(&self, context: C) {
        *self.context.write() = Arc::new(context);
    }

    pub fn context(&self) -> Arc<C> {
        self.context.read().clone()
    }

    /// Registered state names, sorted.
    pub fn state_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.states.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_state(&self, state_name: &str) -> bool {
        self.states.read().contains_key(state_name)
    }

    /// Targets of the transition records leaving `state_name`.
    pub fn transitions_from(&self, state_name: &str) -> Vec<String> {
        self.transitions
            .read()
            .iter()
            .filter(|t| t.from == state_name)
            .map(|t| t.to.clone())
            .collect()
    }

    /// Exit the current state and drop every state and transition.
    pub async fn destroy(&self) {
        let current = self.current.write().take();
        if let Some(state) = current {
            if let Err(e) = state.on_exit(&self.context()).await {
                tracing::error!("Failed to exit state \"{}\": {}", state.name(), e);
            }
        }
        self.states.write().clear();
        self.transitions.write().clear();
        self.event_bus.notify(events::STATE_DESTROYED, json!({})).await;
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for StateMachine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.get_current_state_name())
            .field("states", &self.state_names())
            .finish()
    }
}
