//! Integration tests for the state machine.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vellum_core::eventbus::{EventBus, ListenerOptions};
use vellum_core::events;
use vellum_core::state::{DynState, State, StateError, StateMachine, Transition};

#[derive(Default)]
struct Canvas {
    log: Mutex<Vec<String>>,
    can_draw: AtomicBool,
    fail_enter: AtomicBool,
}

impl Canvas {
    fn push(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

struct Mode(&'static str);

#[async_trait]
impl State<Canvas> for Mode {
    fn name(&self) -> &str {
        self.0
    }

    async fn on_enter(&self, ctx: &Canvas) -> anyhow::Result<()> {
        if ctx.fail_enter.load(Ordering::SeqCst) {
            anyhow::bail!("cannot enter {}", self.0);
        }
        ctx.push(format!("enter:{}", self.0));
        Ok(())
    }

    async fn on_exit(&self, ctx: &Canvas) -> anyhow::Result<()> {
        ctx.push(format!("exit:{}", self.0));
        Ok(())
    }
}

fn capture(bus: &EventBus, name: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.on(
        name,
        move |data| {
            let sink = sink.clone();
            async move {
                sink.lock().push(data);
                Ok(())
            }
        },
        ListenerOptions::new(),
    );
    seen
}

fn machine(bus: EventBus) -> StateMachine<Canvas> {
    let machine = StateMachine::new(Canvas::default(), bus);
    machine
        .add_states([
            Arc::new(Mode("idle")) as DynState<Canvas>,
            Arc::new(Mode("drawing")) as DynState<Canvas>,
        ])
        .unwrap();
    machine
}

#[tokio::test]
async fn test_idle_to_drawing_scenario() {
    let bus = EventBus::new();
    let changes = capture(&bus, events::STATE_CHANGED);
    let machine = machine(bus);
    machine.add_transition(Transition::new("idle", "drawing"));

    machine.transition_to("idle").await.unwrap();
    machine.transition_to("drawing").await.unwrap();

    assert_eq!(machine.get_current_state_name().as_deref(), Some("drawing"));
    assert_eq!(
        *changes.lock(),
        vec![
            json!({"from": null, "to": "idle"}),
            json!({"from": "idle", "to": "drawing"}),
        ]
    );
}

#[tokio::test]
async fn test_condition_gates_transition() {
    let bus = EventBus::new();
    let changes = capture(&bus, events::STATE_CHANGED);
    let machine = machine(bus);
    machine.add_transition(
        Transition::new("idle", "drawing")
            .with_condition(|ctx: Arc<Canvas>| async move { ctx.can_draw.load(Ordering::SeqCst) }),
    );
    machine.transition_to("idle").await.unwrap();

    machine.transition_to("drawing").await.unwrap();
    assert!(machine.is_in_state("idle"));
    assert_eq!(changes.lock().len(), 1);

    machine.context().can_draw.store(true, Ordering::SeqCst);
    machine.transition_to("drawing").await.unwrap();
    assert!(machine.is_in_state("drawing"));

    let changes = changes.lock();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[1], json!({"from": "idle", "to": "drawing"}));
}

#[tokio::test]
async fn test_hook_order() {
    let machine = machine(EventBus::new());
    machine.add_transition(
        Transition::new("idle", "drawing")
            .on_before(|ctx: Arc<Canvas>| async move {
                ctx.push("before");
                Ok(())
            })
            .on_after(|ctx: Arc<Canvas>| async move {
                ctx.push("after");
                Ok(())
            }),
    );

    machine.transition_to("idle").await.unwrap();
    machine.transition_to("drawing").await.unwrap();

    assert_eq!(
        machine.context().entries(),
        vec!["enter:idle", "before", "exit:idle", "enter:drawing", "after"]
    );
}

#[tokio::test]
async fn test_initial_transition_record_applies() {
    let machine = machine(EventBus::new());
    machine.add_transition(Transition::initial("idle").on_after(|ctx: Arc<Canvas>| async move {
        ctx.push("booted");
        Ok(())
    }));

    machine.transition_to("idle").await.unwrap();
    assert_eq!(machine.context().entries(), vec!["enter:idle", "booted"]);
}

#[tokio::test]
async fn test_first_matching_record_wins() {
    let machine = machine(EventBus::new());
    machine.add_transitions([
        Transition::new("idle", "drawing").on_before(|ctx: Arc<Canvas>| async move {
            ctx.push("first");
            Ok(())
        }),
        Transition::new("idle", "drawing").on_before(|ctx: Arc<Canvas>| async move {
            ctx.push("second");
            Ok(())
        }),
    ]);

    machine.transition_to("idle").await.unwrap();
    machine.transition_to("drawing").await.unwrap();
    let entries = machine.context().entries();
    assert!(entries.contains(&"first".to_string()));
    assert!(!entries.contains(&"second".to_string()));
}

#[tokio::test]
async fn test_before_hook_failure_leaves_state_unchanged() {
    let bus = EventBus::new();
    let changes = capture(&bus, events::STATE_CHANGED);
    let machine = machine(bus);
    machine.add_transition(
        Transition::new("idle", "drawing")
            .on_before(|_ctx: Arc<Canvas>| async { Err(anyhow::anyhow!("locked")) }),
    );
    machine.transition_to("idle").await.unwrap();

    let err = machine.transition_to("drawing").await.unwrap_err();
    match err {
        StateError::Hook { state, hook, .. } => {
            assert_eq!(state, "drawing");
            assert_eq!(hook, "before_transition");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(machine.is_in_state("idle"));
    assert_eq!(changes.lock().len(), 1);
}

#[tokio::test]
async fn test_enter_failure_keeps_target_current() {
    let machine = machine(EventBus::new());
    machine.transition_to("idle").await.unwrap();

    machine.context().fail_enter.store(true, Ordering::SeqCst);
    let err = machine.transition_to("drawing").await.unwrap_err();
    assert!(matches!(err, StateError::Hook { hook: "on_enter", .. }));
    assert!(machine.is_in_state("drawing"));
}

#[tokio::test]
async fn test_unknown_and_duplicate_states() {
    let machine = machine(EventBus::new());
    assert!(matches!(
        machine.transition_to("erasing").await,
        Err(StateError::UnknownState(ref name)) if name == "erasing"
    ));
    assert!(matches!(
        machine.add_state(Arc::new(Mode("idle"))),
        Err(StateError::DuplicateState(_))
    ));
    assert_eq!(machine.state_names(), vec!["drawing", "idle"]);
}

#[tokio::test]
async fn test_update_context_replaces_hook_context() {
    let machine = machine(EventBus::new());
    machine.transition_to("idle").await.unwrap();
    assert_eq!(machine.context().entries(), vec!["enter:idle"]);

    machine.update_context(Canvas::default());
    assert!(machine.context().entries().is_empty());

    machine.transition_to("drawing").await.unwrap();
    assert_eq!(machine.context().entries(), vec!["exit:idle", "enter:drawing"]);
}

#[tokio::test]
async fn test_destroy_exits_current_state() {
    let bus = EventBus::new();
    let destroyed = capture(&bus, events::STATE_DESTROYED);
    let machine = machine(bus);
    machine.transition_to("drawing").await.unwrap();
    let ctx = machine.context();

    machine.destroy().await;
    assert_eq!(ctx.entries(), vec!["enter:drawing", "exit:drawing"]);
    assert_eq!(machine.get_current_state_name(), None);
    assert!(!machine.has_state("idle"));
    assert_eq!(destroyed.lock().len(), 1);
}
