//! Finite state machine over named states.

pub mod machine;

pub use machine::{DynState, State, StateMachine, Transition, INITIAL_STATE};

/// State machine errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State \"{0}\" already exists")]
    DuplicateState(String),

    #[error("State \"{0}\" not found")]
    UnknownState(String),

    /// A state or transition hook failed.
    #[error("{hook} hook of \"{state}\" failed: {source}")]
    Hook {
        state: String,
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
