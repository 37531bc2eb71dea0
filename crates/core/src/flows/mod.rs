pub mod engine;
pub mod states;

pub use engine::{
    human_mode_expired, resolve_next_intent, FlowDefinition, FlowEngine, FlowTransitionError,
    IntentResolution, ModeFlow,
};
pub use states::{FlowAction, ModeEvent, TransitionOutcome};
