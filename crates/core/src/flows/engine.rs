use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;

use crate::domain::session::{IntentState, Mode};
use crate::flows::states::{FlowAction, ModeEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn transition(
        &self,
        current: Mode,
        event: ModeEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// AI/human gate of a conversation.
#[derive(Clone, Debug, Default)]
pub struct ModeFlow;

impl FlowDefinition for ModeFlow {
    fn transition(
        &self,
        current: Mode,
        event: ModeEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_mode(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn apply(
        &self,
        current: Mode,
        event: ModeEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let result = self.flow.transition(current, event);
        match &result {
            Ok(outcome) => debug!(
                event_name = "flow.transition_applied",
                from = outcome.from.as_str(),
                to = outcome.to.as_str(),
                trigger = event.as_str(),
                "mode transition applied"
            ),
            Err(error) => debug!(
                event_name = "flow.transition_rejected",
                error = %error,
                "mode transition rejected"
            ),
        }
        result
    }
}

impl Default for FlowEngine<ModeFlow> {
    fn default() -> Self {
        Self::new(ModeFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: Mode, event: ModeEvent },
}

fn transition_mode(
    current: Mode,
    event: ModeEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{NotifyAttachmentReceived, NotifyTimeoutRecovery, TouchSession};
    use Mode::{AiMode, HumanMode};
    use ModeEvent::{
        AttachmentReceived, HandoffApproved, InactivityTimeout, ManagerMessage, ResetToken,
    };

    let (to, actions) = match (current, event) {
        (_, ResetToken) => (AiMode, vec![TouchSession]),
        (_, ManagerMessage) => (HumanMode, vec![TouchSession]),
        (_, AttachmentReceived) => (HumanMode, vec![TouchSession, NotifyAttachmentReceived]),
        (AiMode, HandoffApproved) => (HumanMode, vec![TouchSession]),
        (HumanMode, InactivityTimeout) => (AiMode, vec![TouchSession, NotifyTimeoutRecovery]),
        (HumanMode, HandoffApproved) | (AiMode, InactivityTimeout) => {
            return Err(FlowTransitionError::InvalidTransition { state: current, event });
        }
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}

/// Strictly older than `timeout` counts as expired.
pub fn human_mode_expired(
    last_updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> bool {
    now - last_updated_at > timeout
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntentResolution {
    /// State used while shaping this turn's reply.
    pub current_turn: IntentState,
    /// State written back to the session for the next turn.
    pub persisted: IntentState,
}

/// Tool-forced state wins for the current turn; the oracle's declared state
/// is what gets persisted. With neither, the current state holds.
pub fn resolve_next_intent(
    current: IntentState,
    tool_forced: Option<IntentState>,
    oracle_declared: Option<IntentState>,
) -> IntentResolution {
    IntentResolution {
        current_turn: tool_forced.or(oracle_declared).unwrap_or(current),
        persisted: oracle_declared.or(tool_forced).unwrap_or(current),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::session::{IntentState, Mode};
    use crate::flows::engine::{
        human_mode_expired, resolve_next_intent, FlowEngine, FlowTransitionError, ModeFlow,
    };
    use crate::flows::states::{FlowAction, ModeEvent};

    #[test]
    fn manager_message_hands_conversation_to_staff() {
        let engine = FlowEngine::new(ModeFlow);
        let outcome = engine.apply(Mode::AiMode, ModeEvent::ManagerMessage).expect("ai -> human");

        assert_eq!(outcome.from, Mode::AiMode);
        assert_eq!(outcome.to, Mode::HumanMode);
        assert_eq!(outcome.actions, vec![FlowAction::TouchSession]);
    }

    #[test]
    fn reset_token_returns_control_from_any_mode() {
        let engine = FlowEngine::default();
        for mode in [Mode::AiMode, Mode::HumanMode] {
            let outcome = engine.apply(mode, ModeEvent::ResetToken).expect("reset always valid");
            assert_eq!(outcome.to, Mode::AiMode);
        }
    }

    #[test]
    fn timeout_recovery_emits_single_notice_action() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(Mode::HumanMode, ModeEvent::InactivityTimeout)
            .expect("human -> ai on timeout");

        assert_eq!(outcome.to, Mode::AiMode);
        let notices =
            outcome.actions.iter().filter(|a| **a == FlowAction::NotifyTimeoutRecovery).count();
        assert_eq!(notices, 1);
    }

    #[test]
    fn attachment_requests_staff_review_notice() {
        let outcome = FlowEngine::default()
            .apply(Mode::AiMode, ModeEvent::AttachmentReceived)
            .expect("attachment always valid");

        assert_eq!(outcome.to, Mode::HumanMode);
        assert!(outcome.requires(FlowAction::NotifyAttachmentReceived));
    }

    #[test]
    fn timeout_is_rejected_outside_human_mode() {
        let error = FlowEngine::default()
            .apply(Mode::AiMode, ModeEvent::InactivityTimeout)
            .expect_err("no timeout in ai mode");

        assert_eq!(
            error,
            FlowTransitionError::InvalidTransition {
                state: Mode::AiMode,
                event: ModeEvent::InactivityTimeout
            }
        );
    }

    #[test]
    fn expiry_is_strictly_after_timeout() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).single().expect("valid timestamp");
        let timeout = Duration::minutes(30);

        assert!(!human_mode_expired(start, start + timeout, timeout));
        assert!(human_mode_expired(start, start + timeout + Duration::seconds(1), timeout));
    }

    #[test]
    fn tool_forced_intent_applies_now_and_oracle_value_persists() {
        let resolution = resolve_next_intent(
            IntentState::Idle,
            Some(IntentState::AwaitingInfo),
            Some(IntentState::Confirming),
        );
        assert_eq!(resolution.current_turn, IntentState::AwaitingInfo);
        assert_eq!(resolution.persisted, IntentState::Confirming);

        let held = resolve_next_intent(IntentState::AwaitingInfo, None, None);
        assert_eq!(held.current_turn, IntentState::AwaitingInfo);
        assert_eq!(held.persisted, IntentState::AwaitingInfo);

        let forced_only = resolve_next_intent(IntentState::Idle, Some(IntentState::AwaitingInfo), None);
        assert_eq!(forced_only.persisted, IntentState::AwaitingInfo);
    }
}
