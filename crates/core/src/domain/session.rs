use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    AiMode,
    HumanMode,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiMode => "AI_MODE",
            Self::HumanMode => "HUMAN_MODE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AI_MODE" => Some(Self::AiMode),
            "HUMAN_MODE" => Some(Self::HumanMode),
            _ => None,
        }
    }
}

/// Progress through a multi-turn task. Parsing is total: anything the
/// oracle invents collapses to `Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentState {
    #[default]
    Idle,
    AwaitingTime,
    AwaitingInfo,
    Confirming,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AwaitingTime => "AWAITING_TIME",
            Self::AwaitingInfo => "AWAITING_INFO",
            Self::Confirming => "CONFIRMING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "IDLE" => Some(Self::Idle),
            "AWAITING_TIME" => Some(Self::AwaitingTime),
            "AWAITING_INFO" => Some(Self::AwaitingInfo),
            "CONFIRMING" => Some(Self::Confirming),
            _ => None,
        }
    }

    pub fn parse_or_idle(value: &str) -> Self {
        Self::parse(value).unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    #[default]
    Normal,
    ConsultationReady,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::ConsultationReady => "CONSULTATION_READY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NORMAL" => Some(Self::Normal),
            "CONSULTATION_READY" => Some(Self::ConsultationReady),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    AwaitingTime,
    AwaitingInfo,
    Confirmed,
}

impl BookingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingTime => "awaiting_time",
            Self::AwaitingInfo => "awaiting_info",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "awaiting_time" => Some(Self::AwaitingTime),
            "awaiting_info" => Some(Self::AwaitingInfo),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

/// Booking sub-record. Updates merge field by field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingState {
    pub step: Option<BookingStep>,
    pub proposed_time: Option<DateTime<Utc>>,
    pub selected_time: Option<DateTime<Utc>>,
    pub customer_name: Option<String>,
}

impl BookingState {
    pub fn merge(&mut self, patch: BookingState) {
        if patch.step.is_some() {
            self.step = patch.step;
        }
        if patch.proposed_time.is_some() {
            self.proposed_time = patch.proposed_time;
        }
        if patch.selected_time.is_some() {
            self.selected_time = patch.selected_time;
        }
        if patch.customer_name.is_some() {
            self.customer_name = patch.customer_name;
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.step, Some(step) if step != BookingStep::Confirmed)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub mode: Mode,
    pub intent_state: IntentState,
    pub conversation_count: u32,
    pub conversation_state: ConversationState,
    pub booking_state: BookingState,
    pub handoff_requests: u32,
    pub mode_reason: Option<String>,
    pub mode_changed_at: Option<DateTime<Utc>>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl Session {
    /// What the orchestrator assumes when the store has nothing or fails.
    pub fn fresh(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            mode: Mode::AiMode,
            intent_state: IntentState::Idle,
            conversation_count: 0,
            conversation_state: ConversationState::Normal,
            booking_state: BookingState::default(),
            handoff_requests: 0,
            mode_reason: None,
            mode_changed_at: None,
            last_message_time: None,
            last_updated_at: now,
        }
    }

    /// Applies a partial update. Identity and counters are not reachable
    /// through a patch.
    pub fn apply(&mut self, patch: &SessionPatch) {
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(intent_state) = patch.intent_state {
            self.intent_state = intent_state;
        }
        if let Some(booking_state) = &patch.booking_state {
            self.booking_state.merge(booking_state.clone());
        }
        if let Some(reason) = &patch.mode_reason {
            self.mode_reason = Some(reason.clone());
        }
        if let Some(changed_at) = patch.mode_changed_at {
            self.mode_changed_at = Some(changed_at);
        }
        self.last_updated_at = patch.last_updated_at;
    }

    pub fn human_mode_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.mode == Mode::HumanMode
            && crate::flows::human_mode_expired(self.last_updated_at, now, timeout)
    }
}

/// Partial session update. Every patch carries the caller's clock reading,
/// which becomes the session's `last_updated_at`.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionPatch {
    pub mode: Option<Mode>,
    pub intent_state: Option<IntentState>,
    pub booking_state: Option<BookingState>,
    pub mode_reason: Option<String>,
    pub mode_changed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl SessionPatch {
    pub fn mode(mode: Mode, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            mode: Some(mode),
            mode_reason: Some(reason.into()),
            mode_changed_at: Some(now),
            ..Self::touch(now)
        }
    }

    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            mode: None,
            intent_state: None,
            booking_state: None,
            mode_reason: None,
            mode_changed_at: None,
            last_updated_at: now,
        }
    }

    pub fn intent(intent_state: IntentState, now: DateTime<Utc>) -> Self {
        Self { intent_state: Some(intent_state), ..Self::touch(now) }
    }

    pub fn booking(booking_state: BookingState, now: DateTime<Utc>) -> Self {
        Self { booking_state: Some(booking_state), ..Self::touch(now) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub count: u32,
    pub state: ConversationState,
}

impl Default for ActivitySnapshot {
    fn default() -> Self {
        Self { count: 1, state: ConversationState::Normal }
    }
}

/// Rolling conversation counter: consecutive messages inside `window` keep
/// counting; a longer gap restarts at one in `Normal`. Reaching `threshold`
/// while `Normal` promotes to `ConsultationReady`.
pub fn advance_activity(
    previous: Option<&Session>,
    now: DateTime<Utc>,
    window: Duration,
    threshold: u32,
) -> ActivitySnapshot {
    let continuing = previous.and_then(|session| {
        session.last_message_time.filter(|last| now - *last < window).map(|_| session)
    });

    let mut snapshot = match continuing {
        Some(session) => ActivitySnapshot {
            count: session.conversation_count.saturating_add(1),
            state: session.conversation_state,
        },
        None => ActivitySnapshot::default(),
    };

    if snapshot.count >= threshold && snapshot.state == ConversationState::Normal {
        snapshot.state = ConversationState::ConsultationReady;
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{
        advance_activity, BookingState, BookingStep, ConversationState, IntentState, Mode,
        Session, SessionPatch,
    };

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 1, minute, 0).single().expect("valid timestamp")
    }

    #[test]
    fn unknown_intent_collapses_to_idle() {
        assert_eq!(IntentState::parse_or_idle("AWAITING_INFO"), IntentState::AwaitingInfo);
        assert_eq!(IntentState::parse_or_idle("awaiting-info"), IntentState::AwaitingInfo);
        assert_eq!(IntentState::parse_or_idle("BOOKING_DONE"), IntentState::Idle);
        assert_eq!(IntentState::parse_or_idle(""), IntentState::Idle);
    }

    #[test]
    fn booking_state_merge_keeps_absent_fields() {
        let mut state = BookingState {
            step: Some(BookingStep::AwaitingTime),
            customer_name: Some("김민지".to_string()),
            ..BookingState::default()
        };

        state.merge(BookingState {
            step: Some(BookingStep::AwaitingInfo),
            proposed_time: Some(at(30)),
            ..BookingState::default()
        });

        assert_eq!(state.step, Some(BookingStep::AwaitingInfo));
        assert_eq!(state.customer_name.as_deref(), Some("김민지"));
        assert_eq!(state.proposed_time, Some(at(30)));
        assert!(state.is_pending());
    }

    #[test]
    fn patch_does_not_touch_counters_or_identity() {
        let mut session = Session::fresh("user-1", at(0));
        session.conversation_count = 4;

        session.apply(&SessionPatch::mode(Mode::HumanMode, "manager_message", at(5)));

        assert_eq!(session.user_id, "user-1");
        assert_eq!(session.conversation_count, 4);
        assert_eq!(session.mode, Mode::HumanMode);
        assert_eq!(session.last_updated_at, at(5));
        assert_eq!(session.mode_reason.as_deref(), Some("manager_message"));
    }

    #[test]
    fn human_mode_expires_after_timeout_only() {
        let mut session = Session::fresh("user-1", at(0));
        session.mode = Mode::HumanMode;

        assert!(!session.human_mode_expired(at(30), Duration::minutes(30)));
        assert!(session.human_mode_expired(at(31), Duration::minutes(30)));

        session.mode = Mode::AiMode;
        assert!(!session.human_mode_expired(at(59), Duration::minutes(30)));
    }

    #[test]
    fn activity_counter_promotes_at_threshold_within_window() {
        let window = Duration::minutes(10);
        let mut session = Session::fresh("user-1", at(0));

        for (minute, expected_count) in [(0, 1), (3, 2), (6, 3)] {
            let snapshot = advance_activity(Some(&session), at(minute), window, 3);
            assert_eq!(snapshot.count, expected_count);
            session.conversation_count = snapshot.count;
            session.conversation_state = snapshot.state;
            session.last_message_time = Some(at(minute));
        }

        assert_eq!(session.conversation_state, ConversationState::ConsultationReady);
    }

    #[test]
    fn activity_counter_resets_after_gap() {
        let mut session = Session::fresh("user-1", at(0));
        session.conversation_count = 5;
        session.conversation_state = ConversationState::ConsultationReady;
        session.last_message_time = Some(at(0));

        let snapshot = advance_activity(Some(&session), at(10), Duration::minutes(10), 3);

        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.state, ConversationState::Normal);
    }

    #[test]
    fn activity_counter_starts_at_one_without_session() {
        let snapshot = advance_activity(None, at(0), Duration::minutes(10), 3);
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.state, ConversationState::Normal);
    }
}
