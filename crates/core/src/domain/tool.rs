use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::session::IntentState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAction {
    TimeSlotAvailable,
    TimeSlotUnavailable,
    InvalidDatetimeFormat,
    NaturalLanguageParseFailed,
    InvalidIsoFormat,
    RateLimited,
    HumanAgentRequested,
    ValidationFailed,
    CalendarBookingFailed,
    BookingConfirmed,
    FinalBookingError,
    SystemError,
    UnknownFunction,
}

impl ToolAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeSlotAvailable => "time_slot_available",
            Self::TimeSlotUnavailable => "time_slot_unavailable",
            Self::InvalidDatetimeFormat => "invalid_datetime_format",
            Self::NaturalLanguageParseFailed => "natural_language_parse_failed",
            Self::InvalidIsoFormat => "invalid_iso_format",
            Self::RateLimited => "rate_limited",
            Self::HumanAgentRequested => "human_agent_requested",
            Self::ValidationFailed => "validation_failed",
            Self::CalendarBookingFailed => "calendar_booking_failed",
            Self::BookingConfirmed => "booking_confirmed",
            Self::FinalBookingError => "final_booking_error",
            Self::SystemError => "system_error",
            Self::UnknownFunction => "unknown_function",
        }
    }
}

/// Structured outcome of a tool. Tools never throw past this type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub action: ToolAction,
    pub message: Option<String>,
    pub payload: Map<String, Value>,
}

impl ToolResult {
    pub fn success(action: ToolAction, payload: Map<String, Value>) -> Self {
        Self { success: true, action, message: None, payload }
    }

    pub fn failure(action: ToolAction, message: impl Into<String>) -> Self {
        Self { success: false, action, message: Some(message.into()), payload: Map::new() }
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        Self::failure(ToolAction::SystemError, message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Intent state a tool outcome imposes on the current turn.
    pub fn forced_intent(&self) -> Option<IntentState> {
        match (self.success, self.action) {
            (true, ToolAction::TimeSlotAvailable) => Some(IntentState::AwaitingInfo),
            (true, ToolAction::BookingConfirmed) => Some(IntentState::Idle),
            _ => None,
        }
    }

    /// Flat JSON form handed to the response oracle.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("success".to_string(), Value::Bool(self.success));
        object.insert("action".to_string(), Value::String(self.action.as_str().to_string()));
        if let Some(message) = &self.message {
            object.insert("message".to_string(), Value::String(message.clone()));
        }
        for (key, value) in &self.payload {
            object.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(object)
    }
}
