use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::session::IntentState;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    Answer { response: String },
    CallFunction(ToolCall),
}

/// One per inbound message; consumed by the same request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(flatten)]
    pub action: DecisionAction,
    pub next_state: IntentState,
    pub grounding: Option<String>,
}

impl Decision {
    pub fn answer(response: impl Into<String>, next_state: IntentState) -> Self {
        Self {
            action: DecisionAction::Answer { response: response.into() },
            next_state,
            grounding: None,
        }
    }

    pub fn call(call: ToolCall, next_state: IntentState) -> Self {
        Self { action: DecisionAction::CallFunction(call), next_state, grounding: None }
    }

    pub fn with_grounding(mut self, grounding: Option<String>) -> Self {
        self.grounding = grounding;
        self
    }

    pub fn tool_call(&self) -> Option<&ToolCall> {
        match &self.action {
            DecisionAction::CallFunction(call) => Some(call),
            DecisionAction::Answer { .. } => None,
        }
    }

    pub fn response(&self) -> Option<&str> {
        match &self.action {
            DecisionAction::Answer { response } => Some(response.as_str()),
            DecisionAction::CallFunction(_) => None,
        }
    }
}
