use serde::{Deserialize, Serialize};

use crate::domain::session::Mode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeEvent {
    ManagerMessage,
    ResetToken,
    AttachmentReceived,
    HandoffApproved,
    InactivityTimeout,
}

impl ModeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManagerMessage => "manager_message",
            Self::ResetToken => "reset_token",
            Self::AttachmentReceived => "attachment_received",
            Self::HandoffApproved => "handoff_approved",
            Self::InactivityTimeout => "inactivity_timeout",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    NotifyTimeoutRecovery,
    NotifyAttachmentReceived,
    TouchSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: Mode,
    pub to: Mode,
    pub event: ModeEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn requires(&self, action: FlowAction) -> bool {
        self.actions.contains(&action)
    }
}
