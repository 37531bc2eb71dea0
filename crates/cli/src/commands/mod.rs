pub mod config;
pub mod doctor;
pub mod migrate;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Why a command stopped: a stable class for scripts, a message for people
/// and the process exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandFailure {
    pub fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>, details: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command,
            status: "ok",
            error_class: None,
            message: message.into(),
            details,
        };
        Self { exit_code: 0, output: serialize_payload(&payload) }
    }

    pub fn failure(command: &str, failure: CommandFailure) -> Self {
        let payload = CommandOutcome {
            command,
            status: "error",
            error_class: Some(failure.error_class),
            message: failure.message,
            details: None,
        };
        Self { exit_code: failure.exit_code, output: serialize_payload(&payload) }
    }
}

fn serialize_payload(payload: &CommandOutcome<'_>) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        serde_json::json!({
            "command": payload.command,
            "status": "error",
            "error_class": "serialization",
            "message": error.to_string(),
        })
        .to_string()
    })
}

pub(crate) fn current_thread_runtime() -> Result<tokio::runtime::Runtime, CommandFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandFailure::new(
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}
