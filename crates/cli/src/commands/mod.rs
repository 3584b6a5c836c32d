pub mod config;
pub mod diagnose;
pub mod doctor;
pub mod index;
pub mod migrate;
pub mod recommend;
pub mod rules;
pub mod seed;
pub mod smart;

mod session;

use serde::Serialize;
use serde_json::Value;

pub use session::Session;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// `(error_class, message, exit_code)` carried out of a failed command body.
pub type Failure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn from_failure(command: &str, (error_class, message, exit_code): Failure) -> Self {
        Self::failure(command, error_class, message, exit_code)
    }
}

/// Serializes a command's data section; serialization failures surface as a
/// failed command rather than a panic.
pub(crate) fn to_data<T: Serialize>(value: &T) -> Result<Option<Value>, Failure> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|error| ("serialization", error.to_string(), 3u8))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::CommandResult;

    #[test]
    fn success_payload_omits_empty_data() {
        let result = CommandResult::success("migrate", "applied pending migrations");
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["status"], "ok");
        assert!(payload["error_class"].is_null());
        assert!(payload.get("data").is_none());
    }

    #[test]
    fn failure_payload_carries_class_and_code() {
        let result = CommandResult::failure("rules", "not_found", "rule 4 does not exist", 6);
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 6);
        assert_eq!(payload["error_class"], "not_found");
        assert_eq!(payload["message"], "rule 4 does not exist");
    }

    #[test]
    fn data_section_is_embedded_verbatim() {
        let result = CommandResult::success_with("recommend", "2 products", Some(json!([3, 4])));
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(payload["data"], json!([3, 4]));
    }
}
