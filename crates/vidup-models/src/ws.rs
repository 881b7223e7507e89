//! Live-update channel messages.
//!
//! Status frames carry the job snapshot unchanged, so clients consume the
//! same shape over WebSocket and REST. Control frames are tagged with `type`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::JobSnapshot;

/// Message sent from server to a live-update client.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum WsMessage {
    /// Snapshot of the job after a change.
    Status(JobSnapshot),
    /// Control frame.
    Control(WsControl),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsControl {
    /// Reply to any client text frame.
    Pong { data: Value },
    /// The job id is unknown or was garbage-collected.
    Error { message: String },
}

impl WsMessage {
    pub fn pong(data: impl Into<Value>) -> Self {
        Self::Control(WsControl::Pong { data: data.into() })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Control(WsControl::Error {
            message: message.into(),
        })
    }
}

impl From<JobSnapshot> for WsMessage {
    fn from(snapshot: JobSnapshot) -> Self {
        Self::Status(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pong_shape() {
        let json = serde_json::to_value(WsMessage::pong("hello")).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["data"], "hello");
    }

    #[test]
    fn test_error_shape() {
        let json = serde_json::to_value(WsMessage::error("Job not found")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "Job not found");
    }
}
