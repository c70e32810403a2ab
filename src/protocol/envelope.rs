// src/protocol/envelope.rs - Outbound JSON envelopes
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::CommandError;

/// Identifies this host implementation to the orchestrator.
pub const CLIENT_TYPE: &str = "bambu";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Status,
    Response,
    Success,
    Error,
}

/// An outbound message. The timestamp is not stored; it is stamped when the
/// envelope is encoded for sending.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: MessageType,
    pub printer_id: String,
    pub command: String,
    pub data: Value,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    timestamp: String,
    printer_id: &'a str,
    client_type: &'static str,
    command: &'a str,
    data: &'a Value,
}

impl Envelope {
    pub fn status(printer_id: impl Into<String>, command: impl Into<String>, data: Value) -> Self {
        Self { kind: MessageType::Status, printer_id: printer_id.into(), command: command.into(), data }
    }

    pub fn response(printer_id: impl Into<String>, command: impl Into<String>, data: Value) -> Self {
        Self { kind: MessageType::Response, printer_id: printer_id.into(), command: command.into(), data }
    }

    pub fn success(
        printer_id: impl Into<String>,
        local_command: &str,
        command: impl Into<String>,
        action_detail: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageType::Success,
            printer_id: printer_id.into(),
            command: command.into(),
            data: json!({
                "local_command": local_command,
                "action_detail": action_detail.into(),
                "success": true,
            }),
        }
    }

    pub fn error(
        printer_id: impl Into<String>,
        local_command: &str,
        command: impl Into<String>,
        error: &CommandError,
    ) -> Self {
        Self {
            kind: MessageType::Error,
            printer_id: printer_id.into(),
            command: command.into(),
            data: json!({
                "local_command": local_command,
                "error_detail": error.to_string(),
                "error_kind": error.kind(),
                "success": false,
            }),
        }
    }

    /// Serialize with the current time.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        self.encode_at(Utc::now())
    }

    pub fn encode_at(&self, now: DateTime<Utc>) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireEnvelope {
            kind: self.kind,
            timestamp: timestamp(now),
            printer_id: &self.printer_id,
            client_type: CLIENT_TYPE,
            command: &self.command,
            data: &self.data,
        })
    }
}

/// ISO-8601 UTC with a trailing `Z`, second precision.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
