//! Tolerant NDJSON parser: unknown fields are ignored, unknown message types
//! come back as [`Message::Unknown`].

use serde_json::Value;

use super::types::*;
use crate::error::{Error, Result};

/// Parse a single NDJSON line from Claude's stdout.
pub fn parse_line(line: &str) -> Result<Message> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(&raw)
}

/// Parse a JSON value into a [`Message`].
pub fn parse_value(raw: &Value) -> Result<Message> {
    let msg_type = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::NdjsonParse("Missing 'type' field".into()))?;

    match msg_type {
        "system" if raw.get("subtype").and_then(|v| v.as_str()) != Some("init") => {
            Ok(Message::Unknown {
                msg_type: msg_type.to_string(),
                payload: raw.clone(),
            })
        }
        "system" => Ok(parse_system(raw)),
        "assistant" => Ok(parse_assistant(raw)),
        "result" => Ok(parse_result(raw)),
        _ => Ok(Message::Unknown {
            msg_type: msg_type.to_string(),
            payload: raw.clone(),
        }),
    }
}

fn str_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn parse_system(raw: &Value) -> Message {
    Message::SystemInit(SystemInit {
        session_id: str_field(raw, "session_id"),
        model: str_field(raw, "model"),
    })
}

fn parse_assistant(raw: &Value) -> Message {
    let msg = raw.get("message").unwrap_or(raw);
    let text = msg
        .get("content")
        .and_then(|v| v.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    Message::Assistant(AssistantMessage { text })
}

fn parse_result(raw: &Value) -> Message {
    let subtype = match raw.get("subtype").and_then(|v| v.as_str()) {
        Some("success") | None => ResultSubtype::Success,
        Some("error_max_turns") => ResultSubtype::ErrorMaxTurns,
        Some("error_during_execution") => ResultSubtype::ErrorDuringExecution,
        Some(other) => ResultSubtype::Unknown(other.to_string()),
    };

    Message::Result(SessionResult {
        subtype,
        is_error: raw
            .get("is_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        session_id: str_field(raw, "session_id"),
        duration_ms: raw.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0),
        num_turns: raw
            .get("num_turns")
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0),
        // Older CLI versions report `cost_usd` instead of `total_cost_usd`.
        cost_usd: raw
            .get("total_cost_usd")
            .or_else(|| raw.get("cost_usd"))
            .and_then(|v| v.as_f64()),
        result: raw
            .get("result")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}
