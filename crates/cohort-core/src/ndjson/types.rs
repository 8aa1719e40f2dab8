//! Message types read from the Claude Code NDJSON stream.

use serde_json::Value;

/// Messages the group executor cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SystemInit(SystemInit),
    Assistant(AssistantMessage),
    Result(SessionResult),
    Unknown { msg_type: String, payload: Value },
}

/// `{"type":"system","subtype":"init",...}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInit {
    pub session_id: String,
    pub model: String,
}

/// Text blocks of an assistant turn. Tool-use blocks are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssistantMessage {
    pub text: Vec<String>,
}

impl AssistantMessage {
    pub fn joined(&self) -> String {
        self.text.join("\n")
    }
}

/// Final line of a run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionResult {
    pub subtype: ResultSubtype,
    pub is_error: bool,
    pub session_id: String,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub cost_usd: Option<f64>,
    /// Final answer text, or the error message for failed runs.
    pub result: Option<String>,
}

impl SessionResult {
    /// True when the run finished without error.
    pub fn succeeded(&self) -> bool {
        !self.is_error && self.subtype == ResultSubtype::Success
    }
}

/// `subtype` of a result line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResultSubtype {
    #[default]
    Success,
    ErrorMaxTurns,
    ErrorDuringExecution,
    Unknown(String),
}
