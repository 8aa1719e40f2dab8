//! Reader for the `claude --output-format stream-json` NDJSON stream.
//!
//! A group session only needs three things from the stream: the Claude
//! session id, the final result (success flag and cost), and enough
//! assistant text to explain a failure. Everything else is surfaced as
//! [`Message::Unknown`] and ignored by callers.

mod parser;
mod types;

pub use parser::{parse_line, parse_value};
pub use types::*;
