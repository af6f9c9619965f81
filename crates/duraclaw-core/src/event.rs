//! LSN clock and the durable event log's wire-level record shape.
//!
//! Mirrors the tagged-enum convention `StreamDelta` uses in the LLM crate:
//! one Rust variant per wire `type`, `#[serde(tag = "type")]` keeping the
//! discriminator on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic per-session Log Sequence Number. LSN 0 is a sentinel and is
/// never assigned by `DurableBuffer::append`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const SENTINEL: Lsn = Lsn(0);

    pub fn next(self) -> Lsn {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Lsn {
    fn from(v: u64) -> Self {
        Lsn(v)
    }
}

/// A single durable record: an LSN-stamped, timestamped payload. The wire
/// form nests the payload under an `event` key rather than flattening it, so
/// a line on the NDJSON stream reads `{"lsn":1,"timestamp":"...","event":
/// {"type":"text","delta":"Hello"}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub lsn: Lsn,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event: EventPayload,
}

/// A tool call the provider asked the engine to dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Final usage counters attached to a `complete` event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Tagged payload variants. `type` is the wire discriminator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    SessionInfo {
        persona: Option<String>,
        capabilities: serde_json::Value,
    },
    Text {
        delta: String,
    },
    Thinking {
        delta: String,
    },
    ToolCalls {
        calls: Vec<ToolCallInfo>,
    },
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
    ToolError {
        call_id: String,
        name: String,
        message: String,
    },
    PluginElicitRequest {
        session_id: String,
        call_id: String,
        elicit_id: String,
        tool_name: String,
        key: String,
        message: String,
        schema: serde_json::Value,
    },
    IsomorphicHandoff {
        call_id: String,
        tool_name: String,
        params: serde_json::Value,
    },
    Complete {
        text: String,
        usage: Usage,
    },
    Error {
        message: String,
        recoverable: bool,
    },
}

impl EventPayload {
    /// Whether this payload terminates the engine's current writer (spec.md
    /// §4.3's "terminal for this request" phases).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::Complete { .. }
                | EventPayload::Error { .. }
                | EventPayload::IsomorphicHandoff { .. }
                | EventPayload::PluginElicitRequest { .. }
        )
    }
}
