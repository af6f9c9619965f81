//! Durable chat HTTP protocol — NDJSON streaming.
//!
//! Wire format:
//!
//! Client → Server (`POST /chat`):
//!   Headers: `X-Session-Id: <opaque token>` (optional, resume), `X-Last-LSN:
//!   <uint64 decimal>` (optional, default 0, replay floor)
//!   Body:
//!   ```text
//!   { "messages": [{"role": "user"|"assistant"|"system"|"tool", "content": "...",
//!                    "tool_call_id"?, "tool_calls"? }],
//!     "enabledTools"?: bool | [string],
//!     "enabledPlugins"?: [string],
//!     "systemPrompt"?: string,
//!     "persona"?: string,
//!     "pluginElicitResponses"?: [{sessionId, callId, elicitId,
//!                                  result: {action, content?}}],
//!     "pluginAbort"?: {sessionId, reason?},
//!     "isomorphicClientOutputs"?: [{callId, toolName, params, clientOutput}] }
//!   ```
//!
//! Server → Client: `200 OK`, `Content-Type: application/x-ndjson`,
//! `Cache-Control: no-cache`, `X-Session-Id: <uuid>` (echoed or newly
//! minted). Body is a stream of newline-delimited JSON lines, one per
//! durable `Event`: `{"lsn":1,"timestamp":"...","event":{"type":"text",
//! "delta":"Hello"}}`.

use crate::event::Lsn;
use serde::{Deserialize, Serialize};

/// One entry of the request body's `messages` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessageBody {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<serde_json::Value>,
}

/// `enabledTools`: either a bool turning all server tools on/off, or an
/// explicit allowlist of tool names.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnabledTools {
    All(bool),
    Named(Vec<String>),
}

/// One entry of `pluginElicitResponses`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginElicitResponseEntry {
    pub session_id: String,
    pub call_id: String,
    pub elicit_id: String,
    pub result: ElicitResult,
}

/// `{action: "accept"|"decline"|"cancel", content?}`, the wire shape of an
/// elicit answer.
#[derive(Debug, Clone, Deserialize)]
pub struct ElicitResult {
    pub action: String,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

/// `pluginAbort`: cancels every plugin call on the named session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginAbortRequest {
    pub session_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One entry of `isomorphicClientOutputs`: the client-side result of a tool
/// whose server phase handed off with `isomorphic_handoff`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsomorphicClientOutputEntry {
    pub call_id: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub client_output: serde_json::Value,
}

/// Body of `POST /chat`, the single documented entry point: a turn may carry
/// any combination of a plugin abort, elicit answers, isomorphic outputs,
/// and new messages, processed in that order by the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    #[serde(default)]
    pub messages: Vec<ChatMessageBody>,
    #[serde(default)]
    pub enabled_tools: Option<EnabledTools>,
    #[serde(default)]
    pub enabled_plugins: Option<Vec<String>>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub plugin_elicit_responses: Option<Vec<PluginElicitResponseEntry>>,
    #[serde(default)]
    pub plugin_abort: Option<PluginAbortRequest>,
    #[serde(default)]
    pub isomorphic_client_outputs: Option<Vec<IsomorphicClientOutputEntry>>,
}

/// Parsed `X-Session-Id` / `X-Last-Lsn` request headers.
#[derive(Debug, Clone, Default)]
pub struct ResumeHeaders {
    pub session_id: Option<String>,
    pub last_lsn: Option<Lsn>,
}

/// Health-check response for `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
}

impl HealthResponse {
    pub fn healthy(sessions: usize) -> Self {
        Self {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            sessions,
        }
    }
}

/// Error body returned for non-2xx responses. Mirrors the teacher's
/// `RpcResponse::err` code/message pairing, adapted to a plain JSON error
/// object since there is no request id to correlate on this transport.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

impl ApiErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
