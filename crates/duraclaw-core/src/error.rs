//! Error types for DuraClaw

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("buffer closed for session {0}")]
    BufferClosed(String),

    #[error("stale reader: requested lsn {requested} below retained floor {floor}")]
    StaleReader { requested: u64, floor: u64 },

    #[error("elicit-not-pending: {session_id}/{call_id}/{elicit_id}")]
    ElicitNotPending {
        session_id: String,
        call_id: String,
        elicit_id: String,
    },

    #[error("max tool iterations exceeded: {0}")]
    MaxIterationsExceeded(usize),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("tool error: {name} - {message}")]
    ToolError { name: String, message: String },

    #[error("plugin error: {call_id} - {message}")]
    PluginError { call_id: String, message: String },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("llm error: {provider} - {message}")]
    LlmError { provider: String, message: String },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound(id.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn tool_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn plugin_error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginError {
            call_id: call_id.into(),
            message: message.into(),
        }
    }

    pub fn llm_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error is safe to surface as `error(recoverable=true)` on
    /// the chat stream rather than terminating the engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LlmError { .. })
    }
}
