//! DuraClaw LLM - Provider adapters with streaming support

pub mod anthropic;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use provider::{ChatProvider, LlmError, LlmResult, LlmStream};
pub use types::*;
