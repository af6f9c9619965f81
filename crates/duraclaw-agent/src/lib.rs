//! DuraClaw Agent — durable buffer, session registry, tool sessions, plugin
//! session manager, and the chat engine phase machine.

pub mod buffer;
pub mod engine;
pub mod plugin_manager;
pub mod session;
pub mod tool_session;

pub use buffer::DurableBuffer;
pub use engine::{
    ChatEngine, IsomorphicOutputEntry, PluginAbortInput, PluginElicitAnswer, TurnInput, TurnMessage,
};
pub use plugin_manager::PluginSessionManager;
pub use session::{DurableSession, SessionId, SessionRegistry};
pub use tool_session::{ToolSession, ToolSessionStatus};
