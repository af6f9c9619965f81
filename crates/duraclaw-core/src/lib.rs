//! DuraClaw Core - durable event types, wire protocol, configuration, errors

pub mod config;
pub mod error;
pub mod event;
pub mod protocol;

pub use config::{BindMode, EngineConfig, GatewayConfig, ELICIT_TIMEOUT, GRACE_DELAY};
pub use error::{Error, Result};
pub use event::{Event, EventPayload, Lsn, ToolCallInfo, Usage};
pub use protocol::*;
