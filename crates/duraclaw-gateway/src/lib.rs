//! DuraClaw Gateway — HTTP NDJSON chat server over the durable agent engine.

pub mod handler;
pub mod server;

pub use server::{start_gateway, ExtendedConfig, GatewayState};
