//! Configuration structs shared by the agent and gateway crates.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

fn default_port() -> u16 {
    18789
}

fn default_max_tool_iterations() -> usize {
    10
}

/// Whether the HTTP listener binds loopback-only or to all interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(self, port: u16) -> SocketAddr {
        let ip = match self {
            BindMode::Loopback => IpAddr::V4(Ipv4Addr::LOCALHOST),
            BindMode::Lan => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        SocketAddr::new(ip, port)
    }
}

/// Top-level gateway process configuration, built from CLI flags in
/// `duraclaw-gateway::main`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: BindMode,
    pub workspace_root: Option<String>,
    pub system_prompt: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: BindMode::default(),
            workspace_root: None,
            system_prompt: None,
        }
    }
}

impl GatewayConfig {
    pub fn addr(&self) -> SocketAddr {
        self.bind.to_addr(self.port)
    }
}

/// Per-engine tunables, threaded from `GatewayConfig`/CLI into
/// `ChatEngine::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    pub default_model: String,
    pub system_prompt: Option<String>,
    /// Tool names with a client-side phase: the engine hands control to the
    /// client instead of executing them, and resumes on the next request's
    /// isomorphic client output.
    #[serde(default)]
    pub isomorphic_tools: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            default_model: "claude-opus-4-6-20250929".to_string(),
            system_prompt: None,
            isomorphic_tools: Vec::new(),
        }
    }
}

/// Grace period a detached reader's session survives before release, so a
/// client that reattaches immediately (e.g. a page reload) keeps its buffer.
pub const GRACE_DELAY: Duration = Duration::from_millis(120);

/// How long a tool session may sit in `awaiting_elicit` with no answer
/// before it's transitioned to `cancelled` with reason `timeout` and its
/// task aborted.
pub const ELICIT_TIMEOUT: Duration = Duration::from_secs(300);
