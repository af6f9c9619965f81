//! DuraClaw Gateway — durable streaming chat server

use clap::Parser;
use duraclaw_core::{BindMode, EngineConfig, GatewayConfig};
use duraclaw_gateway::{start_gateway, ExtendedConfig};
use duraclaw_tools::{PluginToolRegistry, ToolRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "duraclaw-gateway", about = "DuraClaw durable chat gateway")]
struct Cli {
    #[arg(short, long, default_value = "18789")]
    port: u16,
    #[arg(short, long, default_value = "lan")]
    bind: String,
    #[arg(short, long)]
    model: Option<String>,
    #[arg(long)]
    system_prompt: Option<String>,
    #[arg(long, default_value = "10")]
    max_tool_iterations: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "duraclaw=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_mode = match cli.bind.as_str() {
        "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
        _ => BindMode::Lan,
    };

    let engine_config = EngineConfig {
        max_tool_iterations: cli.max_tool_iterations,
        default_model: cli.model.unwrap_or_else(|| "claude-opus-4-6-20250929".to_string()),
        system_prompt: cli.system_prompt.or_else(|| std::env::var("DURACLAW_SYSTEM_PROMPT").ok()),
        isomorphic_tools: Vec::new(),
    };

    let config = ExtendedConfig {
        gateway: GatewayConfig {
            port: cli.port,
            bind: bind_mode,
            workspace_root: None,
            system_prompt: engine_config.system_prompt.clone(),
        },
        engine: engine_config,
        anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
    };

    start_gateway(config, ToolRegistry::new(), PluginToolRegistry::new()).await
}
