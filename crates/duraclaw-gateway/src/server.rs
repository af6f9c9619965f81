//! Gateway server: wires the durable chat engine up behind an axum `Router`.

use crate::handler::{chat_handler, health_handler};
use duraclaw_agent::{ChatEngine, PluginSessionManager, SessionRegistry};
use duraclaw_core::{EngineConfig, GatewayConfig};
use duraclaw_llm::ChatProvider;
use duraclaw_tools::{PluginToolRegistry, ToolRegistry};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub struct ExtendedConfig {
    pub gateway: GatewayConfig,
    pub engine: EngineConfig,
    pub anthropic_api_key: Option<String>,
}

impl Default for ExtendedConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            engine: EngineConfig::default(),
            anthropic_api_key: None,
        }
    }
}

/// Everything a request handler needs: the session registry (readers,
/// grace-delay release), the chat engine (the writer), and the plugin
/// session manager (elicit round-trips), all shared behind `Arc`.
pub struct GatewayState {
    pub sessions: Arc<SessionRegistry>,
    pub plugins: Arc<PluginSessionManager>,
    pub engine: Arc<ChatEngine>,
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build an Anthropic provider from `ANTHROPIC_API_KEY`/`ANTHROPIC_API_URL`.
/// Returns `None` (logging a warning, not aborting) if no key is configured
/// — the gateway still starts and serves `/health` and `/chat`, the latter
/// answering every turn with the "Provider not configured" error.
fn build_provider(config: &ExtendedConfig) -> Option<Arc<dyn ChatProvider>> {
    let api_key = config
        .anthropic_api_key
        .clone()
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());

    let Some(api_key) = api_key else {
        warn!("ANTHROPIC_API_KEY not set; /chat will answer with a configuration error until one is provided");
        return None;
    };

    if let Ok(api_url) = std::env::var("ANTHROPIC_API_URL") {
        let provider = duraclaw_llm::AnthropicProvider::new(&api_key).with_base_url(format!("{api_url}/v1/messages"));
        info!(%api_url, "using custom Anthropic API URL");
        Some(Arc::new(provider))
    } else {
        Some(Arc::new(duraclaw_llm::AnthropicProvider::new(&api_key)))
    }
}

pub async fn start_gateway(
    config: ExtendedConfig,
    tools: ToolRegistry,
    plugin_tools: PluginToolRegistry,
) -> anyhow::Result<()> {
    let provider = build_provider(&config);

    let sessions = Arc::new(SessionRegistry::new());
    let plugins = Arc::new(PluginSessionManager::new(Arc::new(plugin_tools), provider.clone()));
    let engine = Arc::new(ChatEngine::new(provider, Arc::new(tools), plugins.clone(), config.engine));

    let state = Arc::new(GatewayState { sessions, plugins, engine });
    let app = build_router(state);

    let addr: SocketAddr = config.gateway.addr();
    info!("DuraClaw Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", addr);
    info!("  POST /chat   start or resume a turn");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
