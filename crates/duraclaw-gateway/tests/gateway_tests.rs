//! End-to-end tests over the HTTP layer: a chat turn, a plugin elicit round
//! trip across separate requests to the single `/chat` endpoint, and the
//! missing-provider configuration error surfacing through NDJSON.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use duraclaw_agent::{ChatEngine, PluginSessionManager, SessionRegistry};
use duraclaw_core::{EngineConfig, Event};
use duraclaw_gateway::server::{build_router, GatewayState};
use duraclaw_llm::{ChatProvider, LlmRequest, LlmResult, LlmStream, StreamDelta};
use duraclaw_tools::{ElicitResponse, PluginContext, PluginTool, PluginToolRegistry, ToolRegistry};
use futures::stream;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct MockProvider {
    turns: Mutex<VecDeque<Vec<StreamDelta>>>,
}

impl MockProvider {
    fn new(turns: Vec<Vec<StreamDelta>>) -> Self {
        Self { turns: Mutex::new(turns.into_iter().collect()) }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn models(&self) -> &[&str] {
        &["mock-model"]
    }
    async fn complete_stream(&self, _request: LlmRequest, _cancel: Option<CancellationToken>) -> LlmResult<LlmStream> {
        let deltas = self.turns.lock().unwrap().pop_front().unwrap_or_default();
        let items: Vec<LlmResult<StreamDelta>> = deltas.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

fn done(stop_reason: &str) -> StreamDelta {
    StreamDelta::Done { stop_reason: Some(stop_reason.to_string()), usage: None }
}

struct BookFlightPlugin;

#[async_trait]
impl PluginTool for BookFlightPlugin {
    fn name(&self) -> &str {
        "book_flight"
    }
    fn description(&self) -> &str {
        "Books a flight"
    }
    fn input_schema(&self) -> Value {
        json!({})
    }
    async fn run(&self, ctx: PluginContext) -> Result<Value, String> {
        let flight = ctx.elicit("pickFlight", "Which flight?", json!({"type": "string"})).await;
        match flight {
            ElicitResponse::Value(v) => Ok(json!({"flight": v})),
            _ => Err("cancelled".to_string()),
        }
    }
}

fn state_with(provider: Option<MockProvider>, plugins: PluginToolRegistry) -> Arc<GatewayState> {
    let provider: Option<Arc<dyn ChatProvider>> = provider.map(|p| Arc::new(p) as Arc<dyn ChatProvider>);
    let plugin_manager = Arc::new(PluginSessionManager::new(Arc::new(plugins), provider.clone()));
    Arc::new(GatewayState {
        sessions: Arc::new(SessionRegistry::new()),
        plugins: plugin_manager.clone(),
        engine: Arc::new(ChatEngine::new(provider, Arc::new(ToolRegistry::new()), plugin_manager, EngineConfig::default())),
    })
}

fn chat_body(text: &str) -> Body {
    Body::from(json!({"messages": [{"role": "user", "content": text}]}).to_string())
}

async fn parse_ndjson(response: axum::response::Response) -> Vec<Event> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn chat_endpoint_streams_session_info_text_and_complete() {
    let provider = MockProvider::new(vec![vec![StreamDelta::Text("hi there".to_string()), done("end_turn")]]);
    let state = state_with(Some(provider), PluginToolRegistry::new());
    let router = build_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(chat_body("hello"))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-session-id"));

    let events = parse_ndjson(response).await;
    assert!(!events.is_empty());
    assert!(matches!(events.last().unwrap().event, duraclaw_core::EventPayload::Complete { .. }));
}

#[tokio::test]
async fn health_endpoint_reports_session_count() {
    let provider = MockProvider::new(vec![]);
    let state = state_with(Some(provider), PluginToolRegistry::new());
    let router = build_router(state);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn elicit_round_trip_over_http() {
    let provider = MockProvider::new(vec![
        vec![
            StreamDelta::ToolCallStart { id: "call-1".to_string(), name: "book_flight".to_string() },
            StreamDelta::ToolCallEnd { id: "call-1".to_string() },
            done("tool_use"),
        ],
        vec![StreamDelta::Text("booked".to_string()), done("end_turn")],
    ]);
    let mut plugins = PluginToolRegistry::new();
    plugins.register(BookFlightPlugin);
    let state = state_with(Some(provider), plugins);
    let router = build_router(state);

    let chat_request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(chat_body("book it"))
        .unwrap();
    let chat_response = router.clone().oneshot(chat_request).await.unwrap();
    let session_id = chat_response.headers().get("x-session-id").unwrap().to_str().unwrap().to_string();
    let events = parse_ndjson(chat_response).await;

    let (call_id, elicit_id) = events
        .iter()
        .find_map(|e| match &e.event {
            duraclaw_core::EventPayload::PluginElicitRequest { call_id, elicit_id, .. } => {
                Some((call_id.clone(), elicit_id.clone()))
            }
            _ => None,
        })
        .expect("expected a plugin elicit request");

    let answer_body = json!({
        "pluginElicitResponses": [{
            "sessionId": session_id,
            "callId": call_id,
            "elicitId": elicit_id,
            "result": {"action": "accept", "content": "FL001"},
        }]
    });
    let answer_request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .header("x-session-id", session_id.clone())
        .body(Body::from(answer_body.to_string()))
        .unwrap();
    let answer_response = router.oneshot(answer_request).await.unwrap();
    assert_eq!(answer_response.status(), StatusCode::OK);

    let events2 = parse_ndjson(answer_response).await;
    assert!(matches!(events2.last().unwrap().event, duraclaw_core::EventPayload::Complete { .. }));
}

#[tokio::test]
async fn elicit_response_for_unknown_call_surfaces_as_error_event() {
    let provider = MockProvider::new(vec![]);
    let state = state_with(Some(provider), PluginToolRegistry::new());
    let router = build_router(state);

    let session_id = new_session(&router).await;
    let answer_body = json!({
        "pluginElicitResponses": [{
            "sessionId": session_id,
            "callId": "nonexistent",
            "elicitId": "nonexistent",
            "result": {"action": "accept", "content": "x"},
        }]
    });
    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .header("x-session-id", session_id)
        .body(Body::from(answer_body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = parse_ndjson(response).await;
    assert!(events.iter().any(|e| matches!(e.event, duraclaw_core::EventPayload::Error { .. })));
}

#[tokio::test]
async fn missing_provider_yields_one_error_then_complete() {
    let state = state_with(None, PluginToolRegistry::new());
    let router = build_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(chat_body("hello"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = parse_ndjson(response).await;
    let error_events: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.event, duraclaw_core::EventPayload::Error { .. }))
        .collect();
    assert_eq!(error_events.len(), 1);
    let duraclaw_core::EventPayload::Error { message, recoverable } = &error_events[0].event else {
        unreachable!()
    };
    assert!(message.contains("Provider not configured"));
    assert!(!recoverable);
    assert!(matches!(events.last().unwrap().event, duraclaw_core::EventPayload::Complete { .. }));
}

async fn new_session(router: &axum::Router) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(chat_body("hello"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let session_id = response.headers().get("x-session-id").unwrap().to_str().unwrap().to_string();
    let _ = parse_ndjson(response).await;
    session_id
}
