//! Durable chat HTTP handlers — the single `POST /chat` entry point,
//! streaming the session's durable buffer back as NDJSON.

use crate::server::GatewayState;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use duraclaw_agent::{
    DurableSession, IsomorphicOutputEntry, PluginAbortInput, PluginElicitAnswer, TurnInput, TurnMessage,
};
use duraclaw_core::{ChatRequestBody, ElicitResult, HealthResponse, Lsn, ResumeHeaders};
use duraclaw_tools::ElicitResponse;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};

const SESSION_ID_HEADER: &str = "x-session-id";
const LAST_LSN_HEADER: &str = "x-last-lsn";

fn parse_resume_headers(headers: &HeaderMap) -> ResumeHeaders {
    ResumeHeaders {
        session_id: headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string),
        last_lsn: headers
            .get(LAST_LSN_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Lsn),
    }
}

/// `{action: "accept"|"decline"|"cancel", content?}` into the engine's
/// `ElicitResponse`.
fn elicit_response_from_result(result: ElicitResult) -> ElicitResponse {
    match result.action.as_str() {
        "accept" => ElicitResponse::Value(result.content.unwrap_or(serde_json::Value::Null)),
        "decline" => ElicitResponse::Error(
            result
                .content
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "declined".to_string()),
        ),
        _ => ElicitResponse::Cancelled,
    }
}

fn turn_input_from_body(body: ChatRequestBody) -> TurnInput {
    TurnInput {
        messages: body
            .messages
            .into_iter()
            .map(|m| TurnMessage {
                role: m.role,
                content: m.content,
                tool_call_id: m.tool_call_id,
                tool_calls: m.tool_calls,
            })
            .collect(),
        model: None,
        persona: body.persona,
        system_prompt: body.system_prompt,
        enabled_tools: body.enabled_tools,
        enabled_plugins: body.enabled_plugins,
        plugin_abort: body.plugin_abort.map(|a| PluginAbortInput { reason: a.reason }),
        plugin_elicit_responses: body
            .plugin_elicit_responses
            .unwrap_or_default()
            .into_iter()
            .map(|e| PluginElicitAnswer {
                call_id: e.call_id,
                elicit_id: e.elicit_id,
                response: elicit_response_from_result(e.result),
            })
            .collect(),
        isomorphic_client_outputs: body
            .isomorphic_client_outputs
            .unwrap_or_default()
            .into_iter()
            .map(|e| IsomorphicOutputEntry { call_id: e.call_id, output: e.client_output })
            .collect(),
    }
}

/// Stream a session's buffer from `from_lsn` as NDJSON, attaching/detaching
/// the registry's reader ref count around the stream's lifetime.
fn stream_session(state: Arc<GatewayState>, session: Arc<DurableSession>, from_lsn: Lsn) -> Response {
    let session_id = session.id.clone();
    state.sessions.attach_reader(&session);

    let registry = state.sessions.clone();
    let buffer = session.buffer.clone();
    let body_stream = async_stream::stream! {
        let mut events = buffer.replay(from_lsn);
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(mut line) => {
                    line.push('\n');
                    yield Ok::<_, std::io::Error>(line.into_bytes());
                }
                Err(error) => {
                    warn!(%error, "failed to serialize durable event");
                }
            }
        }
        registry.detach_reader(session);
    };

    let mut response = Response::new(Body::from_stream(body_stream));
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/x-ndjson"));
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert("x-session-id", value);
    }
    response
}

/// `POST /chat` — the single documented entry point. Starts a new turn, or
/// resumes a live session named by `X-Session-Id` (replaying from
/// `X-Last-Lsn` onward). The body may carry any combination of new
/// messages, a plugin abort, elicit answers, and isomorphic client outputs;
/// the engine processes all of them in one pass before streaming continues.
pub async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Response {
    let resume = parse_resume_headers(&headers);
    let from_lsn = resume.last_lsn.unwrap_or(Lsn::SENTINEL);
    let existing = resume.session_id.as_deref().and_then(|id| state.sessions.get(id));

    let persona = body.persona.clone();
    let session = existing.unwrap_or_else(|| state.sessions.create(persona));
    info!(session_id = %session.id, "dispatching chat turn");

    let turn_input = turn_input_from_body(body);
    let engine = state.engine.clone();
    let run_session = session.clone();
    tokio::spawn(async move {
        engine.run(run_session, turn_input).await;
    });

    stream_session(state, session, from_lsn)
}

pub async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(HealthResponse::healthy(state.sessions.len()))
}
