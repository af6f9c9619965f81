//! The chat engine: a phase machine driving provider streaming, tool
//! execution, and elicit suspension for a single durable session.
//!
//! `ChatEngine::run` is the writer side of a session — at most one instance
//! runs against a given session's buffer at a time, grounded on
//! `AgentRuntime::run_turn_cancellable`'s `tokio::select!`-driven stream
//! consumption loop, generalized with a phase enum because a turn here can
//! suspend for an elicit or an isomorphic handoff instead of always running
//! to completion.

use crate::plugin_manager::PluginSessionManager;
use crate::session::DurableSession;
use duraclaw_core::{EnabledTools, EngineConfig, EventPayload, Lsn, ToolCallInfo, Usage};
use duraclaw_llm::{
    validate_and_heal_messages, AccumulatedToolCall, ChatProvider, LlmError, LlmRequest, LlmTool, StreamDelta,
};
use duraclaw_tools::{ElicitResponse, PluginEvent, ToolRegistry};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One entry of `TurnInput::messages`, mirroring the wire body's
/// per-message shape without depending on the protocol crate.
pub struct TurnMessage {
    pub role: String,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Value>,
}

/// One entry of `TurnInput::plugin_elicit_responses`.
pub struct PluginElicitAnswer {
    pub call_id: String,
    pub elicit_id: String,
    pub response: ElicitResponse,
}

/// `TurnInput::plugin_abort`: cancels every plugin call on the session.
pub struct PluginAbortInput {
    pub reason: Option<String>,
}

/// One entry of `TurnInput::isomorphic_client_outputs`.
pub struct IsomorphicOutputEntry {
    pub call_id: String,
    pub output: Value,
}

/// One call to `ChatEngine::run`. A single turn may carry any combination
/// of a plugin abort, elicit answers, isomorphic outputs, and new messages
/// — all of the durable chat handler's single `/chat` endpoint can produce
/// in one request — processed in the phase-table order `process_plugin_abort
/// -> process_plugin_responses -> process_client_outputs -> start_iteration`.
#[derive(Default)]
pub struct TurnInput {
    pub messages: Vec<TurnMessage>,
    pub model: Option<String>,
    pub persona: Option<String>,
    pub system_prompt: Option<String>,
    pub enabled_tools: Option<EnabledTools>,
    pub enabled_plugins: Option<Vec<String>>,
    pub plugin_abort: Option<PluginAbortInput>,
    pub plugin_elicit_responses: Vec<PluginElicitAnswer>,
    pub isomorphic_client_outputs: Vec<IsomorphicOutputEntry>,
}

enum StreamOutcome {
    Complete { text: String, usage: Usage },
    ToolCalls(Vec<ToolCallInfo>),
    Error { message: String, recoverable: bool },
}

enum ExecOutcome {
    ToolsComplete,
    HandoffPending,
    PluginAwaitingElicit,
}

enum PluginOutcome {
    AwaitingElicit,
    Resolved,
}

pub struct ChatEngine {
    provider: Option<Arc<dyn ChatProvider>>,
    tools: Arc<ToolRegistry>,
    plugins: Arc<PluginSessionManager>,
    config: EngineConfig,
}

impl ChatEngine {
    pub fn new(
        provider: Option<Arc<dyn ChatProvider>>,
        tools: Arc<ToolRegistry>,
        plugins: Arc<PluginSessionManager>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            plugins,
            config,
        }
    }

    /// Drive one turn of the session to its next terminal or suspension
    /// point. Runs as the session's writer: on return, `writerDone` is set
    /// and the buffer is closed.
    pub async fn run(&self, session: Arc<DurableSession>, input: TurnInput) {
        session.mark_writer_active();
        session.buffer.reopen();

        if session.buffer.tail_lsn() == Lsn::SENTINEL {
            self.append(
                &session,
                EventPayload::SessionInfo {
                    persona: session.persona.read().await.clone(),
                    capabilities: serde_json::json!({
                        "tools": self.tools.list(),
                        "plugins": self.plugins.tool_names(),
                    }),
                },
            );
        }

        let outcome = self.process_input(&session, input).await;

        if outcome.is_some() {
            self.finish(&session);
            return;
        }

        let Some(provider) = self.provider.clone() else {
            // spec.md error kind 2: a configuration error (no provider) is a
            // single error event followed by complete, not a silently
            // dropped turn.
            self.emit_error(&session, "Provider not configured", false);
            self.append(&session, EventPayload::Complete { text: String::new(), usage: Usage::default() });
            self.finish(&session);
            return;
        };

        self.run_iterations(&session, &provider).await;
    }

    /// `process_plugin_abort` → `process_plugin_responses` →
    /// `process_client_outputs` → apply persona/model/system-prompt/allowlist
    /// overrides and append new messages, all folded into one dispatch over
    /// the single `TurnInput` this engine instance was given. Returns `Some`
    /// if the input itself resolved to a terminal phase (e.g. answering an
    /// elicit immediately re-suspends on another).
    async fn process_input(&self, session: &Arc<DurableSession>, input: TurnInput) -> Option<ExecOutcome> {
        if let Some(abort) = input.plugin_abort {
            debug!(session_id = %session.id, reason = ?abort.reason, "processing plugin abort");
            self.plugins.abort_session(&session.id);
        }

        for answer in input.plugin_elicit_responses {
            let tool_name = self.plugins.tool_name(&answer.call_id).unwrap_or_default();
            match self.plugins.respond_to_elicit(&answer.call_id, &answer.elicit_id, answer.response) {
                Ok(()) => {
                    let event = self.plugins.drive_next_event(&answer.call_id).await;
                    if let PluginOutcome::AwaitingElicit =
                        self.handle_plugin_event(session, &answer.call_id, &tool_name, event).await
                    {
                        return Some(ExecOutcome::PluginAwaitingElicit);
                    }
                }
                Err(reason) => {
                    self.emit_error(
                        session,
                        format!("elicit response rejected for {}: {reason}", answer.call_id),
                        true,
                    );
                }
            }
        }

        for entry in input.isomorphic_client_outputs {
            let tool_name = session
                .take_isomorphic_tool_name(&entry.call_id)
                .await
                .unwrap_or_else(|| "unknown".to_string());
            let content = entry.output.to_string();
            self.append(
                session,
                EventPayload::ToolResult { call_id: entry.call_id.clone(), name: tool_name, content: content.clone() },
            );
            session.push_tool_result(entry.call_id, content, false).await;
        }

        if let Some(model) = input.model {
            *session.model.write().await = Some(model);
        }
        if let Some(persona) = input.persona {
            *session.persona.write().await = Some(persona);
        }
        if let Some(system_prompt) = input.system_prompt {
            *session.system_prompt.write().await = Some(system_prompt);
        }
        if let Some(enabled_tools) = input.enabled_tools {
            *session.enabled_tools.write().await = Some(enabled_tools);
        }
        if let Some(enabled_plugins) = input.enabled_plugins {
            *session.enabled_plugins.write().await = Some(enabled_plugins);
        }
        for message in input.messages {
            session.push_message(message).await;
        }

        None
    }

    async fn run_iterations(&self, session: &Arc<DurableSession>, provider: &Arc<dyn ChatProvider>) {
        let mut iteration = 0usize;
        loop {
            if iteration >= self.config.max_tool_iterations {
                self.emit_error(session, "max tool iterations exceeded", false);
                break;
            }
            iteration += 1;

            match self.streaming_provider(session, provider).await {
                StreamOutcome::Complete { text, usage } => {
                    info!(session_id = %session.id, chars = text.len(), "turn complete");
                    self.append(session, EventPayload::Complete { text, usage });
                    break;
                }
                StreamOutcome::ToolCalls(calls) => match self.executing_tools(session, calls).await {
                    ExecOutcome::ToolsComplete => {
                        debug!(session_id = %session.id, "tool calls executed, continuing loop");
                        continue;
                    }
                    ExecOutcome::HandoffPending | ExecOutcome::PluginAwaitingElicit => break,
                },
                StreamOutcome::Error { message, recoverable } => {
                    warn!(session_id = %session.id, %message, recoverable, "provider error");
                    self.emit_error(session, message, recoverable);
                    break;
                }
            }
        }

        self.finish(session);
    }

    fn finish(&self, session: &Arc<DurableSession>) {
        session.mark_writer_done();
        session.buffer.close();
    }

    async fn streaming_provider(&self, session: &Arc<DurableSession>, provider: &Arc<dyn ChatProvider>) -> StreamOutcome {
        let model = session
            .model
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        let messages = validate_and_heal_messages(&session.messages.read().await);

        let enabled_tools = session.enabled_tools.read().await.clone();
        let enabled_plugins = session.enabled_plugins.read().await.clone();

        let mut tool_defs: Vec<LlmTool> = match &enabled_tools {
            Some(EnabledTools::All(false)) => Vec::new(),
            Some(EnabledTools::Named(names)) => self
                .tools
                .get_definitions()
                .into_iter()
                .filter(|t| names.iter().any(|n| n == &t.name))
                .collect(),
            Some(EnabledTools::All(true)) | None => self.tools.get_definitions(),
        };
        let plugin_defs: Vec<LlmTool> = match &enabled_plugins {
            Some(names) => self
                .plugins
                .tool_definitions()
                .into_iter()
                .filter(|t| names.iter().any(|n| n == &t.name))
                .collect(),
            None => self.plugins.tool_definitions(),
        };
        tool_defs.extend(plugin_defs);

        let system = session
            .system_prompt
            .read()
            .await
            .clone()
            .or_else(|| self.config.system_prompt.clone());

        let request = LlmRequest {
            model,
            messages,
            tools: if tool_defs.is_empty() { None } else { Some(tool_defs) },
            system,
            ..Default::default()
        };

        let mut stream = match provider.complete_stream(request, Some(session.abort.clone())).await {
            Ok(stream) => stream,
            Err(error) => return StreamOutcome::Error { message: error.to_string(), recoverable: is_recoverable(&error) },
        };

        let mut text = String::new();
        let mut usage = Usage::default();
        let mut tool_calls: Vec<AccumulatedToolCall> = Vec::new();

        while let Some(delta) = stream.next().await {
            match delta {
                Ok(StreamDelta::Thinking(chunk)) => {
                    if !chunk.is_empty() {
                        self.append(session, EventPayload::Thinking { delta: chunk });
                    }
                }
                Ok(StreamDelta::Text(chunk)) => {
                    if !chunk.is_empty() {
                        self.append(session, EventPayload::Text { delta: chunk.clone() });
                        text.push_str(&chunk);
                    }
                }
                Ok(StreamDelta::ToolCallStart { id, name }) => {
                    tool_calls.push(AccumulatedToolCall { id, name, arguments: String::new() });
                }
                Ok(StreamDelta::ToolCallDelta { id, arguments }) => {
                    if let Some(call) = tool_calls.iter_mut().find(|c| c.id == id) {
                        call.arguments.push_str(&arguments);
                    }
                }
                Ok(StreamDelta::ToolCallEnd { .. }) => {}
                Ok(StreamDelta::Done { usage: u, .. }) => {
                    if let Some(u) = u {
                        usage = Usage { input_tokens: u.input_tokens, output_tokens: u.output_tokens };
                    }
                }
                Ok(StreamDelta::Error(message)) => return StreamOutcome::Error { message, recoverable: true },
                Err(error) => {
                    return StreamOutcome::Error { message: error.to_string(), recoverable: is_recoverable(&error) }
                }
            }
        }

        if tool_calls.is_empty() {
            session.push_assistant_text(text.clone()).await;
            StreamOutcome::Complete { text, usage }
        } else {
            let infos: Vec<ToolCallInfo> = tool_calls
                .iter()
                .map(|call| ToolCallInfo {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.parse_arguments().unwrap_or(Value::Null),
                })
                .collect();
            self.append(session, EventPayload::ToolCalls { calls: infos.clone() });
            session
                .push_assistant_with_tools(if text.is_empty() { None } else { Some(text) }, &infos)
                .await;
            StreamOutcome::ToolCalls(infos)
        }
    }

    /// Whether `name` is permitted by this session's current allowlist.
    async fn tool_permitted(&self, session: &Arc<DurableSession>, name: &str, is_plugin: bool) -> bool {
        if is_plugin {
            match &*session.enabled_plugins.read().await {
                Some(names) => names.iter().any(|n| n == name),
                None => true,
            }
        } else {
            match &*session.enabled_tools.read().await {
                Some(EnabledTools::All(allowed)) => *allowed,
                Some(EnabledTools::Named(names)) => names.iter().any(|n| n == name),
                None => true,
            }
        }
    }

    async fn executing_tools(&self, session: &Arc<DurableSession>, calls: Vec<ToolCallInfo>) -> ExecOutcome {
        for call in &calls {
            if self.config.isomorphic_tools.iter().any(|name| name == &call.name) {
                session.record_isomorphic_handoff(call.id.clone(), call.name.clone()).await;
                self.append(
                    session,
                    EventPayload::IsomorphicHandoff {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        params: call.arguments.clone(),
                    },
                );
                return ExecOutcome::HandoffPending;
            }
        }

        for call in calls {
            let is_plugin = self.plugins.has_tool(&call.name);
            if !self.tool_permitted(session, &call.name, is_plugin).await {
                let message = format!("tool '{}' is not enabled for this request", call.name);
                self.append(
                    session,
                    EventPayload::ToolError { call_id: call.id.clone(), name: call.name.clone(), message: message.clone() },
                );
                session.push_tool_result(call.id.clone(), message, true).await;
                continue;
            }

            if is_plugin {
                self.plugins
                    .launch(session.id.clone(), call.id.clone(), call.name.clone(), call.arguments.clone());
                let event = self.plugins.drive_next_event(&call.id).await;
                if let PluginOutcome::AwaitingElicit =
                    self.handle_plugin_event(session, &call.id, &call.name, event).await
                {
                    return ExecOutcome::PluginAwaitingElicit;
                }
                continue;
            }

            let result = self
                .tools
                .execute_cancellable(&call.name, call.arguments.clone(), session.abort.clone())
                .await;
            let is_error = result.is_error();
            let content = result.to_content_string();
            if is_error {
                self.append(
                    session,
                    EventPayload::ToolError { call_id: call.id.clone(), name: call.name.clone(), message: content.clone() },
                );
            } else {
                self.append(
                    session,
                    EventPayload::ToolResult { call_id: call.id.clone(), name: call.name.clone(), content: content.clone() },
                );
            }
            session.push_tool_result(call.id.clone(), content, is_error).await;
        }

        ExecOutcome::ToolsComplete
    }

    async fn handle_plugin_event(
        &self,
        session: &Arc<DurableSession>,
        call_id: &str,
        tool_name: &str,
        event: Option<PluginEvent>,
    ) -> PluginOutcome {
        match event {
            Some(PluginEvent::Elicit(request)) => {
                let elicit_id = request.elicit_id.clone();
                self.plugins.record_elicit(call_id, elicit_id.clone(), request.respond_to);
                self.append(
                    session,
                    EventPayload::PluginElicitRequest {
                        session_id: session.id.clone(),
                        call_id: call_id.to_string(),
                        elicit_id,
                        tool_name: tool_name.to_string(),
                        key: request.key,
                        message: request.message,
                        schema: request.schema,
                    },
                );
                PluginOutcome::AwaitingElicit
            }
            Some(PluginEvent::Sample(..)) => {
                // Resolved inside `PluginSessionManager::drive_next_event`
                // before it ever reaches here; a `Sample` leaking out this
                // far means the manager is broken, not that the engine has
                // something sensible to do with it.
                warn!(session_id = %session.id, %call_id, "unexpected unresolved sample request");
                self.plugins.mark_failed(call_id);
                let message = "plugin sample request was not resolved".to_string();
                self.append(
                    session,
                    EventPayload::ToolError { call_id: call_id.to_string(), name: tool_name.to_string(), message: message.clone() },
                );
                session.push_tool_result(call_id.to_string(), message, true).await;
                PluginOutcome::Resolved
            }
            Some(PluginEvent::Done(value)) => {
                self.plugins.mark_completed(call_id);
                let content = value.to_string();
                self.append(
                    session,
                    EventPayload::ToolResult { call_id: call_id.to_string(), name: tool_name.to_string(), content: content.clone() },
                );
                session.push_tool_result(call_id.to_string(), content, false).await;
                PluginOutcome::Resolved
            }
            Some(PluginEvent::Failed(message)) => {
                self.plugins.mark_failed(call_id);
                self.append(
                    session,
                    EventPayload::ToolError { call_id: call_id.to_string(), name: tool_name.to_string(), message: message.clone() },
                );
                session.push_tool_result(call_id.to_string(), message, true).await;
                PluginOutcome::Resolved
            }
            None => {
                self.plugins.mark_failed(call_id);
                let message = "plugin task ended without a result".to_string();
                self.append(
                    session,
                    EventPayload::ToolError { call_id: call_id.to_string(), name: tool_name.to_string(), message: message.clone() },
                );
                session.push_tool_result(call_id.to_string(), message, true).await;
                PluginOutcome::Resolved
            }
        }
    }

    fn append(&self, session: &Arc<DurableSession>, payload: EventPayload) {
        if let Err(error) = session.buffer.append(payload) {
            warn!(session_id = %session.id, %error, "dropped event: buffer already closed");
        }
    }

    fn emit_error(&self, session: &Arc<DurableSession>, message: impl Into<String>, recoverable: bool) {
        self.append(session, EventPayload::Error { message: message.into(), recoverable });
    }
}

fn is_recoverable(error: &LlmError) -> bool {
    matches!(error, LlmError::RateLimited { .. } | LlmError::NetworkError(_))
}
