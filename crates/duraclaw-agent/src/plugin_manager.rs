//! Dispatch and bookkeeping for suspendable plugin tool calls.
//!
//! `PluginSessionManager` owns the `call_id -> ToolSession` map. Launching a
//! call spawns the `PluginTool::run` future on its own task; the manager
//! keeps the receiving half of its event channel so an engine instance from
//! a *later* HTTP request (after an elicit round-trip) can resume driving
//! the same call without anything having to stay alive across the request
//! boundary except the task itself.

use crate::tool_session::{ToolSession, ToolSessionStatus};
use dashmap::DashMap;
use duraclaw_core::ELICIT_TIMEOUT;
use duraclaw_llm::{AccumulatedToolCall, ChatProvider, LlmMessage, LlmRequest, LlmResult, LlmTool, StreamDelta};
use duraclaw_tools::{ElicitResponse, PluginContext, PluginEvent, PluginToolRegistry, SampleRequest};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Default)]
pub struct PluginSessionManager {
    sessions: DashMap<String, ToolSession>,
    tools: Arc<PluginToolRegistry>,
    provider: Option<Arc<dyn ChatProvider>>,
}

impl PluginSessionManager {
    pub fn new(tools: Arc<PluginToolRegistry>, provider: Option<Arc<dyn ChatProvider>>) -> Self {
        Self {
            sessions: DashMap::new(),
            tools,
            provider,
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    pub fn tool_definitions(&self) -> Vec<LlmTool> {
        self.tools.get_definitions()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.list().into_iter().map(String::from).collect()
    }

    pub fn tool_name(&self, call_id: &str) -> Option<String> {
        self.sessions.get(call_id).map(|s| s.tool_name.clone())
    }

    /// Launch a plugin call. Returns `false` if no plugin tool with this
    /// name is registered.
    ///
    /// The spawned task sends its own terminal `Done`/`Failed` event over
    /// the channel before returning, so `drive_next_event` observes the
    /// outcome the same way it observes an elicit request — `None` is
    /// reserved for the task dying without producing one (panic).
    pub fn launch(&self, session_id: String, call_id: String, tool_name: String, arguments: Value) -> bool {
        let Some(tool) = self.tools.get(&tool_name) else {
            return false;
        };
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(8);
        let ctx = PluginContext::new(call_id.clone(), arguments, events_tx.clone());
        let join = tokio::spawn(async move {
            let result = tool.run(ctx).await;
            let event = match &result {
                Ok(value) => PluginEvent::Done(value.clone()),
                Err(message) => PluginEvent::Failed(message.clone()),
            };
            let _ = events_tx.send(event).await;
            result
        });
        self.sessions.insert(
            call_id.clone(),
            ToolSession::new(session_id, call_id.clone(), tool_name, join, events_rx),
        );
        if let Some(mut entry) = self.sessions.get_mut(&call_id) {
            entry.mark_running();
        }
        true
    }

    /// Await the call's next outbound event (another elicit, or a terminal
    /// outcome), without holding the registry's entry lock across the wait.
    ///
    /// A `Sample` event is resolved entirely here: the provider is called,
    /// the completion fed back to the plugin's task over its own channel,
    /// and the loop continues to the call's *next* event — the engine never
    /// sees a `Sample` come out of this function.
    pub async fn drive_next_event(&self, call_id: &str) -> Option<PluginEvent> {
        loop {
            let mut rx = {
                let mut entry = self.sessions.get_mut(call_id)?;
                entry.take_events_rx()?
            };
            let event = rx.recv().await;
            if let Some(mut entry) = self.sessions.get_mut(call_id) {
                entry.return_events_rx(rx);
            }
            match event {
                Some(PluginEvent::Sample(request, respond_to)) => {
                    let result = self.resolve_sample(request).await;
                    let _ = respond_to.send(result);
                    continue;
                }
                other => return other,
            }
        }
    }

    async fn resolve_sample(&self, request: SampleRequest) -> Result<String, String> {
        let Some(provider) = &self.provider else {
            return Err("provider not configured".to_string());
        };
        let llm_request = LlmRequest {
            model: request.model.unwrap_or_else(|| "claude-opus-4-6-20250929".to_string()),
            messages: vec![LlmMessage { role: "user".to_string(), content: request.prompt.into() }],
            tools: request.tools,
            ..Default::default()
        };
        sample_request(provider.as_ref(), llm_request).await.map_err(|e| e.to_string())
    }

    /// Record that a launched call is now blocked on an elicit round-trip,
    /// and arm a watchdog that cancels it if nobody answers within
    /// `ELICIT_TIMEOUT`.
    pub fn record_elicit(self: &Arc<Self>, call_id: &str, elicit_id: String, respond_to: oneshot::Sender<ElicitResponse>) {
        {
            let Some(mut session) = self.sessions.get_mut(call_id) else {
                return;
            };
            session.set_awaiting_elicit(elicit_id.clone(), respond_to);
        }

        let manager = self.clone();
        let call_id = call_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ELICIT_TIMEOUT).await;
            if let Some(mut entry) = manager.sessions.get_mut(&call_id) {
                if entry.elicit_id() == Some(elicit_id.as_str()) {
                    entry.mark_terminal(ToolSessionStatus::Cancelled);
                    entry.join.abort();
                }
            }
        });
    }

    /// Answer a pending elicit request for a call. The plugin's task resumes
    /// once this is called; its next event should be fetched with
    /// `drive_next_event`.
    pub fn respond_to_elicit(
        &self,
        call_id: &str,
        elicit_id: &str,
        response: ElicitResponse,
    ) -> Result<(), &'static str> {
        match self.sessions.get_mut(call_id) {
            Some(mut session) => session.answer_elicit(elicit_id, response),
            None => Err("no such plugin call"),
        }
    }

    pub fn status(&self, call_id: &str) -> Option<ToolSessionStatus> {
        self.sessions.get(call_id).map(|s| s.status)
    }

    pub fn elicit_id(&self, call_id: &str) -> Option<String> {
        self.sessions
            .get(call_id)
            .and_then(|s| s.elicit_id().map(String::from))
    }

    pub fn mark_completed(&self, call_id: &str) {
        if let Some(mut s) = self.sessions.get_mut(call_id) {
            s.mark_terminal(ToolSessionStatus::Completed);
        }
    }

    pub fn mark_failed(&self, call_id: &str) {
        if let Some(mut s) = self.sessions.get_mut(call_id) {
            s.mark_terminal(ToolSessionStatus::Failed);
        }
    }

    /// Abort a running or suspended call: aborts its task and drops its
    /// bookkeeping. Used when a session's grace delay expires with a plugin
    /// still parked.
    pub fn abort(&self, call_id: &str) {
        if let Some((_, session)) = self.sessions.remove(call_id) {
            session.join.abort();
        }
    }

    /// Abort every call belonging to a chat session. Used for `pluginAbort`,
    /// which names the session rather than a specific call.
    pub fn abort_session(&self, session_id: &str) {
        let call_ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().session_id == session_id)
            .map(|e| e.key().clone())
            .collect();
        for call_id in call_ids {
            self.abort(&call_id);
        }
    }

    pub fn remove(&self, call_id: &str) {
        self.sessions.remove(call_id);
    }

    pub fn pending_call_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|e| !e.value().is_terminal())
            .map(|e| e.key().clone())
            .collect()
    }
}

/// A plugin asking the model a question mid-execution. The provider's
/// stream is collected into one completion; if the provider responds with a
/// tool call (the request carried `tools` or an `output_schema`), the
/// accumulated arguments string is returned instead of plain text. Not
/// broadcast to the client and not appended to the durable event log.
pub async fn sample_request(provider: &dyn ChatProvider, request: LlmRequest) -> LlmResult<String> {
    let mut stream = provider.complete_stream(request, None).await?;
    let mut text = String::new();
    let mut tool_call: Option<AccumulatedToolCall> = None;
    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::Text(chunk) => text.push_str(&chunk),
            StreamDelta::Thinking(_) => {}
            StreamDelta::ToolCallStart { id, name } => {
                tool_call = Some(AccumulatedToolCall { id, name, arguments: String::new() });
            }
            StreamDelta::ToolCallDelta { id, arguments } => {
                if let Some(call) = tool_call.as_mut() {
                    if call.id == id {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
            StreamDelta::ToolCallEnd { .. } => {}
            StreamDelta::Done { .. } => break,
            StreamDelta::Error(message) => {
                return Err(duraclaw_llm::LlmError::StreamError(message));
            }
        }
    }
    match tool_call {
        Some(call) => Ok(call.arguments),
        None => Ok(text),
    }
}
