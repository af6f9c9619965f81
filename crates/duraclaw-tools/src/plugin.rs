//! Plugin tools — suspendable computations that can pause mid-execution to
//! ask the client a question (elicitation) or ask the model a question
//! (sampling) before resuming.
//!
//! Unlike `Tool`, a `PluginTool` doesn't return in one shot: `run` is driven
//! on its own task and communicates with the engine over a channel pair that
//! the plugin session manager holds onto for the lifetime of the call, since
//! an elicit round-trip can span separate requests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use duraclaw_llm::LlmTool;

/// A question the plugin is asking the client, and the channel its answer
/// arrives on.
#[derive(Debug)]
pub struct ElicitRequest {
    pub elicit_id: String,
    pub key: String,
    pub message: String,
    pub schema: Value,
    pub respond_to: oneshot::Sender<ElicitResponse>,
}

/// The client's answer to an `ElicitRequest`, or a cancellation.
#[derive(Debug, Clone)]
pub enum ElicitResponse {
    Value(Value),
    Error(String),
    Cancelled,
}

/// A plugin asking the model a question mid-execution. Handled entirely
/// server-side by the plugin session manager: the completion is fed back to
/// `respond_to` and never reaches the engine or the client.
#[derive(Debug)]
pub struct SampleRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub output_schema: Option<Value>,
    pub tools: Option<Vec<LlmTool>>,
}

/// What the plugin's task emits on its outbound channel while running.
#[derive(Debug)]
pub enum PluginEvent {
    /// The plugin is asking the client a question and will not proceed
    /// until it's answered.
    Elicit(ElicitRequest),
    /// The plugin is asking the provider a question and will not proceed
    /// until it's answered. Unlike `Elicit`, this never surfaces past the
    /// plugin session manager.
    Sample(SampleRequest, oneshot::Sender<Result<String, String>>),
    /// The plugin finished and this is its result, to be folded back into
    /// the conversation as a tool result.
    Done(Value),
    /// The plugin failed.
    Failed(String),
}

/// Handle a `PluginTool::run` future uses to talk to the call site without
/// blocking on completion.
pub struct PluginContext {
    pub call_id: String,
    pub arguments: Value,
    events: mpsc::Sender<PluginEvent>,
}

impl PluginContext {
    pub fn new(call_id: impl Into<String>, arguments: Value, events: mpsc::Sender<PluginEvent>) -> Self {
        Self {
            call_id: call_id.into(),
            arguments,
            events,
        }
    }

    /// Ask the client a question and block this plugin's task until it
    /// answers. Returns `ElicitResponse::Cancelled` if the engine drops the
    /// response channel (e.g. the session was aborted).
    pub async fn elicit(&self, key: impl Into<String>, message: impl Into<String>, schema: Value) -> ElicitResponse {
        let (tx, rx) = oneshot::channel();
        let request = ElicitRequest {
            elicit_id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            message: message.into(),
            schema,
            respond_to: tx,
        };
        if self.events.send(PluginEvent::Elicit(request)).await.is_err() {
            return ElicitResponse::Cancelled;
        }
        rx.await.unwrap_or(ElicitResponse::Cancelled)
    }

    /// Ask the provider a question and block until the manager feeds back a
    /// completion. Convenience wrapper over `sample_with` for a plain text
    /// prompt with no output schema or tool list.
    pub async fn sample(&self, prompt: impl Into<String>) -> Result<String, String> {
        self.sample_with(SampleRequest {
            prompt: prompt.into(),
            model: None,
            output_schema: None,
            tools: None,
        })
        .await
    }

    pub async fn sample_with(&self, request: SampleRequest) -> Result<String, String> {
        let (tx, rx) = oneshot::channel();
        if self.events.send(PluginEvent::Sample(request, tx)).await.is_err() {
            return Err("session closed".to_string());
        }
        rx.await.unwrap_or_else(|_| Err("sample request dropped".to_string()))
    }
}

/// A suspendable tool. `run` owns the plugin's entire lifetime, including
/// any number of `PluginContext::elicit` round-trips, and resolves to the
/// final `ToolResult`-equivalent payload handed back to `PluginContext`'s
/// `events` channel by the caller driving the future to completion.
#[async_trait]
pub trait PluginTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    async fn run(&self, ctx: PluginContext) -> Result<Value, String>;

    fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Registry of plugin tools, keyed by name, mirroring `ToolRegistry`'s shape.
#[derive(Default)]
pub struct PluginToolRegistry {
    tools: HashMap<String, Arc<dyn PluginTool>>,
}

impl PluginToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl PluginTool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get_definitions(&self) -> Vec<LlmTool> {
        self.tools.values().map(|t| t.to_llm_tool()).collect()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}
