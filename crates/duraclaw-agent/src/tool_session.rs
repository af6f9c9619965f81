//! Per-call-id bookkeeping for a suspended plugin tool invocation.
//!
//! A `ToolSession` tracks one `PluginTool::run` future from dispatch to
//! completion. The future itself runs on its own task, spawned by
//! `PluginSessionManager::launch`; this struct is what the manager looks up
//! by `call_id` when a client answers an elicit request or sends an abort,
//! and owns the receiving half of the plugin's outbound event channel so a
//! later, unrelated engine instance can keep driving the same call forward.

use duraclaw_tools::{ElicitResponse, PluginEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSessionStatus {
    /// The session has been registered but the plugin's task hasn't been
    /// confirmed running yet.
    Initializing,
    /// The plugin's task has been spawned and hasn't elicited or finished.
    Running,
    /// The plugin is blocked in `PluginContext::elicit`, waiting on a client
    /// answer to the elicit request named by `elicit_id`.
    AwaitingElicit,
    /// The plugin returned `Ok`.
    Completed,
    /// The plugin returned `Err`.
    Failed,
    /// The session's abort token was cancelled before the plugin finished.
    Aborted,
    /// An elicit request went unanswered past `ELICIT_TIMEOUT`, or the
    /// session was otherwise cancelled before it could reach a normal
    /// terminal state.
    Cancelled,
}

/// A suspended plugin invocation, keyed by `call_id` in `PluginSessionManager`.
pub struct ToolSession {
    pub session_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolSessionStatus,
    pub join: JoinHandle<Result<serde_json::Value, String>>,
    /// Taken out while a driver is awaiting the next event, put back once it
    /// arrives, so holding the registry's entry lock never spans an `.await`.
    events_rx: Option<mpsc::Receiver<PluginEvent>>,
    pending_elicit: Option<(String, oneshot::Sender<ElicitResponse>)>,
}

impl ToolSession {
    pub fn new(
        session_id: impl Into<String>,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        join: JoinHandle<Result<serde_json::Value, String>>,
        events_rx: mpsc::Receiver<PluginEvent>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            status: ToolSessionStatus::Initializing,
            join,
            events_rx: Some(events_rx),
            pending_elicit: None,
        }
    }

    /// Confirms the plugin's task is running, once it's been registered in
    /// the manager's map. A no-op if the session already moved past
    /// `Initializing` (e.g. it failed before this was called).
    pub fn mark_running(&mut self) {
        if self.status == ToolSessionStatus::Initializing {
            self.status = ToolSessionStatus::Running;
        }
    }

    pub fn take_events_rx(&mut self) -> Option<mpsc::Receiver<PluginEvent>> {
        self.events_rx.take()
    }

    pub fn return_events_rx(&mut self, rx: mpsc::Receiver<PluginEvent>) {
        self.events_rx = Some(rx);
    }

    pub fn set_awaiting_elicit(&mut self, elicit_id: String, respond_to: oneshot::Sender<ElicitResponse>) {
        self.status = ToolSessionStatus::AwaitingElicit;
        self.pending_elicit = Some((elicit_id, respond_to));
    }

    pub fn elicit_id(&self) -> Option<&str> {
        self.pending_elicit.as_ref().map(|(id, _)| id.as_str())
    }

    /// Answer the outstanding elicit request, transitioning back to
    /// `Running`. Returns `Err` if there's no pending elicit or the id
    /// doesn't match (stale/duplicate answer).
    pub fn answer_elicit(&mut self, elicit_id: &str, response: ElicitResponse) -> Result<(), &'static str> {
        match self.pending_elicit.take() {
            Some((pending_id, respond_to)) if pending_id == elicit_id => {
                self.status = ToolSessionStatus::Running;
                let _ = respond_to.send(response);
                Ok(())
            }
            Some(other) => {
                self.pending_elicit = Some(other);
                Err("elicit id does not match the pending request")
            }
            None => Err("no pending elicit on this call"),
        }
    }

    pub fn mark_terminal(&mut self, status: ToolSessionStatus) {
        self.status = status;
        self.pending_elicit = None;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ToolSessionStatus::Completed
                | ToolSessionStatus::Failed
                | ToolSessionStatus::Aborted
                | ToolSessionStatus::Cancelled
        )
    }
}
