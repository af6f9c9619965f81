//! Durable chat sessions: a session owns a `DurableBuffer` plus the message
//! history the engine replays through the provider on each turn, and stays
//! alive across reconnects behind a reader reference count.

use crate::engine::TurnMessage;
use crate::buffer::DurableBuffer;
use dashmap::DashMap;
use duraclaw_core::{EnabledTools, ToolCallInfo, GRACE_DELAY};
use duraclaw_llm::{ContentBlock, LlmContent, LlmMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub type SessionId = String;

/// A session's durable state: its event log, conversation history, and the
/// bookkeeping that decides when it's safe to drop.
pub struct DurableSession {
    pub id: SessionId,
    pub buffer: Arc<DurableBuffer>,
    pub messages: RwLock<Vec<LlmMessage>>,
    pub persona: RwLock<Option<String>>,
    pub model: RwLock<Option<String>>,
    /// Overrides `EngineConfig::system_prompt` for this session once a
    /// request sets it.
    pub system_prompt: RwLock<Option<String>>,
    /// The request-scoped tool allowlist, persisted across turns until a
    /// later request replaces it.
    pub enabled_tools: RwLock<Option<EnabledTools>>,
    /// The request-scoped plugin allowlist, persisted the same way.
    pub enabled_plugins: RwLock<Option<Vec<String>>>,
    pub created_at: Instant,

    /// Number of readers (SSE/NDJSON connections) currently attached.
    ref_count: AtomicI64,
    /// Set once the engine has produced a terminal event for the session's
    /// current turn. A session isn't released while a writer is still active
    /// even if its reader count momentarily drops to zero.
    writer_done: AtomicBool,
    /// Guards against double-release racing two grace-delay timers.
    released: AtomicBool,
    /// Cancelled to abort an in-flight turn (client sent `/abort`).
    pub abort: CancellationToken,
    /// Call ids currently parked on an isomorphic handoff, mapped to the
    /// tool name that was handed off — the client output endpoint doesn't
    /// repeat the tool name, so the engine looks it up here.
    pending_isomorphic: RwLock<HashMap<String, String>>,
}

impl DurableSession {
    fn new(id: SessionId, persona: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            buffer: Arc::new(DurableBuffer::new()),
            messages: RwLock::new(Vec::new()),
            persona: RwLock::new(persona),
            model: RwLock::new(None),
            system_prompt: RwLock::new(None),
            enabled_tools: RwLock::new(None),
            enabled_plugins: RwLock::new(None),
            created_at: Instant::now(),
            ref_count: AtomicI64::new(0),
            writer_done: AtomicBool::new(true),
            released: AtomicBool::new(false),
            abort: CancellationToken::new(),
            pending_isomorphic: RwLock::new(HashMap::new()),
        })
    }

    pub fn mark_writer_active(&self) {
        self.writer_done.store(false, Ordering::Release);
    }

    pub fn mark_writer_done(&self) {
        self.writer_done.store(true, Ordering::Release);
    }

    fn is_idle(&self) -> bool {
        self.ref_count.load(Ordering::Acquire) <= 0 && self.writer_done.load(Ordering::Acquire)
    }

    pub async fn record_isomorphic_handoff(&self, call_id: String, tool_name: String) {
        self.pending_isomorphic.write().await.insert(call_id, tool_name);
    }

    pub async fn take_isomorphic_tool_name(&self, call_id: &str) -> Option<String> {
        self.pending_isomorphic.write().await.remove(call_id)
    }

    /// Append a role-tagged message from the request body's `messages`
    /// array. A `tool_call_id` turns it into a `tool_result` block; a
    /// `tool_calls` array turns it into an assistant `tool_use` turn;
    /// otherwise it's plain text under the given role.
    pub async fn push_message(&self, message: TurnMessage) {
        let content = if let Some(tool_call_id) = message.tool_call_id {
            LlmContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_call_id,
                content: message.content,
                is_error: None,
            }])
        } else if let Some(tool_calls) = message.tool_calls.as_ref().and_then(Value::as_array) {
            let mut blocks = Vec::new();
            if !message.content.is_empty() {
                blocks.push(ContentBlock::Text { text: message.content.clone() });
            }
            for call in tool_calls {
                let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                blocks.push(ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: call.get("arguments").cloned().unwrap_or(Value::Null),
                });
            }
            LlmContent::Blocks(blocks)
        } else {
            LlmContent::Text(message.content)
        };
        self.messages.write().await.push(LlmMessage { role: message.role, content });
    }

    pub async fn push_user_text(&self, text: String) {
        self.messages.write().await.push(LlmMessage {
            role: "user".to_string(),
            content: text.into(),
        });
    }

    pub async fn push_assistant_text(&self, text: String) {
        self.messages.write().await.push(LlmMessage {
            role: "assistant".to_string(),
            content: text.into(),
        });
    }

    pub async fn push_assistant_with_tools(&self, text: Option<String>, calls: &[ToolCallInfo]) {
        let mut blocks = Vec::new();
        if let Some(text) = text {
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text });
            }
        }
        for call in calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
        }
        self.messages.write().await.push(LlmMessage {
            role: "assistant".to_string(),
            content: LlmContent::Blocks(blocks),
        });
    }

    /// Record a tool's outcome as a `tool_result` content block, merging it
    /// into the trailing user message if that message is itself purely tool
    /// results — Anthropic rejects a request where consecutive tool results
    /// are split across separate user turns.
    pub async fn push_tool_result(&self, call_id: String, content: String, is_error: bool) {
        let block = ContentBlock::ToolResult {
            tool_use_id: call_id,
            content,
            is_error: if is_error { Some(true) } else { None },
        };
        let mut messages = self.messages.write().await;
        let merged = match messages.last_mut() {
            Some(last) if last.role == "user" => match &mut last.content {
                LlmContent::Blocks(blocks)
                    if blocks.iter().all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                {
                    blocks.push(block.clone());
                    true
                }
                _ => false,
            },
            _ => false,
        };
        if !merged {
            messages.push(LlmMessage {
                role: "user".to_string(),
                content: LlmContent::Blocks(vec![block]),
            });
        }
    }
}

/// Registry of live sessions, keyed by session id, with reference-counted
/// reader attach/detach and a grace delay before a session with no readers
/// and no active writer is actually removed.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<DurableSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn create(&self, persona: Option<String>) -> Arc<DurableSession> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = DurableSession::new(id.clone(), persona);
        self.sessions.insert(id, session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<DurableSession>> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    pub fn list(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Attach a reader to a session, incrementing its ref count.
    pub fn attach_reader(&self, session: &Arc<DurableSession>) {
        session.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Detach a reader. If the session becomes idle, schedule it for
    /// removal after the grace delay rather than dropping it immediately —
    /// a client that reconnects within the window resumes the same session.
    pub fn detach_reader(self: &Arc<Self>, session: Arc<DurableSession>) {
        let remaining = session.ref_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining > 0 {
            return;
        }
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(GRACE_DELAY).await;
            if session.is_idle()
                && session
                    .released
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                registry.sessions.remove(&session.id);
            }
        });
    }

    /// Remove a session immediately, regardless of readers — used when a
    /// turn ends in an unrecoverable error and the client won't reconnect.
    pub fn remove(&self, id: &str) -> Option<Arc<DurableSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }
}
