//! Durable, replayable per-session event buffer.
//!
//! Every event a chat turn produces is appended here before it's ever sent
//! to a client. A reader can attach at any LSN and catch up through history
//! before tailing live appends — the same role `ws.rs`'s `output_tx`
//! broadcast channel plays for live fan-out, except late attachers get
//! everything they missed instead of only what's appended after they join.

use duraclaw_core::{Error, Event, EventPayload, Lsn, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

struct BufferInner {
    events: Vec<Event>,
    next_lsn: u64,
}

pub struct DurableBuffer {
    inner: Mutex<BufferInner>,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for DurableBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                events: Vec::new(),
                next_lsn: 1,
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append a payload, assigning it the next LSN. Returns `Err` if the
    /// buffer is already closed — a writer must not append after `close`.
    pub fn append(&self, payload: EventPayload) -> Result<Lsn> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::BufferClosed("buffer closed".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        let lsn = Lsn(inner.next_lsn);
        inner.next_lsn += 1;
        inner.events.push(Event {
            lsn,
            timestamp: chrono::Utc::now(),
            event: payload,
        });
        drop(inner);
        self.notify.notify_waiters();
        Ok(lsn)
    }

    /// Mark the buffer closed. Blocked replayers are woken so they can
    /// observe end-of-stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reopen a closed buffer so a new writer can append further events
    /// with LSNs continuing from the old tail. Used when a session whose
    /// previous writer finished is re-dispatched by a fresh request instead
    /// of only replaying the cached stream.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    pub fn tail_lsn(&self) -> Lsn {
        let inner = self.inner.lock().unwrap();
        Lsn(inner.next_lsn - 1)
    }

    /// Copy events with `lsn > from_lsn` currently in the buffer, without
    /// blocking. Used both by the blocking `replay` stream and by callers
    /// that just want a snapshot catch-up.
    fn events_since(&self, from_lsn: Lsn) -> Vec<Event> {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .iter()
            .filter(|e| e.lsn > from_lsn)
            .cloned()
            .collect()
    }

    /// Stream every event with `lsn > from_lsn`, replaying history first and
    /// then blocking for live appends until the buffer closes.
    pub fn replay(
        self: std::sync::Arc<Self>,
        from_lsn: Lsn,
    ) -> std::pin::Pin<Box<dyn futures::Stream<Item = Event> + Send>> {
        Box::pin(async_stream::stream! {
            let mut cursor = from_lsn;
            loop {
                let batch = self.events_since(cursor);
                let was_closed = self.is_closed();
                if batch.is_empty() {
                    if was_closed {
                        break;
                    }
                    self.notify.notified().await;
                    continue;
                }
                for event in batch {
                    cursor = event.lsn;
                    yield event;
                }
                if was_closed && self.events_since(cursor).is_empty() {
                    break;
                }
            }
        })
    }
}
