//! Conversation session state: agent status, append-only transcript, and
//! the change-notification channel observed by the presentation layer.
//!
//! The store has a single writer (the turn orchestrator). Every mutation that
//! originates from the turn loop re-checks the session's cancellation token
//! under the write lock, and deactivation cancels that token under the same
//! lock, so an operation that was in flight at deactivation can never mutate
//! state afterwards.

use crate::error::ConversationError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Poison-tolerant lock. A panicked holder leaves the data consistent here:
/// all critical sections are short and assignment-only.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The phase of the turn the agent is in. Exactly one value holds at any
/// instant; this is the sole externally observable phase indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Listening => "listening",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Speaking => "speaking",
        };
        f.write_str(s)
    }
}

/// Who produced a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sender::User => "user",
            Sender::Agent => "agent",
        })
    }
}

/// One transcript entry. Immutable once created; insertion order is
/// conversational order.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Sender::Agent, text)
    }

    fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Change notifications for presentation observers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session loop started (fresh activation or resume after an error).
    Activated,
    StatusChanged(AgentStatus),
    MessageAppended(Message),
    /// A capture/exchange/synthesis failure became the session's surfaced
    /// error. The session stays active; capture is not restarted.
    ErrorSurfaced(String),
    /// The backend marked a turn final and the session closed itself.
    /// Fired at most once per session.
    Completed,
    /// The session was explicitly deactivated.
    Deactivated,
}

/// Read-only copy of the session state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub is_active: bool,
    pub status: AgentStatus,
    pub transcript: Vec<Message>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct SessionInner {
    is_active: bool,
    status: AgentStatus,
    transcript: Vec<Message>,
    last_error: Option<String>,
}

/// Single-writer session store. Mutators are crate-private; the public
/// surface is snapshots and the event receiver.
pub(crate) struct SessionStore {
    inner: RwLock<SessionInner>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionStore {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let store = Self {
            inner: RwLock::new(SessionInner {
                is_active: false,
                status: AgentStatus::Idle,
                transcript: Vec::new(),
                last_error: None,
            }),
            events,
        };
        (store, events_rx)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Observers may have dropped the receiver; the session does not care.
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Open the session. A fresh session starts clean (transcript and
    /// surfaced error cleared); a resumed one keeps the record.
    pub(crate) fn begin(&self, fresh: bool) {
        let mut inner = self.write();
        if fresh {
            inner.transcript.clear();
            inner.last_error = None;
        }
        inner.is_active = true;
        inner.status = AgentStatus::Idle;
        self.emit(SessionEvent::Activated);
    }

    /// Guarded status transition. Refused (no write, no event) once the
    /// session token is cancelled.
    pub(crate) fn transition(&self, token: &CancellationToken, status: AgentStatus) -> bool {
        let mut inner = self.write();
        if token.is_cancelled() {
            return false;
        }
        if inner.status != status {
            inner.status = status;
            self.emit(SessionEvent::StatusChanged(status));
        }
        true
    }

    /// Guarded transcript append.
    pub(crate) fn append(&self, token: &CancellationToken, message: Message) -> bool {
        let mut inner = self.write();
        if token.is_cancelled() {
            return false;
        }
        inner.transcript.push(message.clone());
        self.emit(SessionEvent::MessageAppended(message));
        true
    }

    /// Collapse to `idle` with a surfaced error. The session stays active and
    /// the transcript is never rolled back.
    pub(crate) fn fail(&self, token: &CancellationToken, error: &ConversationError) -> bool {
        let mut inner = self.write();
        if token.is_cancelled() {
            return false;
        }
        inner.status = AgentStatus::Idle;
        inner.last_error = Some(error.to_string());
        self.emit(SessionEvent::ErrorSurfaced(error.to_string()));
        self.emit(SessionEvent::StatusChanged(AgentStatus::Idle));
        true
    }

    /// Final turn: the session closes itself. Cancels the token so nothing
    /// else can mutate, and fires the completion notification exactly once.
    pub(crate) fn complete(&self, token: &CancellationToken) -> bool {
        let mut inner = self.write();
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        inner.is_active = false;
        inner.status = AgentStatus::Idle;
        self.emit(SessionEvent::Completed);
        true
    }

    /// Explicit deactivation. The token is cancelled under the state lock so
    /// that once this returns, no in-flight operation can mutate state.
    pub(crate) fn close(&self, token: &CancellationToken) {
        let mut inner = self.write();
        let already_closed = token.is_cancelled();
        token.cancel();
        inner.is_active = false;
        inner.status = AgentStatus::Idle;
        if !already_closed {
            self.emit(SessionEvent::Deactivated);
        }
    }

    /// Clear the surfaced error indicator (user dismissed it).
    pub(crate) fn dismiss_error(&self) {
        self.write().last_error = None;
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let inner = self.read();
        SessionSnapshot {
            is_active: inner.is_active,
            status: inner.status,
            transcript: inner.transcript.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    pub(crate) fn status(&self) -> AgentStatus {
        self.read().status
    }

    pub(crate) fn is_active(&self) -> bool {
        self.read().is_active
    }

    pub(crate) fn transcript(&self) -> Vec<Message> {
        self.read().transcript.clone()
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }
}
