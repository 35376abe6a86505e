//! Turn orchestrator: the agent-status state machine driving
//! capture -> dialogue exchange -> synthesis -> re-listen.
//!
//! One spawned task per activation runs the loop; every provider call is the
//! only outstanding operation for that provider, and every await races the
//! session's cancellation token. Deactivation cancels the token under the
//! state lock, stops both providers, and discards in-flight results.

use crate::capture::CaptureProvider;
use crate::dialogue::DialogueClient;
use crate::error::ConversationError;
use crate::session::{lock, AgentStatus, Message, SessionEvent, SessionSnapshot, SessionStore};
use crate::synthesis::SynthesisProvider;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the turn orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on one dialogue exchange; elapse is treated as an exchange
    /// failure.
    pub exchange_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_secs(30),
        }
    }
}

struct SessionTask {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// The conversation core: owns the session state and drives the turn cycle
/// against the three providers.
pub struct TurnOrchestrator {
    capture: Arc<dyn CaptureProvider>,
    dialogue: Arc<dyn DialogueClient>,
    synthesis: Arc<dyn SynthesisProvider>,
    config: OrchestratorConfig,
    store: Arc<SessionStore>,
    events: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    session: Mutex<Option<SessionTask>>,
}

impl TurnOrchestrator {
    pub fn new(
        capture: Arc<dyn CaptureProvider>,
        dialogue: Arc<dyn DialogueClient>,
        synthesis: Arc<dyn SynthesisProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        let (store, events_rx) = SessionStore::new();
        Self {
            capture,
            dialogue,
            synthesis,
            config,
            store: Arc::new(store),
            events: Mutex::new(Some(events_rx)),
            session: Mutex::new(None),
        }
    }

    /// Receiver of session change notifications. Can be taken once.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        lock(&self.events).take()
    }

    /// Begin a session, or resume listening after a surfaced error. Capture
    /// starts eagerly. A duplicate activation while the loop is live is
    /// dropped: a second capture start is never issued.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn activate(&self) {
        let mut session = lock(&self.session);
        if let Some(current) = session.as_ref() {
            if !current.task.is_finished() {
                warn!("activation dropped: session loop already running");
                return;
            }
        }
        let fresh = !self.store.is_active();
        let token = CancellationToken::new();
        self.store.begin(fresh);
        info!(fresh, "conversation session activated");

        let task = tokio::spawn(run_loop(
            Arc::clone(&self.capture),
            Arc::clone(&self.dialogue),
            Arc::clone(&self.synthesis),
            self.config.clone(),
            Arc::clone(&self.store),
            token.clone(),
        ));
        *session = Some(SessionTask { token, task });
    }

    /// End the session: stop both providers immediately and discard the
    /// effect of any in-flight operation. Safe to call when not active.
    pub fn deactivate(&self) {
        let mut session = lock(&self.session);
        let Some(current) = session.take() else {
            return;
        };
        self.store.close(&current.token);
        self.capture.stop();
        self.synthesis.stop();
        info!("conversation session deactivated");
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn status(&self) -> AgentStatus {
        self.store.status()
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.store.transcript()
    }

    pub fn is_active(&self) -> bool {
        self.store.is_active()
    }

    pub fn last_error(&self) -> Option<String> {
        self.store.last_error()
    }

    /// Clear the surfaced error indicator.
    pub fn dismiss_error(&self) {
        self.store.dismiss_error()
    }
}

async fn run_loop(
    capture: Arc<dyn CaptureProvider>,
    dialogue: Arc<dyn DialogueClient>,
    synthesis: Arc<dyn SynthesisProvider>,
    config: OrchestratorConfig,
    store: Arc<SessionStore>,
    token: CancellationToken,
) {
    loop {
        // idle -> listening: capture starts eagerly
        if !store.transition(&token, AgentStatus::Listening) {
            return;
        }
        let captured = tokio::select! {
            _ = token.cancelled() => return,
            outcome = capture.listen() => outcome,
        };
        let transcript = match captured {
            Ok(text) => text,
            Err(e) => {
                surface(&store, &token, e);
                return;
            }
        };
        debug!("turn: captured utterance ({} chars)", transcript.len());

        if !store.append(&token, Message::user(transcript.as_str())) {
            return;
        }
        if !store.transition(&token, AgentStatus::Thinking) {
            return;
        }
        let exchanged = tokio::select! {
            _ = token.cancelled() => return,
            outcome = tokio::time::timeout(
                config.exchange_timeout,
                dialogue.exchange(&transcript),
            ) => outcome,
        };
        let reply = match exchanged {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                surface(&store, &token, e);
                return;
            }
            Err(_) => {
                surface(
                    &store,
                    &token,
                    ConversationError::Exchange(format!(
                        "no reply within {:?}",
                        config.exchange_timeout
                    )),
                );
                return;
            }
        };

        if !store.append(&token, Message::agent(reply.text.as_str())) {
            return;
        }
        if !store.transition(&token, AgentStatus::Speaking) {
            return;
        }
        let spoken = tokio::select! {
            _ = token.cancelled() => return,
            outcome = synthesis.speak(&reply.text) => outcome,
        };
        if let Err(e) = spoken {
            surface(&store, &token, e);
            return;
        }

        if reply.is_final {
            // The backend closed the conversation: tear down and notify once.
            capture.stop();
            synthesis.stop();
            store.complete(&token);
            info!("conversation completed by final turn");
            return;
        }
        // non-final: cede the floor back to the user and listen again
    }
}

fn surface(store: &SessionStore, token: &CancellationToken, error: ConversationError) {
    warn!("turn failed: {error}");
    store.fail(token, &error);
}
