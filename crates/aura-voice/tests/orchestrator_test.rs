//! Integration tests for the conversation turn loop, using scripted and
//! instrumented providers. No audio hardware or network required.

use async_trait::async_trait;
use aura_voice::{
    AgentStatus, CaptureProvider, ConversationError, ConversationResult, DialogueClient,
    DialogueReply, OrchestratorConfig, ScriptedCapture, ScriptedDialogue, Sender, SessionEvent,
    SilentSynthesis, SynthesisProvider, TurnOrchestrator,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

async fn wait_for<F>(orchestrator: &TurnOrchestrator, what: &str, predicate: F)
where
    F: Fn(&TurnOrchestrator) -> bool,
{
    let reached = timeout(Duration::from_secs(2), async {
        loop {
            if predicate(orchestrator) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn non_final_turn_returns_to_listening() {
    let capture = Arc::new(ScriptedCapture::new(vec!["hello"]));
    let dialogue = Arc::new(ScriptedDialogue::new(vec![DialogueReply::new(
        "hi there", false,
    )]));
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    let mut events = orchestrator.take_event_receiver().expect("first take");
    orchestrator.activate();

    wait_for(&orchestrator, "completed cycle", |o| {
        o.transcript().len() == 2 && o.status() == AgentStatus::Listening
    })
    .await;

    let transcript = orchestrator.transcript();
    assert_eq!(transcript[0].sender, Sender::User);
    assert_eq!(transcript[0].text, "hello");
    assert_eq!(transcript[1].sender, Sender::Agent);
    assert_eq!(transcript[1].text, "hi there");
    assert!(orchestrator.is_active());
    assert!(orchestrator.last_error().is_none());

    // One full cycle: activation, then listening -> thinking -> speaking ->
    // listening, with the two messages appended along the way.
    let mut statuses = Vec::new();
    let mut messages = Vec::new();
    let mut activated = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Activated => activated += 1,
            SessionEvent::StatusChanged(status) => statuses.push(status),
            SessionEvent::MessageAppended(message) => messages.push(message),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(activated, 1);
    assert_eq!(
        statuses,
        vec![
            AgentStatus::Listening,
            AgentStatus::Thinking,
            AgentStatus::Speaking,
            AgentStatus::Listening,
        ]
    );
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[1].sender, Sender::Agent);

    orchestrator.deactivate();
}

#[tokio::test]
async fn final_turn_completes_the_session_once() {
    let capture = Arc::new(ScriptedCapture::new(vec!["goodbye"]));
    let dialogue = Arc::new(ScriptedDialogue::new(vec![DialogueReply::new(
        "see you", true,
    )]));
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    let mut events = orchestrator.take_event_receiver().expect("first take");
    orchestrator.activate();

    wait_for(&orchestrator, "session end", |o| !o.is_active()).await;
    assert_eq!(orchestrator.status(), AgentStatus::Idle);
    assert_eq!(orchestrator.transcript().len(), 2);

    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Completed) {
            completed += 1;
        }
    }
    assert_eq!(completed, 1, "completion notification fires exactly once");
}

#[tokio::test]
async fn capture_error_surfaces_and_idles() {
    let capture = Arc::new(ScriptedCapture::with_outcomes(vec![Err(
        ConversationError::Capture("recognition aborted".to_string()),
    )]));
    let dialogue = Arc::new(ScriptedDialogue::new(Vec::new()));
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    orchestrator.activate();

    wait_for(&orchestrator, "surfaced error", |o| o.last_error().is_some()).await;
    assert_eq!(orchestrator.status(), AgentStatus::Idle);
    assert!(orchestrator.transcript().is_empty());
    assert!(orchestrator.is_active(), "error does not end the session");

    orchestrator.dismiss_error();
    assert!(orchestrator.last_error().is_none());
    orchestrator.deactivate();
}

#[tokio::test]
async fn exchange_error_keeps_the_user_message() {
    let capture = Arc::new(ScriptedCapture::new(vec!["hello"]));
    let dialogue = Arc::new(ScriptedDialogue::with_outcomes(vec![Err(
        ConversationError::Exchange("service unavailable".to_string()),
    )]));
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    orchestrator.activate();

    wait_for(&orchestrator, "surfaced error", |o| o.last_error().is_some()).await;
    let transcript = orchestrator.transcript();
    assert_eq!(transcript.len(), 1, "the reply never arrived");
    assert_eq!(transcript[0].sender, Sender::User);
    assert_eq!(orchestrator.status(), AgentStatus::Idle);
    orchestrator.deactivate();
}

struct SlowDialogue {
    delay: Duration,
}

#[async_trait]
impl DialogueClient for SlowDialogue {
    async fn exchange(&self, _transcript: &str) -> ConversationResult<DialogueReply> {
        tokio::time::sleep(self.delay).await;
        Ok(DialogueReply::new("late reply", false))
    }
}

#[tokio::test]
async fn deactivation_while_thinking_discards_the_reply() {
    let capture = Arc::new(ScriptedCapture::new(vec!["hello"]));
    let dialogue = Arc::new(SlowDialogue {
        delay: Duration::from_millis(100),
    });
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    orchestrator.activate();

    wait_for(&orchestrator, "thinking", |o| {
        o.status() == AgentStatus::Thinking
    })
    .await;
    orchestrator.deactivate();
    assert!(!orchestrator.is_active());
    assert_eq!(orchestrator.status(), AgentStatus::Idle);

    // Give the pending exchange time to have resolved; its effect must be gone.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.transcript.len(), 1, "no reply appended after close");
    assert_eq!(snapshot.status, AgentStatus::Idle);
    assert!(!snapshot.is_active);
}

#[tokio::test]
async fn exchange_timeout_is_an_exchange_failure() {
    let capture = Arc::new(ScriptedCapture::new(vec!["hello"]));
    let dialogue = Arc::new(SlowDialogue {
        delay: Duration::from_millis(500),
    });
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig {
            exchange_timeout: Duration::from_millis(50),
        },
    );
    orchestrator.activate();

    wait_for(&orchestrator, "surfaced error", |o| o.last_error().is_some()).await;
    let error = orchestrator.last_error().expect("surfaced");
    assert!(error.starts_with("dialogue exchange failed"), "got: {error}");
    assert_eq!(orchestrator.status(), AgentStatus::Idle);
    orchestrator.deactivate();
}

#[tokio::test]
async fn synthesis_error_keeps_the_reply_in_the_transcript() {
    struct FailingSynthesis;

    #[async_trait]
    impl SynthesisProvider for FailingSynthesis {
        async fn speak(&self, _text: &str) -> ConversationResult<()> {
            Err(ConversationError::Synthesis("no voices available".to_string()))
        }
        fn stop(&self) {}
        fn is_speaking(&self) -> bool {
            false
        }
    }

    let capture = Arc::new(ScriptedCapture::new(vec!["hello"]));
    let dialogue = Arc::new(ScriptedDialogue::new(vec![DialogueReply::new(
        "hi there", false,
    )]));
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(FailingSynthesis),
        OrchestratorConfig::default(),
    );
    orchestrator.activate();

    wait_for(&orchestrator, "surfaced error", |o| o.last_error().is_some()).await;
    let transcript = orchestrator.transcript();
    assert_eq!(transcript.len(), 2, "the acquired reply is not forfeited");
    assert_eq!(transcript[1].text, "hi there");
    assert_eq!(orchestrator.status(), AgentStatus::Idle);
    assert!(orchestrator.is_active());
    orchestrator.deactivate();
}

#[derive(Default)]
struct CountingCapture {
    listens: AtomicUsize,
}

#[async_trait]
impl CaptureProvider for CountingCapture {
    async fn listen(&self) -> ConversationResult<String> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<ConversationResult<String>>().await
    }
    fn stop(&self) {}
}

#[tokio::test]
async fn duplicate_activation_is_dropped() {
    let capture = Arc::new(CountingCapture::default());
    let dialogue = Arc::new(ScriptedDialogue::new(Vec::new()));
    let orchestrator = TurnOrchestrator::new(
        Arc::clone(&capture) as Arc<dyn CaptureProvider>,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    orchestrator.activate();
    tokio::time::sleep(Duration::from_millis(30)).await;
    orchestrator.activate();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(
        capture.listens.load(Ordering::SeqCst),
        1,
        "no second capture start while a listen is outstanding"
    );
    orchestrator.deactivate();
}

#[tokio::test]
async fn reactivation_after_error_keeps_the_transcript() {
    let capture = Arc::new(ScriptedCapture::new(vec!["hello", "still there?"]));
    let dialogue = Arc::new(ScriptedDialogue::with_outcomes(vec![
        Err(ConversationError::Exchange("connection reset".to_string())),
        Ok(DialogueReply::new("yes, here", false)),
    ]));
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    orchestrator.activate();
    wait_for(&orchestrator, "surfaced error", |o| o.last_error().is_some()).await;
    assert_eq!(orchestrator.transcript().len(), 1);

    orchestrator.activate();
    wait_for(&orchestrator, "resumed cycle", |o| {
        o.transcript().len() == 3 && o.status() == AgentStatus::Listening
    })
    .await;
    let transcript = orchestrator.transcript();
    assert_eq!(transcript[0].text, "hello", "resume keeps the record");
    assert_eq!(transcript[2].text, "yes, here");
    orchestrator.deactivate();
}

#[tokio::test]
async fn fresh_activation_starts_clean() {
    let capture = Arc::new(ScriptedCapture::new(vec!["goodbye"]));
    let dialogue = Arc::new(ScriptedDialogue::new(vec![DialogueReply::new(
        "see you", true,
    )]));
    let orchestrator = TurnOrchestrator::new(
        capture,
        dialogue,
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    orchestrator.activate();
    wait_for(&orchestrator, "session end", |o| !o.is_active()).await;
    assert_eq!(orchestrator.transcript().len(), 2);

    orchestrator.activate();
    wait_for(&orchestrator, "listening again", |o| {
        o.status() == AgentStatus::Listening
    })
    .await;
    assert!(orchestrator.transcript().is_empty(), "a session starts clean");
    assert!(orchestrator.is_active());
    orchestrator.deactivate();
}

#[tokio::test]
async fn deactivate_without_activate_is_a_noop() {
    let orchestrator = TurnOrchestrator::new(
        Arc::new(ScriptedCapture::new(Vec::<String>::new())),
        Arc::new(ScriptedDialogue::new(Vec::new())),
        Arc::new(SilentSynthesis),
        OrchestratorConfig::default(),
    );
    orchestrator.deactivate();
    assert!(!orchestrator.is_active());
    assert_eq!(orchestrator.status(), AgentStatus::Idle);
}

#[derive(Default)]
struct Gauge {
    busy: AtomicUsize,
    violated: AtomicBool,
}

impl Gauge {
    fn enter(&self) {
        if self.busy.fetch_add(1, Ordering::SeqCst) != 0 {
            self.violated.store(true, Ordering::SeqCst);
        }
    }
    fn exit(&self) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

struct GaugedCapture {
    script: Mutex<VecDeque<String>>,
    gauge: Arc<Gauge>,
}

#[async_trait]
impl CaptureProvider for GaugedCapture {
    async fn listen(&self) -> ConversationResult<String> {
        self.gauge.enter();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let next = self.script.lock().unwrap().pop_front();
        self.gauge.exit();
        match next {
            Some(text) => Ok(text),
            None => std::future::pending::<ConversationResult<String>>().await,
        }
    }
    fn stop(&self) {}
}

struct GaugedDialogue {
    script: Mutex<VecDeque<DialogueReply>>,
    gauge: Arc<Gauge>,
}

#[async_trait]
impl DialogueClient for GaugedDialogue {
    async fn exchange(&self, _transcript: &str) -> ConversationResult<DialogueReply> {
        self.gauge.enter();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let next = self.script.lock().unwrap().pop_front();
        self.gauge.exit();
        next.ok_or_else(|| ConversationError::Exchange("script exhausted".to_string()))
    }
}

struct GaugedSynthesis {
    gauge: Arc<Gauge>,
}

#[async_trait]
impl SynthesisProvider for GaugedSynthesis {
    async fn speak(&self, _text: &str) -> ConversationResult<()> {
        self.gauge.enter();
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.gauge.exit();
        Ok(())
    }
    fn stop(&self) {}
    fn is_speaking(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn provider_operations_are_mutually_exclusive() {
    let gauge = Arc::new(Gauge::default());
    let capture = Arc::new(GaugedCapture {
        script: Mutex::new(
            vec!["one".to_string(), "two".to_string(), "three".to_string()].into(),
        ),
        gauge: Arc::clone(&gauge),
    });
    let dialogue = Arc::new(GaugedDialogue {
        script: Mutex::new(
            vec![
                DialogueReply::new("first", false),
                DialogueReply::new("second", false),
                DialogueReply::new("third", true),
            ]
            .into(),
        ),
        gauge: Arc::clone(&gauge),
    });
    let synthesis = Arc::new(GaugedSynthesis {
        gauge: Arc::clone(&gauge),
    });
    let orchestrator =
        TurnOrchestrator::new(capture, dialogue, synthesis, OrchestratorConfig::default());
    orchestrator.activate();

    wait_for(&orchestrator, "three full turns", |o| !o.is_active()).await;
    assert_eq!(orchestrator.transcript().len(), 6);
    assert!(
        !gauge.violated.load(Ordering::SeqCst),
        "at most one provider operation may be outstanding at any instant"
    );
}
