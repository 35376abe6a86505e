//! Speech capture contract: one `listen()` per utterance, exactly one
//! terminal outcome per listen.

use crate::error::ConversationResult;
use crate::session::lock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One committed utterance of PCM audio.
#[derive(Debug, Clone)]
pub struct PcmUtterance {
    /// PCM samples (f32, -1.0..1.0), mono.
    pub samples: Vec<f32>,
    /// Sample rate (e.g. 16000).
    pub sample_rate: u32,
    /// Approximate speech duration.
    pub duration: Duration,
    /// When the utterance was committed.
    pub timestamp: DateTime<Utc>,
}

/// Speech capture capability.
///
/// Non-continuous, non-interim: no partial results are delivered, and there
/// is no separate capture-started notification (the caller tracks phase
/// itself). Calling `listen()` while a previous listen is outstanding is a
/// caller error the orchestrator never commits.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Listen for one utterance and resolve with its transcript. Exactly one
    /// terminal outcome per call: the transcript, or an error. Fails with
    /// `ConversationError::Unsupported` when the platform offers no
    /// recognition capability.
    async fn listen(&self) -> ConversationResult<String>;

    /// Idempotently halt any in-progress listen. Safe when not listening.
    fn stop(&self);
}

/// Scripted capture for tests and demos: pops pre-programmed outcomes in
/// order, then behaves like a microphone nobody speaks into.
pub struct ScriptedCapture {
    script: Mutex<VecDeque<ConversationResult<String>>>,
    delay: Duration,
}

impl ScriptedCapture {
    pub fn new<I, S>(utterances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_outcomes(utterances.into_iter().map(|u| Ok(u.into())).collect())
    }

    pub fn with_outcomes(outcomes: Vec<ConversationResult<String>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            delay: Duration::ZERO,
        }
    }

    /// Simulated time-to-speak before each utterance is delivered.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl CaptureProvider for ScriptedCapture {
    async fn listen(&self) -> ConversationResult<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = lock(&self.script).pop_front();
        match next {
            Some(outcome) => outcome,
            None => std::future::pending::<ConversationResult<String>>().await,
        }
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConversationError;

    #[tokio::test]
    async fn scripted_outcomes_pop_in_order() {
        let capture = ScriptedCapture::with_outcomes(vec![
            Ok("one".to_string()),
            Err(ConversationError::Capture("aborted".to_string())),
        ]);
        assert_eq!(capture.listen().await.unwrap(), "one");
        assert!(capture.listen().await.is_err());
    }

    #[tokio::test]
    async fn exhausted_script_keeps_listening() {
        let capture = ScriptedCapture::new(Vec::<String>::new());
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), capture.listen()).await;
        assert!(outcome.is_err(), "no terminal event without an utterance");
    }
}
