//! Speech synthesis contract, HTTP speaker, and the playback kill-switch.
//!
//! `speak()` resolves when audio has fully played; `stop()` halts playback
//! immediately so deactivation never waits for a reply to finish.

use crate::error::{ConversationError, ConversationResult};
use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Speech synthesis capability. At most one `speak` may be outstanding at a
/// time (the orchestrator enforces this).
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Speak the text; resolves once audio has fully played (the
    /// playback-ended analog). Resolving is what lets the turn loop proceed.
    async fn speak(&self, text: &str) -> ConversationResult<()>;

    /// Stop playback immediately and clear the queue. Idempotent.
    fn stop(&self);

    /// Whether audio is queued or playing.
    fn is_speaking(&self) -> bool;
}

/// Placeholder synthesis: no audio, resolves immediately. For tests and for
/// running the loop without an output device.
#[derive(Debug, Default)]
pub struct SilentSynthesis;

#[async_trait]
impl SynthesisProvider for SilentSynthesis {
    async fn speak(&self, _text: &str) -> ConversationResult<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

/// Owns the output device. The `OutputStream` is not `Send`, so a dedicated
/// thread keeps it alive; the `Sink` handle is shared for append/stop.
struct Playback {
    sink: Arc<Sink>,
    /// Dropping this ends the playback thread and releases the device.
    _shutdown: std_mpsc::Sender<()>,
}

impl Playback {
    fn new() -> ConversationResult<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        thread::Builder::new()
            .name("aura-playback".to_string())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(ConversationError::Unsupported(format!(
                            "no audio output device: {e}"
                        ))));
                        return;
                    }
                };
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        let _ = ready_tx.send(Err(ConversationError::Synthesis(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(Arc::clone(&sink)));
                // Block until the owner drops; keeps the stream alive.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| {
                ConversationError::Synthesis(format!("playback thread spawn failed: {e}"))
            })?;

        let sink = ready_rx
            .recv()
            .map_err(|_| ConversationError::Synthesis("playback thread exited".to_string()))??;
        Ok(Self {
            sink,
            _shutdown: shutdown_tx,
        })
    }
}

/// Production synthesis: OpenAI-compatible speech API plus local playback.
/// Configured via `AURA_TTS_URL`, `AURA_TTS_API_KEY`, `AURA_TTS_MODEL`,
/// `AURA_TTS_VOICE`.
pub struct HttpSpeaker {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// TTS model: tts-1 (fast) or tts-1-hd (higher quality).
    pub model: String,
    /// Voice name (alloy, echo, nova, shimmer, ...).
    pub voice: String,
    client: reqwest::Client,
    playback: Playback,
}

impl HttpSpeaker {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> ConversationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ConversationError::Synthesis(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client,
            playback: Playback::new()?,
        })
    }

    /// Build from environment: AURA_TTS_URL, AURA_TTS_API_KEY, AURA_TTS_MODEL,
    /// AURA_TTS_VOICE.
    pub fn from_env() -> ConversationResult<Self> {
        let base_url = std::env::var("AURA_TTS_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("AURA_TTS_API_KEY")
            .map_err(|_| ConversationError::Config("AURA_TTS_API_KEY not set".to_string()))?;
        let model = std::env::var("AURA_TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let voice = std::env::var("AURA_TTS_VOICE").unwrap_or_else(|_| "alloy".to_string());
        Self::new(base_url, api_key, model, voice)
    }

    async fn synthesize(&self, text: &str) -> ConversationResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConversationError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ConversationError::Synthesis(format!(
                "synthesis API error {status}: {body}"
            )));
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| ConversationError::Synthesis(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SynthesisProvider for HttpSpeaker {
    async fn speak(&self, text: &str) -> ConversationResult<()> {
        let bytes = self.synthesize(text).await?;
        if bytes.is_empty() {
            return Ok(());
        }
        let source = Decoder::new(Cursor::new(bytes))
            .map_err(|e| ConversationError::Synthesis(format!("decode failed: {e}")))?;
        let sink = Arc::clone(&self.playback.sink);
        sink.append(source.convert_samples::<f32>());
        tokio::task::spawn_blocking(move || sink.sleep_until_end())
            .await
            .map_err(|e| ConversationError::Synthesis(format!("playback wait failed: {e}")))?;
        Ok(())
    }

    fn stop(&self) {
        self.playback.sink.stop();
        info!("Speaker: playback stopped");
    }

    fn is_speaking(&self) -> bool {
        !self.playback.sink.empty()
    }
}
