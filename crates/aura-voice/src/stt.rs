//! Speech-to-text: turn a PCM utterance into text.
//!
//! `HttpTranscriber` targets OpenAI-compatible transcription APIs
//! (`POST {base}/audio/transcriptions`, multipart WAV upload).

use crate::capture::PcmUtterance;
use crate::error::{ConversationError, ConversationResult};
use async_trait::async_trait;
use std::time::Duration;

/// Backend for converting a PCM utterance to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance; return an empty string if nothing was
    /// recognized.
    async fn transcribe(&self, utterance: &PcmUtterance) -> ConversationResult<String>;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
pub(crate) fn pcm_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk: PCM, mono, 16-bit
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        let quantized = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&quantized.to_le_bytes());
    }
    buf
}

/// Production transcriber: OpenAI-compatible transcription API.
/// Configured via `AURA_STT_URL`, `AURA_STT_API_KEY`, `AURA_STT_MODEL`.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model: whisper-1, gpt-4o-transcribe, etc.
    pub model: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> ConversationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConversationError::Capture(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Build from environment: AURA_STT_URL, AURA_STT_API_KEY, AURA_STT_MODEL.
    pub fn from_env() -> ConversationResult<Self> {
        let base_url = std::env::var("AURA_STT_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("AURA_STT_API_KEY")
            .map_err(|_| ConversationError::Config("AURA_STT_API_KEY not set".to_string()))?;
        let model = std::env::var("AURA_STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, utterance: &PcmUtterance) -> ConversationResult<String> {
        if utterance.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_to_wav(&utterance.samples, utterance.sample_rate);
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| ConversationError::Capture(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ConversationError::Capture(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ConversationError::Capture(format!(
                "transcription API error {status}: {body}"
            )));
        }
        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| ConversationError::Capture(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

/// Fixed transcriber for wiring tests and demos without an STT backend.
#[derive(Debug, Default)]
pub struct FixedTranscriber {
    /// If set, every utterance transcribes to this text.
    pub text: Option<String>,
}

impl FixedTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, utterance: &PcmUtterance) -> ConversationResult<String> {
        if let Some(ref text) = self.text {
            return Ok(text.clone());
        }
        Ok(format!(
            "[{} samples, {:.1}s of speech]",
            utterance.samples.len(),
            utterance.duration.as_secs_f32()
        ))
    }
}
