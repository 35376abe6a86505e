//! Microphone capture: CPAL input, WebRTC VAD, gap-based utterance commit.
//!
//! Each `listen()` spawns a dedicated capture thread that owns the CPAL
//! stream (the stream is not `Send` on some platforms), runs VAD over 30ms
//! chunks, and delivers exactly one utterance once the post-speech gap is
//! reached. The async side then hands the PCM to the configured transcriber.

use crate::capture::{CaptureProvider, PcmUtterance};
use crate::error::{ConversationError, ConversationResult};
use crate::session::lock;
use crate::stt::Transcriber;
use async_trait::async_trait;
use chrono::Utc;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Configuration for microphone capture.
#[derive(Debug, Clone)]
pub struct MicConfig {
    /// Sample rate in Hz. Must be 8000, 16000, 32000, or 48000 for WebRTC VAD.
    pub sample_rate: u32,
    /// VAD aggressiveness, 0-3.
    pub vad_mode: u8,
    /// Silence after speech that commits the utterance.
    pub gap: Duration,
    /// Minimum speech duration for a valid utterance; shorter bursts are dropped.
    pub min_speech: Duration,
    /// Maximum utterance duration before auto-commit.
    pub max_utterance: Duration,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            vad_mode: 2,
            gap: Duration::from_millis(800),
            min_speech: Duration::from_millis(200),
            max_utterance: Duration::from_secs(30),
        }
    }
}

impl MicConfig {
    /// Samples per 30ms VAD frame.
    pub fn chunk_size(&self) -> usize {
        (self.sample_rate as usize * 30) / 1000
    }

    fn validate(&self) -> ConversationResult<()> {
        if !matches!(self.sample_rate, 8000 | 16000 | 32000 | 48000) {
            return Err(ConversationError::Config(format!(
                "WebRTC VAD supports 8000/16000/32000/48000 Hz, got {}",
                self.sample_rate
            )));
        }
        if self.vad_mode > 3 {
            return Err(ConversationError::Config(format!(
                "VAD mode must be 0-3, got {}",
                self.vad_mode
            )));
        }
        Ok(())
    }
}

/// Capture provider backed by the default input device.
pub struct MicCapture {
    config: MicConfig,
    transcriber: Arc<dyn Transcriber>,
    /// Stop signal for the in-progress listen, if any.
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl MicCapture {
    pub fn new(config: MicConfig, transcriber: Arc<dyn Transcriber>) -> ConversationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transcriber,
            stop_tx: Mutex::new(None),
        })
    }
}

#[async_trait]
impl CaptureProvider for MicCapture {
    async fn listen(&self) -> ConversationResult<String> {
        let (utterance_tx, utterance_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        *lock(&self.stop_tx) = Some(stop_tx);

        let config = self.config.clone();
        thread::Builder::new()
            .name("aura-mic-capture".to_string())
            .spawn(move || {
                let outcome = capture_utterance(&config, stop_rx);
                let _ = utterance_tx.send(outcome);
            })
            .map_err(|e| {
                ConversationError::Capture(format!("capture thread spawn failed: {e}"))
            })?;

        let utterance = match utterance_rx.await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(ConversationError::Capture(
                    "capture thread exited before a terminal event".to_string(),
                ))
            }
        };
        self.transcriber.transcribe(&utterance).await
    }

    fn stop(&self) {
        if let Some(stop) = lock(&self.stop_tx).take() {
            let _ = stop.send(true);
        }
    }
}

/// VAD phases for one utterance: Silence -> Speech -> PostSpeechGap -> commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Silence,
    Speech,
    PostSpeechGap,
}

fn build_vad(config: &MicConfig) -> ConversationResult<Vad> {
    let mode = match config.vad_mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    };
    let rate = match config.sample_rate {
        8000 => SampleRate::Rate8kHz,
        16000 => SampleRate::Rate16kHz,
        32000 => SampleRate::Rate32kHz,
        48000 => SampleRate::Rate48kHz,
        other => {
            return Err(ConversationError::Config(format!(
                "unsupported sample rate: {other}"
            )))
        }
    };
    let mut vad = Vad::new();
    vad.set_mode(mode);
    vad.set_sample_rate(rate);
    Ok(vad)
}

/// Runs on the capture thread. Returns once: one utterance, or an error.
fn capture_utterance(
    config: &MicConfig,
    stop_rx: watch::Receiver<bool>,
) -> ConversationResult<PcmUtterance> {
    let device = cpal::default_host().default_input_device().ok_or_else(|| {
        ConversationError::Unsupported("no audio input device available".to_string())
    })?;
    info!(
        "Mic: listening on {} ({}ms gap)",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        config.gap.as_millis()
    );

    let chunk_size = config.chunk_size();
    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(chunk_size as u32),
    };

    let (chunk_tx, chunk_rx) = std_mpsc::channel::<Vec<f32>>();
    let mut pending: Vec<f32> = Vec::with_capacity(chunk_size);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() >= chunk_size {
                        if chunk_tx.send(std::mem::take(&mut pending)).is_err() {
                            return;
                        }
                    }
                }
            },
            |err| warn!("Mic: input stream error: {err}"),
            None,
        )
        .map_err(|e| ConversationError::Capture(e.to_string()))?;
    stream
        .play()
        .map_err(|e| ConversationError::Capture(e.to_string()))?;

    let mut vad = build_vad(config)?;
    let mut phase = Phase::Silence;
    let mut buffer: Vec<f32> = Vec::new();
    let mut speech_started: Option<Instant> = None;
    let mut last_speech: Option<Instant> = None;

    loop {
        if *stop_rx.borrow() {
            return Err(ConversationError::Capture(
                "capture stopped before an utterance".to_string(),
            ));
        }
        let chunk = match chunk_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => chunk,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                return Err(ConversationError::Capture(
                    "audio input stream closed".to_string(),
                ))
            }
        };
        if chunk.len() != chunk_size {
            continue;
        }
        let frame: Vec<i16> = chunk
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        let is_speech = vad
            .is_voice_segment(&frame)
            .map_err(|_| ConversationError::Capture("VAD rejected audio frame".to_string()))?;
        let now = Instant::now();

        match (phase, is_speech) {
            (Phase::Silence, true) => {
                debug!("Mic: speech started");
                phase = Phase::Speech;
                speech_started = Some(now);
                last_speech = Some(now);
                buffer.clear();
                buffer.extend_from_slice(&chunk);
            }
            (Phase::Silence, false) => {}
            (Phase::Speech, true) | (Phase::PostSpeechGap, true) => {
                phase = Phase::Speech;
                last_speech = Some(now);
                buffer.extend_from_slice(&chunk);
                if let Some(start) = speech_started {
                    if now.duration_since(start) >= config.max_utterance {
                        info!("Mic: max utterance duration reached, committing");
                        return commit(config, buffer, start);
                    }
                }
            }
            (Phase::Speech, false) => {
                phase = Phase::PostSpeechGap;
            }
            (Phase::PostSpeechGap, false) => {
                if let (Some(start), Some(last)) = (speech_started, last_speech) {
                    if now.duration_since(last) >= config.gap {
                        let speech = last.duration_since(start);
                        if speech < config.min_speech {
                            debug!("Mic: burst too short ({speech:?}), dropping");
                            phase = Phase::Silence;
                            speech_started = None;
                            last_speech = None;
                            buffer.clear();
                            continue;
                        }
                        info!("Mic: gap reached, committing {} samples", buffer.len());
                        return commit(config, buffer, start);
                    }
                }
            }
        }
    }
}

fn commit(
    config: &MicConfig,
    samples: Vec<f32>,
    started: Instant,
) -> ConversationResult<PcmUtterance> {
    Ok(PcmUtterance {
        duration: started.elapsed(),
        sample_rate: config.sample_rate,
        samples,
        timestamp: Utc::now(),
    })
}
