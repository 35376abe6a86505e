//! # Aura Voice — conversation turn orchestration
//!
//! Core of a voice-driven conversational front-end: capture one user
//! utterance, exchange it with the dialogue backend, speak the reply, and
//! listen again until the backend marks a turn final.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Turn Orchestrator                       │
//! │  ┌────────────┐    ┌──────────────┐    ┌─────────────────┐  │
//! │  │  Capture   │ →  │   Dialogue   │ →  │    Synthesis    │  │
//! │  │ (mic+VAD)  │    │  (converse)  │    │ (TTS+playback)  │  │
//! │  └────────────┘    └──────────────┘    └─────────────────┘  │
//! │        ↑                                       │            │
//! │        └────────── reply not final ────────────┘            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Agent status (`idle → listening → thinking → speaking`) and the
//! append-only transcript live in a single-writer session store; the
//! presentation layer observes through [`SessionEvent`]s and read-only
//! snapshots. Providers are capability traits — swap in the scripted
//! implementations to run the loop without hardware or a backend.

pub mod capture;
pub mod dialogue;
pub mod error;
pub mod mic;
pub mod orchestrator;
pub mod session;
pub mod stt;
pub mod synthesis;

pub use capture::{CaptureProvider, PcmUtterance, ScriptedCapture};
pub use dialogue::{DialogueClient, DialogueReply, HttpDialogueClient, ScriptedDialogue};
pub use error::{ConversationError, ConversationResult};
pub use mic::{MicCapture, MicConfig};
pub use orchestrator::{OrchestratorConfig, TurnOrchestrator};
pub use session::{AgentStatus, Message, Sender, SessionEvent, SessionSnapshot};
pub use stt::{FixedTranscriber, HttpTranscriber, Transcriber};
pub use synthesis::{HttpSpeaker, SilentSynthesis, SynthesisProvider};
