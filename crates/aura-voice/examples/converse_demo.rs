//! Conversation demo — scripted providers by default, production providers
//! from the environment when configured.
//!
//! - **Dialogue**: HttpDialogueClient if `AURA_CONVERSE_URL` is set, else a
//!   scripted two-turn conversation.
//! - **Capture**: microphone + HTTP transcription if `AURA_STT_API_KEY` is
//!   set, else scripted utterances.
//! - **Synthesis**: HTTP text-to-speech if `AURA_TTS_API_KEY` is set, else
//!   silent.

use aura_voice::{
    CaptureProvider, DialogueClient, DialogueReply, HttpDialogueClient, HttpSpeaker,
    HttpTranscriber, MicCapture, MicConfig, OrchestratorConfig, ScriptedCapture, ScriptedDialogue,
    SessionEvent, SilentSynthesis, SynthesisProvider, TurnOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let capture: Arc<dyn CaptureProvider> = match HttpTranscriber::from_env() {
        Ok(transcriber) => {
            info!("capture: microphone + HTTP transcription");
            Arc::new(MicCapture::new(MicConfig::default(), Arc::new(transcriber))?)
        }
        Err(_) => {
            info!("capture: scripted (set AURA_STT_API_KEY for the microphone)");
            Arc::new(
                ScriptedCapture::new(vec!["hello", "show me the dashboard"])
                    .with_delay(Duration::from_millis(400)),
            )
        }
    };

    let synthesis: Arc<dyn SynthesisProvider> = match HttpSpeaker::from_env() {
        Ok(speaker) => {
            info!("synthesis: HTTP text-to-speech");
            Arc::new(speaker)
        }
        Err(_) => {
            info!("synthesis: silent (set AURA_TTS_API_KEY to hear replies)");
            Arc::new(SilentSynthesis)
        }
    };

    let dialogue: Arc<dyn DialogueClient> = match HttpDialogueClient::from_env() {
        Ok(client) => {
            info!("dialogue: live converse endpoint");
            Arc::new(client)
        }
        Err(_) => {
            info!("dialogue: scripted (set AURA_CONVERSE_URL for a live backend)");
            Arc::new(ScriptedDialogue::new(vec![
                DialogueReply::new("Hello! Ask me about your dashboard.", false),
                DialogueReply::new("Of course. Generating your dashboard now.", true),
            ]))
        }
    };

    let orchestrator =
        TurnOrchestrator::new(capture, dialogue, synthesis, OrchestratorConfig::default());
    let mut events = orchestrator
        .take_event_receiver()
        .expect("first event receiver take");
    orchestrator.activate();

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Activated => {}
            SessionEvent::StatusChanged(status) => info!("status: {status}"),
            SessionEvent::MessageAppended(message) => {
                info!("{}: {}", message.sender, message.text)
            }
            SessionEvent::ErrorSurfaced(error) => {
                info!("error: {error}");
                break;
            }
            SessionEvent::Completed => {
                info!("conversation completed");
                break;
            }
            SessionEvent::Deactivated => break,
        }
    }

    orchestrator.deactivate();
    Ok(())
}
