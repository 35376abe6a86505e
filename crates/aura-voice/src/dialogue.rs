//! Dialogue client: one user transcript in, one agent reply out.
//!
//! `HttpDialogueClient` targets the converse endpoint: `POST` JSON
//! `{ "transcript": ... }`, response `{ "response_text", "is_final" }`.
//! No streaming or partial replies are modeled.

use crate::error::{ConversationError, ConversationResult};
use crate::session::lock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One reply from the dialogue backend.
#[derive(Debug, Clone)]
pub struct DialogueReply {
    pub text: String,
    /// The backend marked this turn as ending the conversation.
    pub is_final: bool,
}

impl DialogueReply {
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
        }
    }
}

/// Dialogue exchange capability. One transcript always produces exactly one
/// reply; every failure mode surfaces as the single `Exchange` error kind.
#[async_trait]
pub trait DialogueClient: Send + Sync {
    async fn exchange(&self, transcript: &str) -> ConversationResult<DialogueReply>;
}

#[derive(Debug, Serialize)]
struct ConverseRequest<'a> {
    transcript: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// The converse wire format. `is_final` defaults to false and unknown fields
/// (e.g. the backend's particle expression hint) are ignored.
#[derive(Debug, Deserialize)]
struct ConverseResponse {
    response_text: String,
    #[serde(default)]
    is_final: bool,
}

/// Production dialogue client for the converse endpoint.
/// Configured via `AURA_CONVERSE_URL` and optionally `AURA_SESSION_ID`.
#[derive(Debug, Clone)]
pub struct HttpDialogueClient {
    endpoint: String,
    session_id: Option<String>,
    client: reqwest::Client,
}

impl HttpDialogueClient {
    pub fn new(endpoint: impl Into<String>) -> ConversationResult<Self> {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    /// Client with an explicit request timeout (the transport-level bound;
    /// the orchestrator applies its own exchange timeout on top).
    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> ConversationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConversationError::Exchange(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            session_id: None,
            client,
        })
    }

    /// Attach a session identifier to every exchange.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Build from environment: AURA_CONVERSE_URL, AURA_SESSION_ID (optional).
    pub fn from_env() -> ConversationResult<Self> {
        let endpoint = std::env::var("AURA_CONVERSE_URL")
            .map_err(|_| ConversationError::Config("AURA_CONVERSE_URL not set".to_string()))?;
        let client = Self::new(endpoint)?;
        Ok(match std::env::var("AURA_SESSION_ID") {
            Ok(session_id) => client.with_session_id(session_id),
            Err(_) => client,
        })
    }
}

#[async_trait]
impl DialogueClient for HttpDialogueClient {
    async fn exchange(&self, transcript: &str) -> ConversationResult<DialogueReply> {
        let request = ConverseRequest {
            transcript,
            session_id: self.session_id.as_deref(),
        };
        let res = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ConversationError::Exchange(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ConversationError::Exchange(format!(
                "converse API error {status}: {body}"
            )));
        }
        let response: ConverseResponse = res
            .json()
            .await
            .map_err(|e| ConversationError::Exchange(format!("malformed converse response: {e}")))?;
        Ok(DialogueReply {
            text: response.response_text,
            is_final: response.is_final,
        })
    }
}

/// Scripted dialogue for tests and demos: pops pre-programmed outcomes in
/// order; an exhausted script is an exchange failure.
pub struct ScriptedDialogue {
    script: Mutex<VecDeque<ConversationResult<DialogueReply>>>,
}

impl ScriptedDialogue {
    pub fn new(replies: Vec<DialogueReply>) -> Self {
        Self::with_outcomes(replies.into_iter().map(Ok).collect())
    }

    pub fn with_outcomes(outcomes: Vec<ConversationResult<DialogueReply>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
        }
    }
}

#[async_trait]
impl DialogueClient for ScriptedDialogue {
    async fn exchange(&self, _transcript: &str) -> ConversationResult<DialogueReply> {
        lock(&self.script).pop_front().unwrap_or_else(|| {
            Err(ConversationError::Exchange(
                "dialogue script exhausted".to_string(),
            ))
        })
    }
}
