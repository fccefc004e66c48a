//! Reply generation
//!
//! The chat asks a hosted language model for a reply suggestion through a small
//! stateless route. This module holds both ends: [`server`] serves `POST /api/chat` and
//! forwards to an OpenAI-compatible completion API, and [`HttpGenerationClient`] is what
//! the chat uses to call that route.

mod client;
pub mod server;
pub mod transcript;

pub use client::HttpGenerationClient;
pub use server::{ProxyConfig, ProxyState};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::livechat::message_window::Message;

/// Used when the caller sends no system prompt, or an empty one
pub const DEFAULT_SYSTEM_PROMPT: &str = "Du bist ein lustiger und sarkastischer Assistent. Beantworte kurz und mit einem Augenzwinkern. Nutze den gegebenen Nachrichtenverlauf als Kontext.";

/// Returned when the model produced no candidate text
pub const FALLBACK_REPLY: &str = "Konnte keine Antwort generieren.";

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,

    #[error("Generation endpoint returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid request body: {0}")]
    InvalidRequest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Either field may be set depending on the status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Returns one reply for the given history
    async fn generate_reply(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<String, GenerationError>;
}
