use std::time::Duration;

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, GenerationClient, GenerationError};
use crate::livechat::message_window::Message;

/// Calls the `/api/chat` route over HTTP
#[derive(Clone, Debug)]
pub struct HttpGenerationClient {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpGenerationClient {
    /// # Arguments
    /// * `endpoint` - Full URL of the route, e.g. `http://localhost:3000/api/chat`
    pub fn new(endpoint: &str) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.to_string(),
            http,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate_reply(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<String, GenerationError> {
        let request = ChatRequest {
            messages: messages.to_vec(),
            system_prompt: system_prompt.map(str::to_string),
        };
        tracing::debug!(
            target: "livechat::generation::client",
            "Requesting reply for {} messages from {}",
            request.messages.len(),
            self.endpoint
        );

        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ChatResponse>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| status.to_string());
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json().await?;
        Ok(body.reply.unwrap_or_default())
    }
}
