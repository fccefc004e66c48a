//! The `POST /api/chat` route.
//!
//! Stateless pass-through: renders the transcript, calls the completion API once, and
//! answers `{ "reply": ... }`. Every failure collapses into one of two fixed 500 bodies.
//! There is no retry, backoff or caching here.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transcript::{entries_from_value, render_transcript, user_prompt};
use super::{ChatResponse, DEFAULT_SYSTEM_PROMPT, FALLBACK_REPLY, GenerationError};

pub const CHAT_ROUTE: &str = "/api/chat";

const MISSING_KEY_BODY: &str = "OPENAI_API_KEY fehlt auf dem Server";
const UPSTREAM_FAILURE_BODY: &str = "Fehler bei der OpenAI-Anfrage";

#[derive(Clone)]
pub struct ProxyConfig {
    /// Credential for the completion API. Requests fail closed while it is unset.
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API, without trailing slash
    pub base_url: String,

    pub model: String,

    /// Upper bound on generated tokens per reply
    pub max_tokens: u32,

    pub bind_addr: SocketAddr,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 150,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl ProxyConfig {
    /// Reads the process environment after loading a `.env` file if one exists
    pub fn from_env() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(target: "livechat::generation::config", "No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL`,
    /// `OPENAI_MAX_TOKENS` and `GENERATION_PROXY_ADDR`, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_addr = match get("GENERATION_PROXY_ADDR") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("Invalid GENERATION_PROXY_ADDR: {}", addr))?,
            None => defaults.bind_addr,
        };
        let max_tokens = match get("OPENAI_MAX_TOKENS") {
            Some(value) => value
                .parse()
                .with_context(|| format!("Invalid OPENAI_MAX_TOKENS: {}", value))?,
            None => defaults.max_tokens,
        };

        Ok(Self {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: get("OPENAI_MODEL").unwrap_or(defaults.model),
            max_tokens,
            bind_addr,
        })
    }
}

#[derive(Clone)]
pub struct ProxyState {
    config: Arc<ProxyConfig>,
    http: reqwest::Client,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            config: Arc::new(config),
            http,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route(CHAT_ROUTE, post(handle_chat))
        .with_state(state)
}

/// Binds `config.bind_addr` and serves the route until the task is cancelled
pub async fn serve(config: ProxyConfig) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr;
    if config.api_key.is_none() {
        tracing::warn!(
            target: "livechat::generation::server",
            "OPENAI_API_KEY is not set, every request will be answered with 500"
        );
    }
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!(
        target: "livechat::generation::server",
        "Generation proxy listening on {}",
        listener.local_addr()?
    );
    axum::serve(listener, router(ProxyState::new(config)))
        .await
        .context("Generation proxy stopped")
}

/// Every failure of the route, answered with one of two fixed bodies
#[derive(Debug)]
struct ProxyError(GenerationError);

impl From<GenerationError> for ProxyError {
    fn from(error: GenerationError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match &self.0 {
            GenerationError::MissingApiKey => MISSING_KEY_BODY,
            e => {
                tracing::error!(
                    target: "livechat::generation::server",
                    "Completion request failed: {}",
                    e
                );
                UPSTREAM_FAILURE_BODY
            }
        };
        let response = ChatResponse {
            reply: None,
            error: Some(body.to_string()),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
    }
}

async fn handle_chat(
    State(state): State<ProxyState>,
    body: Bytes,
) -> Result<Json<ChatResponse>, ProxyError> {
    let api_key = state
        .config
        .api_key
        .as_deref()
        .ok_or(GenerationError::MissingApiKey)?;
    let reply = complete(&state, api_key, &body).await?;
    Ok(Json(ChatResponse {
        reply: Some(reply),
        error: None,
    }))
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

async fn complete(
    state: &ProxyState,
    api_key: &str,
    body: &[u8],
) -> Result<String, GenerationError> {
    let request: Value = serde_json::from_slice(body)?;
    if request.is_null() {
        return Err(GenerationError::InvalidRequest(
            "request body is null".to_string(),
        ));
    }

    // Bodies that are not objects have no fields and render the empty history
    let entries = entries_from_value(request.get("messages").unwrap_or(&Value::Null))?;
    let system_prompt = request
        .get("systemPrompt")
        .and_then(Value::as_str)
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let transcript = render_transcript(&entries);

    tracing::debug!(
        target: "livechat::generation::complete",
        "Requesting completion for {} messages with model {}",
        entries.len(),
        state.config.model
    );

    let completion = CompletionRequest {
        model: &state.config.model,
        messages: vec![
            CompletionMessage {
                role: "system",
                content: system_prompt.to_string(),
            },
            CompletionMessage {
                role: "user",
                content: user_prompt(&transcript),
            },
        ],
        max_tokens: state.config.max_tokens,
    };

    let response = state
        .http
        .post(format!("{}/chat/completions", state.config.base_url))
        .bearer_auth(api_key)
        .json(&completion)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(GenerationError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let parsed: CompletionResponse = response.json().await?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .unwrap_or_else(|| FALLBACK_REPLY.to_string()))
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    use super::*;

    /// Serves the route on an ephemeral port and returns its base URL
    async fn spawn_proxy(config: ProxyConfig) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(ProxyState::new(config)))
                .await
                .unwrap();
        });
        format!("http://{}", addr)
    }

    fn config_for(upstream: &ServerGuard, api_key: Option<&str>) -> ProxyConfig {
        ProxyConfig {
            api_key: api_key.map(str::to_string),
            base_url: upstream.url(),
            ..ProxyConfig::default()
        }
    }

    fn completion_body(content: Option<&str>) -> String {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    async fn post_chat(base: &str, body: Value) -> (u16, ChatResponse) {
        let response = reqwest::Client::new()
            .post(format!("{}{}", base, CHAT_ROUTE))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_empty_history_renders_placeholder() {
        let mut upstream = Server::new_async().await;
        let mock = upstream
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 150,
                "messages": [
                    {"role": "system", "content": DEFAULT_SYSTEM_PROMPT},
                    {"role": "user", "content": "Bisherige Nachrichten:\nKeine Nachrichten vorhanden.\n\nGib eine kurze, sarkastische Antwort."}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(Some("Wie gesprächig hier.")))
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let (status, body) = post_chat(&base, json!({"messages": []})).await;

        assert_eq!(status, 200);
        assert_eq!(body.reply.as_deref(), Some("Wie gesprächig hier."));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transcript_and_custom_prompt_are_forwarded() {
        let mut upstream = Server::new_async().await;
        let mock = upstream
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "messages": [
                    {"role": "system", "content": "Sei nett."},
                    {"role": "user", "content": "Bisherige Nachrichten:\n- alice: hi\n- unbekannt: yo\n\nGib eine kurze, sarkastische Antwort."}
                ]
            })))
            .with_status(200)
            .with_body(completion_body(Some("ok")))
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let (status, body) = post_chat(
            &base,
            json!({
                "messages": [{"owner": "alice", "text": "hi"}, {"text": "yo"}],
                "systemPrompt": "Sei nett."
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body.reply.as_deref(), Some("ok"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_system_prompt_uses_default() {
        let mut upstream = Server::new_async().await;
        let mock = upstream
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "messages": [{"role": "system", "content": DEFAULT_SYSTEM_PROMPT}]
            })))
            .with_status(200)
            .with_body(completion_body(Some("ok")))
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let (status, _) = post_chat(&base, json!({"messages": [], "systemPrompt": ""})).await;

        assert_eq!(status, 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_choice_content_falls_back() {
        let mut upstream = Server::new_async().await;
        upstream
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(completion_body(None))
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let (status, body) = post_chat(&base, json!({"messages": []})).await;

        assert_eq!(status, 200);
        assert_eq!(body.reply.as_deref(), Some(FALLBACK_REPLY));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_closed() {
        let mut upstream = Server::new_async().await;
        let mock = upstream
            .mock("POST", "/chat/completions")
            .expect(0)
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, None)).await;

        let (status, body) = post_chat(&base, json!({"messages": []})).await;

        assert_eq!(status, 500);
        assert_eq!(body.error.as_deref(), Some(MISSING_KEY_BODY));
        assert_eq!(body.reply, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_failure_maps_to_fixed_body() {
        let mut upstream = Server::new_async().await;
        upstream
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"rate limited"}}"#)
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let (status, body) = post_chat(&base, json!({"messages": []})).await;

        assert_eq!(status, 500);
        assert_eq!(body.error.as_deref(), Some(UPSTREAM_FAILURE_BODY));
    }

    #[tokio::test]
    async fn test_malformed_body_maps_to_fixed_body() {
        let upstream = Server::new_async().await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let response = reqwest::Client::new()
            .post(format!("{}{}", base, CHAT_ROUTE))
            .body("not json")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 500);
        let body: ChatResponse = response.json().await.unwrap();
        assert_eq!(body.error.as_deref(), Some(UPSTREAM_FAILURE_BODY));
    }

    #[tokio::test]
    async fn test_null_message_or_body_maps_to_fixed_body() {
        let mut upstream = Server::new_async().await;
        let mock = upstream
            .mock("POST", "/chat/completions")
            .expect(0)
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let (status, body) =
            post_chat(&base, json!({"messages": [{"owner": "bob", "text": "hi"}, null]})).await;
        assert_eq!(status, 500);
        assert_eq!(body.error.as_deref(), Some(UPSTREAM_FAILURE_BODY));

        let (status, body) = post_chat(&base, Value::Null).await;
        assert_eq!(status, 500);
        assert_eq!(body.error.as_deref(), Some(UPSTREAM_FAILURE_BODY));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_object_body_renders_placeholder() {
        let mut upstream = Server::new_async().await;
        let mock = upstream
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "messages": [
                    {"role": "user", "content": "Bisherige Nachrichten:\nKeine Nachrichten vorhanden.\n\nGib eine kurze, sarkastische Antwort."}
                ]
            })))
            .with_status(200)
            .with_body(completion_body(Some("ok")))
            .expect(2)
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let (status, _) = post_chat(&base, json!([{"owner": "bob", "text": "hi"}])).await;
        assert_eq!(status, 200);
        let (status, body) = post_chat(&base, json!(42)).await;
        assert_eq!(status, 200);
        assert_eq!(body.reply.as_deref(), Some("ok"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_scalar_fields_are_forwarded_as_text() {
        let mut upstream = Server::new_async().await;
        let mock = upstream
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "messages": [
                    {"role": "user", "content": "Bisherige Nachrichten:\n- bob: 42\n- 7: true\n\nGib eine kurze, sarkastische Antwort."}
                ]
            })))
            .with_status(200)
            .with_body(completion_body(Some("ok")))
            .create_async()
            .await;
        let base = spawn_proxy(config_for(&upstream, Some("sk-test"))).await;

        let (status, _) = post_chat(
            &base,
            json!({"messages": [{"owner": "bob", "text": 42}, {"owner": 7, "text": true}]}),
        )
        .await;

        assert_eq!(status, 200);
        mock.assert_async().await;
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ProxyConfig::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-live".to_string()),
            "OPENAI_BASE_URL" => Some("http://localhost:9000/v1/".to_string()),
            "GENERATION_PROXY_ADDR" => Some("0.0.0.0:8080".to_string()),
            "OPENAI_MODEL" => Some("  ".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("sk-live"));
        assert_eq!(config.base_url, "http://localhost:9000/v1");
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_tokens, 150);
        assert!(!format!("{:?}", config).contains("sk-live"));
    }

    #[test]
    fn test_config_rejects_bad_address() {
        let result = ProxyConfig::from_lookup(|key| {
            (key == "GENERATION_PROXY_ADDR").then(|| "not an address".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_api_key_counts_as_missing() {
        let config =
            ProxyConfig::from_lookup(|key| (key == "OPENAI_API_KEY").then(String::new)).unwrap();
        assert!(config.api_key.is_none());
    }
}
