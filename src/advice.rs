//! Client for an external chat-completion api used to phrase weekly advice.
//!
//! Failures never reach the caller: every error is logged and surfaces as
//! `None`, which the suggestion service turns into an empty list.

use std::time::Duration;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.mistral.ai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "mistral-medium";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const SYSTEM_PROMPT: &str =
    "You are a professional fitness trainer specializing in progressive overload programming.";

#[async_trait]
pub trait AdviceClient: Send + Sync {
    /// text of the first completion choice, or `None` on any failure
    async fn complete(&self, prompt: &str) -> Option<String>;
}

#[derive(Debug, Error)]
pub enum AdviceError {
    #[error("no api key configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("response contained no choices")]
    NoChoices,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self { role: role.to_string(), content: content.to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, AdviceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
        })
    }

    pub fn request_body(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::new("system", SYSTEM_PROMPT),
                ChatMessage::new("user", prompt),
            ],
        }
    }

    async fn try_complete(&self, prompt: &str) -> Result<String, AdviceError> {
        let api_key = self.api_key.as_deref().ok_or(AdviceError::MissingApiKey)?;
        let resp = self.http.post(&self.url)
            .bearer_auth(api_key)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AdviceError::Status { status: status.as_u16(), body })
        }

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        parsed.choices.into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(AdviceError::NoChoices)
    }
}

#[async_trait]
impl AdviceClient for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Option<String> {
        match self.try_complete(prompt).await {
            Ok(text) => {
                debug!(model = %self.model, n_chars = text.len(), "advice completion received");
                Some(text)
            }
            Err(e) => {
                warn!(error = %e, url = %self.url, "advice completion failed");
                None
            }
        }
    }
}

#[allow(unused)]
#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const PATH: &str = "/v1/chat/completions";

    fn client(url: String, key: Option<&str>) -> ChatCompletionClient {
        ChatCompletionClient::new(url, key.map(String::from), DEFAULT_MODEL, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", PATH)
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "mistral-medium",
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": "what next?" },
                ],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Monday: squat\nWednesday: bench"}},{"message":{"role":"assistant","content":"ignored"}}]}"#)
            .create_async()
            .await;

        let c = client(format!("{}{}", server.url(), PATH), Some("secret"));
        assert_eq!(c.complete("what next?").await.as_deref(), Some("Monday: squat\nWednesday: bench"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_none() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", PATH)
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let c = client(format!("{}{}", server.url(), PATH), Some("secret"));
        assert_eq!(c.try_complete("hi").await.err().map(|e| e.to_string()),
            Some("unexpected status 500: upstream exploded".to_string()));
        assert_eq!(c.complete("hi").await, None);
    }

    #[tokio::test]
    async fn malformed_or_empty_bodies_are_none() {
        let mut server = mockito::Server::new_async().await;
        let _garbage = server.mock("POST", "/garbage")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;
        let _empty = server.mock("POST", "/empty")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let garbage = client(format!("{}/garbage", server.url()), Some("k"));
        assert!(matches!(garbage.try_complete("hi").await, Err(AdviceError::Parse(_))));
        let empty = client(format!("{}/empty", server.url()), Some("k"));
        assert!(matches!(empty.try_complete("hi").await, Err(AdviceError::NoChoices)));
        assert_eq!(empty.complete("hi").await, None);
    }

    #[tokio::test]
    async fn missing_key_never_calls_out() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", PATH)
            .expect(0)
            .create_async()
            .await;

        let c = client(format!("{}{}", server.url(), PATH), Some("  "));
        assert!(matches!(c.try_complete("hi").await, Err(AdviceError::MissingApiKey)));
        assert_eq!(c.complete("hi").await, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_none() {
        // nothing listens on the discard port
        let c = client("http://127.0.0.1:9/v1/chat/completions".to_string(), Some("k"));
        assert_eq!(c.complete("hi").await, None);
    }
}
