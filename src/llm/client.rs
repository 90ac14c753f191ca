//! Chat completion client (streaming plus non-streaming fallback)

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::CompletionConfig;
use crate::message::Message;
use crate::{Error, Result};

use super::StreamDecoder;

/// Seam between the orchestrator and the completion API
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Start a streaming completion over the given message history
    ///
    /// # Errors
    ///
    /// Returns error on request failure or a non-success HTTP status.
    async fn stream(&self, messages: &[Message]) -> Result<StreamDecoder>;

    /// One-shot non-streaming completion over the same payload
    ///
    /// # Errors
    ///
    /// Returns error on request failure, a non-success HTTP status, or
    /// an empty response body.
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// Request body for the chat completions endpoint
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f64>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    stream: bool,
}

/// Non-streaming response body
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// HTTP client for an OpenAI-compatible completion API
pub struct CompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl CompletionClient {
    #[must_use]
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn request<'a>(&'a self, messages: &'a [Message], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            top_k: self.config.top_k,
            repetition_penalty: self.config.repetition_penalty,
            stop: &self.config.stop,
            stream,
        }
    }

    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let body = self.request(messages, stream);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "completion API error");
            return Err(Error::Transport(format!(
                "completion API error {status}: {body}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn stream(&self, messages: &[Message]) -> Result<StreamDecoder> {
        tracing::debug!(
            model = %self.config.model,
            history = messages.len(),
            "starting streaming completion"
        );

        let response = self.send(messages, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Transport(e.to_string())));

        Ok(StreamDecoder::new(Box::pin(bytes)))
    }

    async fn complete(&self, messages: &[Message]) -> Result<String> {
        tracing::debug!(
            model = %self.config.model,
            history = messages.len(),
            "starting non-streaming completion"
        );

        let response = self.send(messages, false).await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse completion response");
            Error::Transport(e.to_string())
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(Error::Transport("empty completion response".to_string()));
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_roles_and_sampling_params() {
        let config = CompletionConfig {
            model: "m".to_string(),
            stop: vec!["<|eot|>".to_string()],
            ..CompletionConfig::default()
        };
        let client = CompletionClient::new(config);
        let messages = vec![Message::system("sys"), Message::user("hi")];

        let body = serde_json::to_value(client.request(&messages, true)).unwrap();

        assert_eq!(body["model"], "m");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["stop"][0], "<|eot|>");
        assert!(body.get("top_k").is_some());
    }

    #[test]
    fn unset_optional_params_are_omitted() {
        let config = CompletionConfig {
            top_k: None,
            repetition_penalty: None,
            stop: Vec::new(),
            ..CompletionConfig::default()
        };
        let client = CompletionClient::new(config);
        let messages = vec![Message::user("hi")];

        let body = serde_json::to_value(client.request(&messages, false)).unwrap();

        assert!(body.get("top_k").is_none());
        assert!(body.get("repetition_penalty").is_none());
        assert!(body.get("stop").is_none());
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn response_content_is_first_choice() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello");
    }
}
