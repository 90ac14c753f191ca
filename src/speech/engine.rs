//! Speech synthesis engine seam

use async_trait::async_trait;
use serde::Deserialize;

use crate::{Error, Result};

/// A synthesis engine that plays one line of text at a time
///
/// `speak_line` resolves when the line has finished playing or the
/// engine was stopped; `stop` interrupts the line currently playing.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Play a single line to completion
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails to play the line.
    async fn speak_line(&self, line: &str) -> Result<()>;

    /// Interrupt the currently playing line immediately
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be reached.
    async fn stop(&self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct EngineResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Synthesis engine fronted by the local speech service
pub struct RemoteSpeechEngine {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteSpeechEngine {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Synthesis(format!("speech service error {status}")));
        }

        let parsed: EngineResponse = response
            .json()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if parsed.status != "success" {
            return Err(Error::Synthesis(
                parsed.message.unwrap_or_else(|| "synthesis failed".to_string()),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl SpeechEngine for RemoteSpeechEngine {
    async fn speak_line(&self, line: &str) -> Result<()> {
        self.post("/speak", serde_json::json!({ "text": line })).await
    }

    async fn stop(&self) -> Result<()> {
        self.post("/cancel_speech", serde_json::json!({})).await
    }
}
