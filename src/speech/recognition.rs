//! Voice input via the remote speech recognition service
//!
//! The service exposes `POST /start_speech`, `GET /get_speech` and
//! `POST /stop_speech`. A recording session is polled on a fixed
//! interval; the finalized transcript is forwarded exactly once per
//! session, after which the session stops itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Recording state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No session
    Idle,
    /// Remote session start requested
    Starting,
    /// Session active, polling for results
    Recording,
    /// Remote session stop requested
    Stopping,
}

/// One poll result from the recognition service
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechPoll {
    pub is_recording: bool,
    #[serde(default)]
    pub text: String,
}

/// Seam over the remote recognition service
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Start a remote recognition session
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be started.
    async fn start(&self) -> Result<()>;

    /// Fetch the session's current recording flag and transcript
    ///
    /// # Errors
    ///
    /// Returns error if the service is unreachable.
    async fn poll(&self) -> Result<SpeechPoll>;

    /// Stop the remote session
    ///
    /// # Errors
    ///
    /// Returns error if the service is unreachable.
    async fn stop(&self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ServiceStatus {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetSpeechResponse {
    #[serde(default)]
    is_recording: bool,
    #[serde(default)]
    text: String,
}

/// HTTP client for the local speech recognition service
pub struct SpeechServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl SpeechServiceClient {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl RecognitionService for SpeechServiceClient {
    async fn start(&self) -> Result<()> {
        let response = self
            .client
            .post(self.url("/start_speech"))
            .send()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        let parsed: ServiceStatus = response
            .json()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        if parsed.status != "success" {
            return Err(Error::Recognition(
                parsed
                    .message
                    .unwrap_or_else(|| "failed to start recognition".to_string()),
            ));
        }
        Ok(())
    }

    async fn poll(&self) -> Result<SpeechPoll> {
        let response = self
            .client
            .get(self.url("/get_speech"))
            .send()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        let parsed: GetSpeechResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        Ok(SpeechPoll {
            is_recording: parsed.is_recording,
            text: parsed.text,
        })
    }

    async fn stop(&self) -> Result<()> {
        let response = self
            .client
            .post(self.url("/stop_speech"))
            .send()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        // Stop replies with the final transcript too; only the status matters here
        let parsed: ServiceStatus = response
            .json()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        if parsed.status != "success" {
            tracing::debug!(message = ?parsed.message, "remote stop reported non-success");
        }
        Ok(())
    }
}

struct ControllerInner {
    state: RecorderState,
    last_emitted: Option<String>,
    remote_recording: bool,
    poll_task: Option<JoinHandle<()>>,
}

/// Starts, polls and stops remote recognition sessions.
///
/// At most one session is live at a time; `start` while a session is
/// live is a no-op. A finalized transcript (non-empty, changed, and
/// reported with `is_recording == false`) is forwarded exactly once on
/// the transcript channel, after which the session stops itself. The
/// remote session is stopped before the transcript is forwarded, so a
/// consumer that immediately sends a message can never overlap two
/// recording sessions.
pub struct VoiceInputController {
    service: Arc<dyn RecognitionService>,
    transcript_tx: mpsc::Sender<String>,
    poll_interval: Duration,
    inner: Arc<Mutex<ControllerInner>>,
}

impl VoiceInputController {
    #[must_use]
    pub fn new(
        service: Arc<dyn RecognitionService>,
        transcript_tx: mpsc::Sender<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            service,
            transcript_tx,
            poll_interval,
            inner: Arc::new(Mutex::new(ControllerInner {
                state: RecorderState::Idle,
                last_emitted: None,
                remote_recording: false,
                poll_task: None,
            })),
        }
    }

    /// Current state
    pub async fn state(&self) -> RecorderState {
        self.inner.lock().await.state
    }

    /// Whether the remote session reported itself actively listening
    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.remote_recording
    }

    /// Start a recording session. No-op while one is starting or live.
    ///
    /// # Errors
    ///
    /// Returns error if the remote session fails to start; the
    /// controller is back in `Idle` when it does.
    pub async fn start(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, RecorderState::Starting | RecorderState::Recording) {
                tracing::debug!("recording session already live, ignoring start");
                return Ok(());
            }
            inner.state = RecorderState::Starting;
        }

        if let Err(e) = self.service.start().await {
            tracing::warn!(error = %e, "failed to start recognition session");
            self.inner.lock().await.state = RecorderState::Idle;
            return Err(e);
        }

        let mut inner = self.inner.lock().await;
        if inner.state != RecorderState::Starting {
            // stop() won the race while the remote start was in flight;
            // shut the late-opened remote session back down
            drop(inner);
            tracing::debug!("session stopped during start, not recording");
            if let Err(e) = self.service.stop().await {
                tracing::warn!(error = %e, "remote session stop failed");
            }
            return Ok(());
        }
        inner.state = RecorderState::Recording;
        inner.last_emitted = None;
        inner.poll_task = Some(self.spawn_poll_loop());
        tracing::info!("recording session started");
        Ok(())
    }

    /// Stop the session. Idempotent; always reaches `Idle` locally even
    /// if the remote is unreachable (remote failure is logged only).
    pub async fn stop(&self) {
        let task = {
            let mut inner = self.inner.lock().await;
            if inner.state == RecorderState::Idle && inner.poll_task.is_none() {
                return;
            }
            inner.state = RecorderState::Stopping;
            inner.poll_task.take()
        };

        if let Some(task) = task {
            task.abort();
        }

        if let Err(e) = self.service.stop().await {
            tracing::warn!(error = %e, "remote session stop failed");
        }

        let mut inner = self.inner.lock().await;
        inner.state = RecorderState::Idle;
        inner.remote_recording = false;
        tracing::info!("recording session stopped");
    }

    /// Toggle: start when idle, stop when live.
    ///
    /// # Errors
    ///
    /// Returns error if starting a new session fails.
    pub async fn toggle(&self) -> Result<()> {
        let state = self.state().await;
        if matches!(state, RecorderState::Starting | RecorderState::Recording) {
            self.stop().await;
            Ok(())
        } else {
            self.start().await
        }
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let transcript_tx = self.transcript_tx.clone();
        let inner = Arc::clone(&self.inner);
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                let poll = match service.poll().await {
                    Ok(poll) => poll,
                    Err(e) => {
                        tracing::warn!(error = %e, "recognition poll failed");
                        continue;
                    }
                };

                let transcript = {
                    let mut guard = inner.lock().await;
                    guard.remote_recording = poll.is_recording;

                    let text = poll.text.trim();
                    let finalized = !poll.is_recording
                        && !text.is_empty()
                        && guard.last_emitted.as_deref() != Some(text);

                    if finalized {
                        guard.last_emitted = Some(text.to_string());
                        Some(text.to_string())
                    } else {
                        None
                    }
                };

                if let Some(transcript) = transcript {
                    tracing::info!(transcript = %transcript, "transcript finalized");

                    // Stop the session before forwarding so the consumer's
                    // next send_message can never overlap a live session
                    if let Err(e) = service.stop().await {
                        tracing::warn!(error = %e, "remote session stop failed");
                    }
                    {
                        let mut guard = inner.lock().await;
                        guard.state = RecorderState::Idle;
                        guard.remote_recording = false;
                        guard.poll_task = None;
                    }

                    if transcript_tx.send(transcript).await.is_err() {
                        tracing::warn!("transcript receiver dropped");
                    }
                    return;
                }
            }
        })
    }
}

impl Drop for VoiceInputController {
    fn drop(&mut self) {
        // Poll task must not outlive the controller
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(task) = inner.poll_task.take() {
                task.abort();
            }
        }
    }
}
