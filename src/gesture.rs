//! Gesture camera client and sentence monitoring
//!
//! The gesture service recognizes sign-language gestures from the local
//! camera and accumulates them into a sentence. The monitor polls the
//! prediction endpoint and forwards a sentence once it has settled,
//! resetting the service's accumulator so the next sentence starts
//! clean. The same service also renders gloss sentences into avatar
//! videos (see [`crate::avatar`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// One prediction poll from the gesture service
#[derive(Debug, Clone, Deserialize)]
pub struct GesturePrediction {
    /// Sentence accumulated from recognized gestures so far
    #[serde(default)]
    pub sentence: String,
}

/// Seam over the gesture camera / video rendering service
#[async_trait]
pub trait GestureService: Send + Sync {
    /// Start the camera capture session
    ///
    /// # Errors
    ///
    /// Returns error if the camera cannot be started.
    async fn start_camera(&self) -> Result<()>;

    /// Stop the camera capture session
    ///
    /// # Errors
    ///
    /// Returns error if the service is unreachable.
    async fn stop_camera(&self) -> Result<()>;

    /// Fetch the current accumulated sentence
    ///
    /// # Errors
    ///
    /// Returns error if the service is unreachable.
    async fn predict(&self) -> Result<GesturePrediction>;

    /// Clear the accumulated sentence
    ///
    /// # Errors
    ///
    /// Returns error if the service is unreachable.
    async fn reset(&self) -> Result<()>;

    /// Render a gloss sentence into an avatar video, returning its URL
    ///
    /// # Errors
    ///
    /// Returns error if rendering fails.
    async fn generate_video(&self, sentence: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ServiceStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoResponse {
    #[serde(default)]
    video_url: String,
}

/// HTTP client for the local gesture service
pub struct GestureServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl GestureServiceClient {
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

    async fn get_status(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| Error::Camera(e.to_string()))?;

        let parsed: ServiceStatus = response
            .json()
            .await
            .map_err(|e| Error::Camera(e.to_string()))?;

        if parsed.status != "success" {
            return Err(Error::Camera(
                parsed
                    .message
                    .unwrap_or_else(|| format!("gesture service rejected {path}")),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl GestureService for GestureServiceClient {
    async fn start_camera(&self) -> Result<()> {
        self.get_status("/start_camera").await
    }

    async fn stop_camera(&self) -> Result<()> {
        self.get_status("/stop_camera").await
    }

    async fn predict(&self) -> Result<GesturePrediction> {
        let response = self
            .client
            .get(self.url("/predict"))
            .send()
            .await
            .map_err(|e| Error::Camera(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| Error::Camera(e.to_string()))
    }

    async fn reset(&self) -> Result<()> {
        self.get_status("/reset").await
    }

    async fn generate_video(&self, sentence: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/process_gloss_sentence"))
            .json(&serde_json::json!({ "sentence": sentence }))
            .send()
            .await
            .map_err(|e| Error::Video(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Video(format!("gesture service error {status}")));
        }

        let parsed: VideoResponse = response
            .json()
            .await
            .map_err(|e| Error::Video(e.to_string()))?;

        if parsed.video_url.is_empty() {
            return Err(Error::Video("empty video url".to_string()));
        }
        Ok(parsed.video_url)
    }
}

struct MonitorInner {
    running: bool,
    poll_task: Option<JoinHandle<()>>,
}

/// Polls the gesture service while the camera runs and forwards each
/// settled sentence exactly once.
///
/// A sentence is considered settled when it is non-empty and unchanged
/// across two consecutive polls; the service accumulator is then reset
/// so gestures for the next sentence start from empty.
pub struct GestureMonitor {
    service: Arc<dyn GestureService>,
    sentence_tx: mpsc::Sender<String>,
    poll_interval: Duration,
    inner: Arc<Mutex<MonitorInner>>,
}

impl GestureMonitor {
    #[must_use]
    pub fn new(
        service: Arc<dyn GestureService>,
        sentence_tx: mpsc::Sender<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            service,
            sentence_tx,
            poll_interval,
            inner: Arc::new(Mutex::new(MonitorInner {
                running: false,
                poll_task: None,
            })),
        }
    }

    /// Whether the camera session is running
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// Start the camera and the prediction poll loop. No-op if running.
    ///
    /// # Errors
    ///
    /// Returns error if the camera fails to start.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.running {
            tracing::debug!("camera already running, ignoring start");
            return Ok(());
        }

        self.service.start_camera().await?;
        inner.running = true;
        inner.poll_task = Some(self.spawn_poll_loop());
        tracing::info!("camera session started");
        Ok(())
    }

    /// Stop the poll loop and the camera. Idempotent; a remote stop
    /// failure is logged only.
    pub async fn stop(&self) {
        let task = {
            let mut inner = self.inner.lock().await;
            if !inner.running {
                return;
            }
            inner.running = false;
            inner.poll_task.take()
        };

        if let Some(task) = task {
            task.abort();
        }

        if let Err(e) = self.service.stop_camera().await {
            tracing::warn!(error = %e, "failed to stop camera");
        }
        tracing::info!("camera session stopped");
    }

    /// Toggle: start when stopped, stop when running.
    ///
    /// # Errors
    ///
    /// Returns error if starting the camera fails.
    pub async fn toggle(&self) -> Result<()> {
        if self.is_running().await {
            self.stop().await;
            Ok(())
        } else {
            self.start().await
        }
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let sentence_tx = self.sentence_tx.clone();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut pending: Option<String> = None;

            loop {
                ticker.tick().await;

                let prediction = match service.predict().await {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "gesture poll failed");
                        continue;
                    }
                };

                let sentence = prediction.sentence.trim().to_string();
                if sentence.is_empty() {
                    pending = None;
                    continue;
                }

                // Settled: same non-empty sentence on two consecutive polls
                if pending.as_deref() == Some(sentence.as_str()) {
                    tracing::info!(sentence = %sentence, "gesture sentence settled");
                    pending = None;

                    if let Err(e) = service.reset().await {
                        tracing::warn!(error = %e, "failed to reset gesture accumulator");
                    }
                    if sentence_tx.send(sentence).await.is_err() {
                        tracing::warn!("gesture sentence receiver dropped");
                        return;
                    }
                } else {
                    pending = Some(sentence);
                }
            }
        })
    }
}

impl Drop for GestureMonitor {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(task) = inner.poll_task.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGestureService {
        predictions: StdMutex<Vec<String>>,
        resets: AtomicUsize,
        camera_starts: AtomicUsize,
        camera_stops: AtomicUsize,
    }

    impl ScriptedGestureService {
        fn new(predictions: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                predictions: StdMutex::new(
                    predictions.into_iter().map(String::from).collect(),
                ),
                resets: AtomicUsize::new(0),
                camera_starts: AtomicUsize::new(0),
                camera_stops: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GestureService for ScriptedGestureService {
        async fn start_camera(&self) -> Result<()> {
            self.camera_starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_camera(&self) -> Result<()> {
            self.camera_stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn predict(&self) -> Result<GesturePrediction> {
            let mut predictions = self.predictions.lock().unwrap();
            let sentence = if predictions.is_empty() {
                // Accumulator was reset; nothing recognized since
                String::new()
            } else {
                predictions.remove(0)
            };
            Ok(GesturePrediction { sentence })
        }

        async fn reset(&self) -> Result<()> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn generate_video(&self, _sentence: &str) -> Result<String> {
            unreachable!("monitor never renders videos")
        }
    }

    fn monitor(
        service: Arc<ScriptedGestureService>,
    ) -> (GestureMonitor, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        let monitor = GestureMonitor::new(service, tx, Duration::from_millis(1));
        (monitor, rx)
    }

    #[tokio::test]
    async fn forwards_sentence_after_it_settles() {
        let service = ScriptedGestureService::new(vec![
            "hello",
            "hello how",
            "hello how are you",
            "hello how are you",
        ]);
        let (monitor, mut rx) = monitor(Arc::clone(&service));

        monitor.start().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "hello how are you");
        assert_eq!(service.resets.load(Ordering::SeqCst), 1);
        monitor.stop().await;

        // A growing sentence was never forwarded early
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_predictions_forward_nothing() {
        let service = ScriptedGestureService::new(vec!["", "", ""]);
        let (monitor, mut rx) = monitor(Arc::clone(&service));

        monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.stop().await;

        assert!(rx.try_recv().is_err());
        assert_eq!(service.resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let service = ScriptedGestureService::new(vec![]);
        let (monitor, _rx) = monitor(Arc::clone(&service));

        monitor.start().await.unwrap();
        monitor.start().await.unwrap();
        assert_eq!(service.camera_starts.load(Ordering::SeqCst), 1);
        assert!(monitor.is_running().await);

        monitor.stop().await;
        monitor.stop().await;
        assert_eq!(service.camera_stops.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_running().await);
    }

    #[tokio::test]
    async fn next_sentence_forwards_after_reset() {
        let service = ScriptedGestureService::new(vec![
            "first", "first", "second", "second",
        ]);
        let (monitor, mut rx) = monitor(Arc::clone(&service));

        monitor.start().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");
        assert_eq!(service.resets.load(Ordering::SeqCst), 2);
        monitor.stop().await;
    }
}
