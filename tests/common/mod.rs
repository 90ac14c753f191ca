//! Shared test fakes wired against the orchestrator's trait seams

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use signpath_gateway::{
    AvatarVideoRequester, CompletionBackend, ConversationOrchestrator, Error, GesturePrediction,
    GestureService, MemoryStore, Message, OrchestratorParts, Result, SpeechEngine,
    SpeechSequencer, StreamDecoder,
};
use tokio::sync::watch;

/// One scripted `stream()` outcome
pub enum StreamScript {
    /// Emit these byte chunks, then end the stream cleanly
    Chunks(Vec<String>),
    /// Emit these byte chunks, then fail mid-stream
    FailAfter(Vec<String>),
    /// The stream request itself fails
    RequestError(String),
}

/// Wrap a fragment in an SSE frame line
#[must_use]
pub fn delta(fragment: &str) -> String {
    format!(
        "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}}}}]}}\n",
        serde_json::to_string(fragment).unwrap()
    )
}

/// The stream-terminating sentinel line
#[must_use]
pub fn done() -> String {
    "data: [DONE]\n".to_string()
}

/// A clean streamed reply built from content fragments
#[must_use]
pub fn reply(fragments: &[&str]) -> StreamScript {
    let mut chunks: Vec<String> = fragments.iter().map(|f| delta(f)).collect();
    chunks.push(done());
    StreamScript::Chunks(chunks)
}

/// Completion backend that replays scripted outcomes in order
pub struct FakeBackend {
    streams: Mutex<Vec<StreamScript>>,
    completions: Mutex<Vec<Result<String>>>,
    pub stream_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    /// When set, `stream()` blocks until the gate opens
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

impl FakeBackend {
    #[must_use]
    pub fn new(streams: Vec<StreamScript>, completions: Vec<Result<String>>) -> Self {
        Self {
            streams: Mutex::new(streams),
            completions: Mutex::new(completions),
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Make `stream()` block until the returned sender publishes `true`
    #[must_use]
    pub fn gated(self) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        (self, tx)
    }
}

#[async_trait]
impl CompletionBackend for FakeBackend {
    async fn stream(&self, _messages: &[Message]) -> Result<StreamDecoder> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            while !*gate.borrow_and_update() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }

        let script = {
            let mut streams = self.streams.lock().unwrap();
            if streams.is_empty() {
                return Err(Error::Transport("unscripted stream request".to_string()));
            }
            streams.remove(0)
        };

        let events: Vec<Result<Bytes>> = match script {
            StreamScript::Chunks(chunks) => {
                chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect()
            }
            StreamScript::FailAfter(chunks) => chunks
                .into_iter()
                .map(|c| Ok(Bytes::from(c)))
                .chain(std::iter::once(Err(Error::Transport(
                    "connection reset".to_string(),
                ))))
                .collect(),
            StreamScript::RequestError(message) => {
                return Err(Error::Transport(message));
            }
        };

        Ok(StreamDecoder::new(Box::pin(futures::stream::iter(events))))
    }

    async fn complete(&self, _messages: &[Message]) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);

        let mut completions = self.completions.lock().unwrap();
        if completions.is_empty() {
            return Err(Error::Transport("unscripted completion request".to_string()));
        }
        completions.remove(0)
    }
}

/// Synthesis engine fake that plays lines instantly and records them
#[derive(Default)]
pub struct FakeSpeechEngine {
    spoken: Mutex<Vec<String>>,
}

impl FakeSpeechEngine {
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechEngine for FakeSpeechEngine {
    async fn speak_line(&self, line: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(line.to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Gesture service fake used only for avatar video rendering
#[derive(Default)]
pub struct FakeRenderer {
    rendered: Mutex<Vec<String>>,
}

impl FakeRenderer {
    #[must_use]
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl GestureService for FakeRenderer {
    async fn start_camera(&self) -> Result<()> {
        unreachable!("camera is not wired in these tests")
    }

    async fn stop_camera(&self) -> Result<()> {
        unreachable!("camera is not wired in these tests")
    }

    async fn predict(&self) -> Result<GesturePrediction> {
        unreachable!("camera is not wired in these tests")
    }

    async fn reset(&self) -> Result<()> {
        unreachable!("camera is not wired in these tests")
    }

    async fn generate_video(&self, sentence: &str) -> Result<String> {
        let mut rendered = self.rendered.lock().unwrap();
        rendered.push(sentence.to_string());
        Ok(format!("http://fake/video/{}.mp4", rendered.len()))
    }
}

/// A fully wired orchestrator over in-process fakes
pub struct Harness {
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub backend: Arc<FakeBackend>,
    pub engine: Arc<FakeSpeechEngine>,
    pub renderer: Arc<FakeRenderer>,
    pub store: Arc<MemoryStore>,
}

#[must_use]
pub fn harness(backend: FakeBackend) -> Harness {
    let backend = Arc::new(backend);
    let engine = Arc::new(FakeSpeechEngine::default());
    let renderer = Arc::new(FakeRenderer::default());
    let store = Arc::new(MemoryStore::new());

    let orchestrator = Arc::new(ConversationOrchestrator::new(OrchestratorParts {
        backend: backend.clone(),
        store: store.clone(),
        speech: Arc::new(SpeechSequencer::new(engine.clone())),
        avatar: Arc::new(AvatarVideoRequester::new(renderer.clone())),
        voice: None,
        gesture: None,
        system_prompt: "You are a helpful assistant.".to_string(),
        display_max_chars: 1024,
    }));

    Harness {
        orchestrator,
        backend,
        engine,
        renderer,
        store,
    }
}

/// Poll `check` until it passes or the deadline hits
pub async fn wait_for(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}
