//! Conversation orchestration
//!
//! Ties the completion backend, formatter, speech, avatar and store
//! together behind a single `send_message` pipeline. UI layers observe
//! the conversation through a watch channel snapshot rather than
//! calling into the orchestrator for state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::avatar::AvatarVideoRequester;
use crate::format;
use crate::gesture::GestureMonitor;
use crate::llm::CompletionBackend;
use crate::message::{Message, Role};
use crate::speech::{SpeechSequencer, VoiceInputController};
use crate::store::ConversationStore;
use crate::{Error, Result};

/// Shown in place of the reply when streaming fails before the retry
const STREAM_FAILED_NOTICE: &str =
    "Sorry, something went wrong while generating a response. Retrying without streaming.";

/// Shown when the non-streaming retry fails too
const GENERATION_FAILED_NOTICE: &str =
    "Sorry, I couldn't generate a response. Please try again.";

/// Point-in-time view of the conversation for UI layers
#[derive(Debug, Clone, Default)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    /// True while a reply is being generated
    pub is_generating: bool,
    /// Whether the latest turn originated from voice input
    pub via_voice: bool,
}

/// Everything the orchestrator is wired from
pub struct OrchestratorParts {
    pub backend: Arc<dyn CompletionBackend>,
    pub store: Arc<dyn ConversationStore>,
    pub speech: Arc<SpeechSequencer>,
    pub avatar: Arc<AvatarVideoRequester>,
    pub voice: Option<Arc<VoiceInputController>>,
    pub gesture: Option<Arc<GestureMonitor>>,
    /// System prompt prepended to every completion request
    pub system_prompt: String,
    /// Display cap applied by the formatter
    pub display_max_chars: usize,
}

#[derive(Debug, Clone)]
struct Selection {
    user_id: String,
    conversation_id: String,
}

struct State {
    messages: Vec<Message>,
    selected: Option<Selection>,
    via_voice: bool,
}

/// Drives one conversation: turn pipeline, persistence and side effects.
///
/// `send_message` never returns an error to the caller; failures become
/// assistant-visible messages so the conversation stays coherent. At
/// most one turn generates at a time, and a `send_message` issued while
/// one is in flight is dropped.
pub struct ConversationOrchestrator {
    backend: Arc<dyn CompletionBackend>,
    store: Arc<dyn ConversationStore>,
    speech: Arc<SpeechSequencer>,
    avatar: Arc<AvatarVideoRequester>,
    voice: Option<Arc<VoiceInputController>>,
    gesture: Option<Arc<GestureMonitor>>,
    system_prompt: String,
    display_max_chars: usize,
    generating: AtomicBool,
    // Flips to true exactly once; also aborts the in-flight turn
    disposed: watch::Sender<bool>,
    state: Mutex<State>,
    snapshot_tx: watch::Sender<ConversationSnapshot>,
}

impl ConversationOrchestrator {
    #[must_use]
    pub fn new(parts: OrchestratorParts) -> Self {
        let (snapshot_tx, _) = watch::channel(ConversationSnapshot::default());
        let (disposed, _) = watch::channel(false);
        Self {
            backend: parts.backend,
            store: parts.store,
            speech: parts.speech,
            avatar: parts.avatar,
            voice: parts.voice,
            gesture: parts.gesture,
            system_prompt: parts.system_prompt,
            display_max_chars: parts.display_max_chars,
            generating: AtomicBool::new(false),
            disposed,
            state: Mutex::new(State {
                messages: Vec::new(),
                selected: None,
                via_voice: false,
            }),
            snapshot_tx,
        }
    }

    /// Subscribe to conversation snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Latest snapshot
    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Whether a reply is currently being generated
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    /// Index of the reply line currently being spoken
    #[must_use]
    pub fn current_line(&self) -> watch::Receiver<Option<usize>> {
        self.speech.current_line()
    }

    /// Current avatar video asset URL
    #[must_use]
    pub fn asset_url(&self) -> watch::Receiver<Option<String>> {
        self.avatar.asset_url()
    }

    /// Run one conversation turn.
    ///
    /// Blank input is rejected, and a turn already in flight drops this
    /// one. The user message is appended and persisted, the reply is
    /// streamed into a placeholder assistant message (formatted running
    /// total, replaced wholesale per fragment), and on completion the
    /// reply is spoken (voice turns only), rendered as an avatar video,
    /// and persisted. A streaming failure or empty reply is surfaced in
    /// the conversation and retried exactly once without streaming.
    pub async fn send_message(&self, text: &str, via_voice: bool) {
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("ignoring blank message");
            return;
        }
        if *self.disposed.borrow() {
            return;
        }
        if self
            .generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("generation already in flight, dropping message");
            return;
        }

        // Disposal aborts the turn outright, dropping the stream even if
        // the transport has stalled and will never yield another chunk
        let mut disposal = self.disposed.subscribe();
        tokio::select! {
            () = self.run_turn(text, via_voice) => {}
            _ = disposal.wait_for(|&d| d) => {
                tracing::debug!("turn abandoned at disposal");
            }
        }

        self.generating.store(false, Ordering::SeqCst);
        self.publish().await;
    }

    async fn run_turn(&self, text: &str, via_voice: bool) {
        tracing::info!(via_voice, chars = text.len(), "starting turn");

        {
            let mut state = self.state.lock().await;
            state.via_voice = via_voice;
            state.messages.push(Message::user(text));
        }
        self.publish().await;
        self.persist().await;

        let history = self.request_messages().await;

        match self.stream_response(&history).await {
            Ok(display) => {
                self.finish_reply(&display, via_voice).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "streaming failed, retrying without streaming");
                self.set_reply_text(STREAM_FAILED_NOTICE).await;
                self.publish().await;
                self.fallback(&history, via_voice).await;
            }
        }
    }

    /// Stream the reply into a placeholder assistant message.
    ///
    /// The placeholder is appended only once the stream request itself
    /// has succeeded, so a failed request leaves no empty message.
    async fn stream_response(&self, history: &[Message]) -> Result<String> {
        let mut decoder = self.backend.stream(history).await?;

        {
            let mut state = self.state.lock().await;
            state.messages.push(Message::assistant(""));
        }
        self.publish().await;

        let mut accumulated = String::new();
        while let Some(fragment) = decoder.next_fragment().await {
            accumulated.push_str(&fragment?);
            let display = format::format(&accumulated, self.display_max_chars);
            self.set_reply_text(&display).await;
            self.publish().await;
        }

        if accumulated.trim().is_empty() {
            return Err(Error::Transport("empty streamed response".to_string()));
        }
        Ok(format::format(&accumulated, self.display_max_chars))
    }

    /// One non-streaming retry after a streaming failure
    async fn fallback(&self, history: &[Message], via_voice: bool) {
        match self.backend.complete(history).await {
            Ok(content) => {
                let display = format::format(&content, self.display_max_chars);
                self.set_reply_text(&display).await;
                self.publish().await;
                self.finish_reply(&display, via_voice).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "non-streaming retry failed");
                self.set_reply_text(GENERATION_FAILED_NOTICE).await;
                self.publish().await;
                self.persist().await;
            }
        }
    }

    /// Completed-reply side effects: speech (voice turns), avatar video,
    /// persistence. Speech and video run concurrently; neither delays
    /// the turn's completion.
    async fn finish_reply(&self, display: &str, via_voice: bool) {
        if via_voice {
            let speech = Arc::clone(&self.speech);
            let text = display.to_string();
            tokio::spawn(async move { speech.speak(&text).await });
        }
        let _ = self.avatar.request(display);
        self.persist().await;
    }

    /// Full request payload: system prompt plus the visible history
    async fn request_messages(&self) -> Vec<Message> {
        let state = self.state.lock().await;
        let mut history = Vec::with_capacity(state.messages.len() + 1);
        history.push(Message::system(self.system_prompt.clone()));
        history.extend(state.messages.iter().cloned());
        history
    }

    /// Replace the in-progress assistant message, appending one if the
    /// last message is not an assistant message
    async fn set_reply_text(&self, text: &str) {
        let mut state = self.state.lock().await;
        match state.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                text.clone_into(&mut last.content);
            }
            _ => state.messages.push(Message::assistant(text)),
        }
    }

    async fn publish(&self) {
        let state = self.state.lock().await;
        // send_replace stores the snapshot even with no subscribers yet,
        // so snapshot() always reflects the latest state
        self.snapshot_tx.send_replace(ConversationSnapshot {
            messages: state.messages.clone(),
            is_generating: self.generating.load(Ordering::SeqCst),
            via_voice: state.via_voice,
        });
    }

    /// Write the history through to the store, if a conversation is
    /// selected. Persistence failures never interrupt the turn.
    async fn persist(&self) {
        let (selection, messages) = {
            let state = self.state.lock().await;
            (state.selected.clone(), state.messages.clone())
        };

        let Some(selection) = selection else { return };

        if let Err(e) = self
            .store
            .update_messages(&selection.user_id, &selection.conversation_id, &messages)
            .await
        {
            tracing::warn!(
                error = %e,
                conversation = %selection.conversation_id,
                "failed to persist conversation"
            );
        }
    }

    /// Create and select a fresh conversation for `user_id`
    ///
    /// # Errors
    ///
    /// Returns error if the store rejects the new record.
    pub async fn new_conversation(&self, user_id: &str, name: &str) -> Result<String> {
        let record = self.store.create(user_id, name).await?;

        let mut state = self.state.lock().await;
        state.messages.clear();
        state.selected = Some(Selection {
            user_id: user_id.to_string(),
            conversation_id: record.id.clone(),
        });
        drop(state);

        self.publish().await;
        Ok(record.id)
    }

    /// Select an existing conversation and load its history
    ///
    /// # Errors
    ///
    /// Returns error if the conversation does not exist for the user.
    pub async fn select_conversation(&self, user_id: &str, id: &str) -> Result<()> {
        let record = self
            .store
            .get(user_id, id)
            .await?
            .ok_or_else(|| Error::Validation(format!("conversation {id} not found")))?;

        let mut state = self.state.lock().await;
        state.messages = record.messages;
        state.selected = Some(Selection {
            user_id: user_id.to_string(),
            conversation_id: record.id,
        });
        drop(state);

        self.publish().await;
        Ok(())
    }

    /// Drop the history and the selection (back to a scratch session)
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.messages.clear();
        state.selected = None;
        state.via_voice = false;
        drop(state);

        self.publish().await;
    }

    /// Interrupt the spoken reply, if any
    pub async fn cancel_speech(&self) {
        self.speech.cancel().await;
    }

    /// Toggle the voice recording session
    ///
    /// # Errors
    ///
    /// Returns error if voice input is not wired or fails to start.
    pub async fn toggle_voice_input(&self) -> Result<()> {
        match &self.voice {
            Some(voice) => voice.toggle().await,
            None => Err(Error::Recognition("voice input not configured".to_string())),
        }
    }

    /// Toggle the gesture camera session
    ///
    /// # Errors
    ///
    /// Returns error if the camera is not wired or fails to start.
    pub async fn toggle_camera(&self) -> Result<()> {
        match &self.gesture {
            Some(gesture) => gesture.toggle().await,
            None => Err(Error::Camera("gesture camera not configured".to_string())),
        }
    }

    /// Forward finalized voice transcripts into the conversation
    pub fn spawn_transcript_loop(
        self: &Arc<Self>,
        mut transcripts: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(text) = transcripts.recv().await {
                if *orchestrator.disposed.borrow() {
                    return;
                }
                orchestrator.send_message(&text, true).await;
            }
        })
    }

    /// Forward settled gesture sentences into the conversation
    pub fn spawn_sentence_loop(
        self: &Arc<Self>,
        mut sentences: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(text) = sentences.recv().await {
                if *orchestrator.disposed.borrow() {
                    return;
                }
                orchestrator.send_message(&text, false).await;
            }
        })
    }

    /// Tear everything down: abandon the in-flight stream, silence
    /// speech, stop voice and camera sessions. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.send_replace(true) {
            return;
        }
        tracing::info!("disposing orchestrator");

        self.speech.cancel().await;
        if let Some(voice) = &self.voice {
            voice.stop().await;
        }
        if let Some(gesture) = &self.gesture {
            gesture.stop().await;
        }
    }
}
