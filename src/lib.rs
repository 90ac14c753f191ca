//! Signpath Gateway - Conversation core for a multimodal sign-language assistant
//!
//! This library provides the orchestration core behind a text / voice /
//! gesture conversational front-end:
//! - Streaming chat completions (SSE frame decoding, fallback retry)
//! - Display formatting of the running reply
//! - Line-by-line speech synthesis with highlighting
//! - Voice transcription and gesture camera polling
//! - Signing-avatar video requests
//! - Conversation persistence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Front-ends                         │
//! │   CLI  │  Voice session  │  Gesture camera          │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Signpath Gateway                        │
//! │  Orchestrator │ Formatter │ Speech │ Avatar │ Store │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Local services                         │
//! │   Completion API │ Speech service │ Gesture service │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod avatar;
pub mod config;
pub mod error;
pub mod format;
pub mod gesture;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod speech;
pub mod store;

pub use avatar::AvatarVideoRequester;
pub use config::Config;
pub use error::{Error, Result};
pub use format::TRUNCATION_NOTICE;
pub use gesture::{GestureMonitor, GesturePrediction, GestureService, GestureServiceClient};
pub use llm::{ByteStream, CompletionBackend, CompletionClient, StreamDecoder};
pub use message::{Message, Role};
pub use orchestrator::{ConversationOrchestrator, ConversationSnapshot, OrchestratorParts};
pub use speech::{
    RecognitionService, RecorderState, RemoteSpeechEngine, SpeechEngine, SpeechPoll,
    SpeechSequencer, SpeechServiceClient, VoiceInputController,
};
pub use store::{ConversationRecord, ConversationStore, DbPool, MemoryStore, SqliteStore};
