//! Speech synthesis sequencing and recognition polling

mod engine;
mod recognition;
mod sequencer;

pub use engine::{RemoteSpeechEngine, SpeechEngine};
pub use recognition::{
    RecognitionService, RecorderState, SpeechPoll, SpeechServiceClient, VoiceInputController,
};
pub use sequencer::SpeechSequencer;
