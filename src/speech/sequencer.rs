//! Line-by-line speech sequencing with single-speaker discipline

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};

use super::SpeechEngine;

/// Drives the synthesis engine one line at a time.
///
/// Only one utterance may be active at a time: calling [`speak`] while
/// another utterance is in flight cancels it first (toggle, not queue).
/// The index of the line currently being spoken is published on a watch
/// channel for UI highlighting; `None` means nothing is being spoken.
///
/// [`speak`]: SpeechSequencer::speak
pub struct SpeechSequencer {
    engine: Arc<dyn SpeechEngine>,
    line_tx: watch::Sender<Option<usize>>,
    // Cancel flag of the in-flight utterance, if any
    active: Mutex<Option<Arc<AtomicBool>>>,
}

impl SpeechSequencer {
    #[must_use]
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        let (line_tx, _) = watch::channel(None);
        Self {
            engine,
            line_tx,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to the currently spoken line index
    #[must_use]
    pub fn current_line(&self) -> watch::Receiver<Option<usize>> {
        self.line_tx.subscribe()
    }

    /// Speak `text` line by line, in order.
    ///
    /// Cancels any utterance already in flight before starting. Each
    /// line's index is published before that line begins playing.
    /// Resolves after the last line finishes, after cancellation, or
    /// after an engine error (logged; remaining lines are skipped).
    pub async fn speak(&self, text: &str) {
        let cancelled = Arc::new(AtomicBool::new(false));

        {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.replace(Arc::clone(&cancelled)) {
                previous.store(true, Ordering::SeqCst);
                if let Err(e) = self.engine.stop().await {
                    tracing::warn!(error = %e, "failed to stop in-flight utterance");
                }
            }
        }

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        tracing::debug!(lines = lines.len(), "starting utterance");

        for (index, line) in lines.iter().enumerate() {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            // send_replace stores the value even with no subscribers yet
            self.line_tx.send_replace(Some(index));

            if let Err(e) = self.engine.speak_line(line).await {
                tracing::warn!(error = %e, line = index, "synthesis failed, aborting utterance");
                break;
            }
        }

        self.finish(&cancelled).await;
    }

    /// Cancel the in-flight utterance, if any.
    ///
    /// Stops the engine immediately and clears the current-line index;
    /// the in-flight [`speak`] resolves without its remaining lines.
    /// Idempotent.
    ///
    /// [`speak`]: SpeechSequencer::speak
    pub async fn cancel(&self) {
        let mut active = self.active.lock().await;
        if let Some(current) = active.take() {
            current.store(true, Ordering::SeqCst);
            if let Err(e) = self.engine.stop().await {
                tracing::warn!(error = %e, "failed to stop speech engine");
            }
            self.line_tx.send_replace(None);
            tracing::debug!("utterance cancelled");
        }
    }

    /// Release the active slot and clear highlighting, unless a newer
    /// utterance has already taken over.
    async fn finish(&self, own_flag: &Arc<AtomicBool>) {
        let mut active = self.active.lock().await;
        if active
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, own_flag))
        {
            *active = None;
            self.line_tx.send_replace(None);
        }
    }
}
