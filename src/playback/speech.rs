//! Speech output capability.
//!
//! [`SpeechSynthesizer`] is the seam to whatever engine actually produces
//! audio.  Every `speak` call is tagged with an [`UtteranceId`] and reports
//! back over an unbounded channel:
//!
//! * [`SpeechEvent::Done`]: the utterance finished on its own.  Sent at
//!   most once per `speak`, and never after that utterance was stopped.
//! * [`SpeechEvent::Stopped`]: the utterance was cut short by `stop`.
//!
//! [`ConsoleSpeech`] prints each utterance and paces it by word count; it
//! stands in for a platform synthesiser in the command-line binary.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SpeechConfig;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Identity of one `speak` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UtteranceId(pub u64);

/// Voice parameters sent with every utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOptions {
    pub language: String,
    pub pitch: f32,
    pub rate: f32,
}

impl From<&SpeechConfig> for SpeechOptions {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            language: config.language.clone(),
            pitch: config.pitch,
            rate: config.rate,
        }
    }
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self::from(&SpeechConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEvent {
    Done(UtteranceId),
    Stopped(UtteranceId),
}

pub type SpeechEventSender = mpsc::UnboundedSender<SpeechEvent>;

// ---------------------------------------------------------------------------
// SpeechSynthesizer trait
// ---------------------------------------------------------------------------

/// A single, exclusive speech output channel.
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking `text`.  Must not block; completion is reported on
    /// `events`.
    fn speak(&self, id: UtteranceId, text: &str, options: &SpeechOptions, events: SpeechEventSender);

    /// Stop the active utterance, if any.
    fn stop(&self);
}

// ---------------------------------------------------------------------------
// ConsoleSpeech
// ---------------------------------------------------------------------------

/// Prints utterances to stdout and reports `Done` after a reading-speed
/// delay.  `speak` must be called from within a tokio runtime.
pub struct ConsoleSpeech {
    words_per_second: f32,
    active: Mutex<Option<CancellationToken>>,
}

impl ConsoleSpeech {
    pub fn from_config(config: &SpeechConfig) -> Self {
        Self {
            words_per_second: config.words_per_second,
            active: Mutex::new(None),
        }
    }

    /// Simulated utterance length for `text` at `rate`.
    pub fn duration_for(&self, text: &str, rate: f32) -> Duration {
        let words = text.split_whitespace().count().max(1) as f32;
        let per_second = (self.words_per_second * rate).max(0.1);
        Duration::from_secs_f32(words / per_second)
    }
}

impl SpeechSynthesizer for ConsoleSpeech {
    fn speak(&self, id: UtteranceId, text: &str, options: &SpeechOptions, events: SpeechEventSender) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        println!("[{}] {}", options.language, text);
        let duration = self.duration_for(text, options.rate);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = events.send(SpeechEvent::Stopped(id));
                }
                _ = tokio::time::sleep(duration) => {
                    let _ = events.send(SpeechEvent::Done(id));
                }
            }
        });
    }

    fn stop(&self) {
        if let Some(token) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// MockSpeech  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockSpeech;


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
