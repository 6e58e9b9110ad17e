//! Read-aloud playback.
//!
//! * [`PlaybackEngine`]: `Idle`/`Speaking` state machine with chained
//!   auto-advance across pages.
//! * [`SpeechSynthesizer`]: the exclusive speech output capability.
//! * [`ConsoleSpeech`]: stdout stand-in used by the binary.

pub mod engine;
pub mod speech;

pub use engine::{PlaybackEngine, PlaybackState, ToggleOutcome};
pub use speech::{
    ConsoleSpeech, SpeechEvent, SpeechEventSender, SpeechOptions, SpeechSynthesizer, UtteranceId,
};

#[cfg(test)]
pub use speech::MockSpeech;
