//! Sequential read-aloud state machine.
//!
//! ```text
//! Idle ──toggle(page, text non-empty)──▶ Speaking{page, utterance}
//! Speaking ──toggle / cancel──▶ Idle                       (speech.stop)
//! Speaking ──Done(utterance)──▶ advance_if_possible:
//!        next page exists and has text ──▶ Speaking{page + 1, new utterance}
//!        otherwise                     ──▶ Idle
//! ```
//!
//! Events are matched against the utterance currently playing, so a `Done`
//! that arrives after a stop or a cancel is ignored rather than restarting
//! the chain.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::pages::{lock_pages, SharedPages};

use super::speech::{
    SpeechEvent, SpeechEventSender, SpeechOptions, SpeechSynthesizer, UtteranceId,
};

// ---------------------------------------------------------------------------
// PlaybackState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Speaking { page: usize, utterance: UtteranceId },
}

impl PlaybackState {
    pub fn is_speaking(&self) -> bool {
        matches!(self, PlaybackState::Speaking { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "Idle",
            PlaybackState::Speaking { .. } => "Speaking",
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Idle
    }
}

/// What a call to [`PlaybackEngine::toggle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started { page: usize },
    Stopped,
    /// The page has no text (unrecognised, failed, empty) or does not exist.
    Ignored,
}

// ---------------------------------------------------------------------------
// PlaybackEngine
// ---------------------------------------------------------------------------

pub struct PlaybackEngine {
    pages: SharedPages,
    speech: Arc<dyn SpeechSynthesizer>,
    options: SpeechOptions,
    state: PlaybackState,
    /// Store generation the active chain reads from.
    generation: u64,
    next_utterance: u64,
    events_tx: SpeechEventSender,
    events_rx: mpsc::UnboundedReceiver<SpeechEvent>,
}

impl PlaybackEngine {
    pub fn new(pages: SharedPages, speech: Arc<dyn SpeechSynthesizer>, options: SpeechOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            pages,
            speech,
            options,
            state: PlaybackState::Idle,
            generation: 0,
            next_utterance: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn language(&self) -> &str {
        &self.options.language
    }

    /// Takes effect from the next utterance; the current one is not restarted.
    pub fn set_language(&mut self, language: impl Into<String>) {
        self.options.language = language.into();
        log::debug!("playback: language set to {}", self.options.language);
    }

    /// Start reading at `page`, or stop if already speaking.
    pub fn toggle(&mut self, page: usize) -> ToggleOutcome {
        if self.state.is_speaking() {
            self.halt();
            return ToggleOutcome::Stopped;
        }

        let (text, generation) = {
            let store = lock_pages(&self.pages);
            let text = store.get(page).map(|p| p.text().to_string());
            (text, store.generation())
        };
        match text {
            Some(text) if !text.is_empty() => {
                self.generation = generation;
                self.start(page, &text);
                ToggleOutcome::Started { page }
            }
            _ => {
                log::debug!("playback: page {page} has nothing to read");
                ToggleOutcome::Ignored
            }
        }
    }

    /// Force `Idle` and silence the speech channel.  Safe to call when idle.
    pub fn cancel(&mut self) {
        if self.state.is_speaking() {
            log::info!("playback: cancelled");
            self.halt();
        }
    }

    /// Apply one event from the speech capability.
    pub fn handle_event(&mut self, event: SpeechEvent) -> PlaybackState {
        match (event, self.state) {
            (SpeechEvent::Done(id), PlaybackState::Speaking { page, utterance }) if id == utterance => {
                self.advance_if_possible(page);
            }
            (SpeechEvent::Stopped(id), PlaybackState::Speaking { utterance, .. }) if id == utterance => {
                // Stopped from outside the engine.
                self.state = PlaybackState::Idle;
            }
            (event, _) => {
                log::debug!("playback: ignoring stale {event:?}");
            }
        }
        self.state
    }

    /// Wait for the next speech event without applying it.
    pub async fn next_event(&mut self) -> Option<SpeechEvent> {
        self.events_rx.recv().await
    }

    /// Wait for the next speech event and apply it.
    pub async fn pump(&mut self) -> PlaybackState {
        match self.next_event().await {
            Some(event) => self.handle_event(event),
            None => self.state,
        }
    }

    /// Apply every event that has already arrived without waiting.
    pub fn pump_pending(&mut self) -> PlaybackState {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
        self.state
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn start(&mut self, page: usize, text: &str) {
        self.next_utterance += 1;
        let utterance = UtteranceId(self.next_utterance);
        self.state = PlaybackState::Speaking { page, utterance };
        log::info!(
            "playback: speaking page {} ({}, {} chars)",
            page + 1,
            self.options.language,
            text.chars().count()
        );
        self.speech
            .speak(utterance, text, &self.options, self.events_tx.clone());
    }

    fn halt(&mut self) {
        self.state = PlaybackState::Idle;
        self.speech.stop();
    }

    fn advance_if_possible(&mut self, page: usize) {
        let next_text = {
            let mut store = lock_pages(&self.pages);
            if store.generation() != self.generation {
                None
            } else if store.set_cursor(page + 1) {
                store.current().map(|p| p.text().to_string())
            } else {
                None
            }
        };

        match next_text {
            Some(text) if !text.is_empty() => self.start(page + 1, &text),
            Some(_) => {
                log::info!("playback: page {} has no text, stopping", page + 2);
                self.state = PlaybackState::Idle;
            }
            None => {
                log::info!("playback: finished at page {}", page + 1);
                self.state = PlaybackState::Idle;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
