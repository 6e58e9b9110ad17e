//! Session controller: binds pages, pipeline, playback and repository.
//!
//! Exactly one working copy is open at a time.  It is either a fresh,
//! unsaved document or a copy of a saved one; saving always persists a new
//! document (there is no update-in-place).
//!
//! # Command flow
//!
//! ```text
//! SessionCommand (mpsc) ──▶ SessionController::run()  ← async tokio task
//!                                 │
//!   Acquire(source) ─▶ picker ─▶ stage pages ─▶ PipelineWorker (background)
//!   TogglePlayback  ─▶ PlaybackEngine::toggle(cursor)
//!   Open / Delete   ─▶ DocumentRepository
//!   Save            ─▶ parked until the worker is idle ─▶ DocumentRepository
//!   Clear / Back    ─▶ cancel playback, clear PageStore
//!                                 ▲
//!   SpeechEvent ──────────────────┘  (auto-advance between pages)
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::AppConfig;
use crate::pages::{lock_pages, new_shared_pages, ImageRef, Page, PageId, SharedPages};
use crate::pipeline::{BatchReport, PipelineWorker, RecognitionPipeline};
use crate::playback::{
    PlaybackEngine, PlaybackState, SpeechEvent, SpeechOptions, SpeechSynthesizer, ToggleOutcome,
};
use crate::recognition::Recognizer;
use crate::storage::{Document, DocumentId, DocumentRepository, DocumentSummary, RepositoryError};

use super::picker::{ImagePicker, PickOutcome, PickSource, PickerError};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no document is open")]
    NoDocumentOpen,

    /// Camera or gallery access was refused; no pages were created.
    #[error("permission to access the {0} was denied")]
    PermissionDenied(PickSource),

    #[error("image picker failed: {0}")]
    Picker(String),

    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("recognition worker has stopped")]
    WorkerStopped,
}

impl SessionError {
    /// `true` when the caller should re-prompt for a document name.
    pub fn is_validation(&self) -> bool {
        matches!(self, SessionError::Repository(RepositoryError::Validation))
    }
}

impl From<PickerError> for SessionError {
    fn from(e: PickerError) -> Self {
        match e {
            PickerError::PermissionDenied(source) => SessionError::PermissionDenied(source),
            PickerError::Unavailable(msg) => SessionError::Picker(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// OpenDocument / SessionCommand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenDocument {
    /// Document list; no working copy.
    Closed,
    /// Working copy that has not been saved yet.
    Unsaved,
    /// Working copy last saved as, or opened from, `id`.
    Saved { id: DocumentId, name: String },
}

/// Requests accepted by [`SessionController::run`].
#[derive(Debug)]
pub enum SessionCommand {
    NewDocument,
    Open {
        id: DocumentId,
        reply: oneshot::Sender<Result<Document, SessionError>>,
    },
    Acquire {
        source: PickSource,
        reply: oneshot::Sender<Result<Vec<PageId>, SessionError>>,
    },
    TogglePlayback,
    NextPage,
    PreviousPage,
    SetLanguage(String),
    Clear,
    Back,
    Save {
        name: String,
        reply: oneshot::Sender<Result<Document, SessionError>>,
    },
    Delete {
        id: DocumentId,
        reply: oneshot::Sender<Result<bool, SessionError>>,
    },
    PlaybackState {
        reply: oneshot::Sender<PlaybackState>,
    },
}

type SaveReply = oneshot::Sender<Result<Document, SessionError>>;

enum Step {
    Command(SessionCommand),
    Speech(SpeechEvent),
    /// Recognition settled while saves were parked.
    SavesReady,
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

pub struct SessionController {
    pages: SharedPages,
    worker: PipelineWorker,
    playback: PlaybackEngine,
    repository: Arc<DocumentRepository>,
    picker: Arc<dyn ImagePicker>,
    gallery_limit: usize,
    open: OpenDocument,
}

impl SessionController {
    /// Build a controller.  Must be called from within a tokio runtime
    /// because the recognition worker task is spawned here.
    pub fn new(
        config: &AppConfig,
        recognizer: Arc<dyn Recognizer>,
        speech: Arc<dyn SpeechSynthesizer>,
        repository: Arc<DocumentRepository>,
        picker: Arc<dyn ImagePicker>,
    ) -> Self {
        let pages = new_shared_pages();
        let pipeline = Arc::new(RecognitionPipeline::new(
            Arc::clone(&pages),
            recognizer,
            &config.pipeline,
        ));
        let playback = PlaybackEngine::new(
            Arc::clone(&pages),
            speech,
            SpeechOptions::from(&config.speech),
        );

        Self {
            pages,
            worker: PipelineWorker::spawn(pipeline),
            playback,
            repository,
            picker,
            gallery_limit: config.pipeline.gallery_limit.max(1),
            open: OpenDocument::Closed,
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until `commands` is closed, applying speech events in between.
    ///
    /// A `Save` never blocks the loop: it is parked until every queued batch
    /// has settled, while commands and speech events keep flowing.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let mut pending_saves: Vec<(String, SaveReply)> = Vec::new();

        loop {
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => break,
                },
                Some(event) = self.playback.next_event() => Step::Speech(event),
                _ = self.worker.wait_idle(), if !pending_saves.is_empty() => Step::SavesReady,
            };

            match step {
                Step::Command(command) => self.handle_command(command, &mut pending_saves).await,
                Step::Speech(event) => {
                    self.handle_speech_event(event);
                }
                Step::SavesReady => self.finish_saves(&mut pending_saves).await,
            }
        }

        self.playback.cancel();
        if !pending_saves.is_empty() {
            self.worker.wait_idle().await;
            self.finish_saves(&mut pending_saves).await;
        }
        log::info!("session: command channel closed, controller shutting down");
    }

    async fn finish_saves(&mut self, pending: &mut Vec<(String, SaveReply)>) {
        for (name, reply) in std::mem::take(pending) {
            let _ = reply.send(self.persist(&name).await);
        }
    }

    async fn handle_command(
        &mut self,
        command: SessionCommand,
        pending_saves: &mut Vec<(String, SaveReply)>,
    ) {
        match command {
            SessionCommand::NewDocument => self.new_document(),
            SessionCommand::Open { id, reply } => {
                let _ = reply.send(self.open(&id).await);
            }
            SessionCommand::Acquire { source, reply } => {
                let result = self.acquire(source).await;
                if let Err(e) = &result {
                    log::warn!("session: acquisition from {source} failed: {e}");
                }
                let _ = reply.send(result);
            }
            SessionCommand::TogglePlayback => {
                self.toggle_playback();
            }
            SessionCommand::NextPage => {
                self.next_page();
            }
            SessionCommand::PreviousPage => {
                self.previous_page();
            }
            SessionCommand::SetLanguage(language) => self.set_language(language),
            SessionCommand::Clear => self.clear(),
            SessionCommand::Back => self.back(),
            SessionCommand::Save { name, reply } => match self.require_open() {
                Ok(()) => {
                    log::debug!("session: save of \"{name}\" waits for recognition");
                    pending_saves.push((name, reply));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            SessionCommand::Delete { id, reply } => {
                let _ = reply.send(self.delete(&id).await);
            }
            SessionCommand::PlaybackState { reply } => {
                let _ = reply.send(self.playback_state());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Document lifecycle
    // -----------------------------------------------------------------------

    /// Start an empty, unsaved working copy.
    pub fn new_document(&mut self) {
        self.reset_working_copy();
        self.open = OpenDocument::Unsaved;
        log::info!("session: new document");
    }

    /// Load a saved document as the working copy.
    pub async fn open(&mut self, id: &DocumentId) -> Result<Document, SessionError> {
        let document = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        self.playback.cancel();
        lock_pages(&self.pages).restore(
            document
                .pages
                .iter()
                .map(|p| (p.image.clone(), p.recognized_text())),
        );
        self.open = OpenDocument::Saved {
            id: document.id.clone(),
            name: document.name.clone(),
        };
        log::info!("session: opened \"{}\" ({} pages)", document.name, document.pages.len());
        Ok(document)
    }

    /// Persist the working copy as a new document once recognition settles.
    pub async fn save(&mut self, name: &str) -> Result<Document, SessionError> {
        self.require_open()?;
        self.worker.wait_idle().await;
        self.persist(name).await
    }

    /// Write the current pages as a new document without waiting.
    async fn persist(&mut self, name: &str) -> Result<Document, SessionError> {
        self.require_open()?;
        let snapshot = self.snapshot();
        let document = self.repository.create(name, &snapshot).await?;
        self.open = OpenDocument::Saved {
            id: document.id.clone(),
            name: document.name.clone(),
        };
        Ok(document)
    }

    /// Delete a saved document.  Unknown ids are a successful no-op.
    pub async fn delete(&mut self, id: &DocumentId) -> Result<bool, SessionError> {
        let removed = self.repository.delete(id).await?;
        if matches!(&self.open, OpenDocument::Saved { id: open_id, .. } if open_id == id) {
            self.open = OpenDocument::Unsaved;
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Vec<DocumentSummary> {
        self.repository.list().await
    }

    /// Cancel playback and discard the working copy's pages.
    pub fn clear(&mut self) {
        self.reset_working_copy();
    }

    /// Return to the document list, discarding the working copy.
    pub fn back(&mut self) {
        self.reset_working_copy();
        self.open = OpenDocument::Closed;
    }

    // -----------------------------------------------------------------------
    // Pages
    // -----------------------------------------------------------------------

    /// Pick images and add them as a new batch.  A cancelled pick adds
    /// nothing and is not an error.
    pub async fn acquire(&mut self, source: PickSource) -> Result<Vec<PageId>, SessionError> {
        self.require_open()?;
        let limit = match source {
            PickSource::Camera => 1,
            PickSource::Gallery => self.gallery_limit,
        };

        match self.picker.pick(source, limit).await? {
            PickOutcome::Cancelled => {
                log::debug!("session: {source} pick cancelled");
                Ok(Vec::new())
            }
            PickOutcome::Picked(mut images) => {
                if images.len() > limit {
                    log::warn!(
                        "session: {source} returned {} images, keeping the first {limit}",
                        images.len()
                    );
                    images.truncate(limit);
                }
                self.add_pages(images)
            }
        }
    }

    /// Append `images` as pending pages and queue their recognition.
    pub fn add_pages(&mut self, images: Vec<ImageRef>) -> Result<Vec<PageId>, SessionError> {
        self.require_open()?;
        let batch = self.worker.pipeline().stage(images);
        let ids = batch.ids();
        if !self.worker.enqueue(batch) {
            return Err(SessionError::WorkerStopped);
        }
        Ok(ids)
    }

    /// Wait until every queued batch has settled.
    pub async fn wait_idle(&self) {
        self.worker.wait_idle().await;
    }

    pub fn is_processing(&self) -> bool {
        self.worker.is_busy()
    }

    pub fn batch_reports(&self) -> Vec<BatchReport> {
        self.worker.drain_reports()
    }

    pub fn snapshot(&self) -> Vec<Page> {
        lock_pages(&self.pages).snapshot()
    }

    pub fn cursor(&self) -> usize {
        lock_pages(&self.pages).cursor()
    }

    pub fn next_page(&mut self) -> usize {
        lock_pages(&self.pages).next()
    }

    pub fn previous_page(&mut self) -> usize {
        lock_pages(&self.pages).previous()
    }

    /// Move the cursor.  Returns `false` when `index` is out of range.
    pub fn go_to_page(&mut self, index: usize) -> bool {
        lock_pages(&self.pages).set_cursor(index)
    }

    // -----------------------------------------------------------------------
    // Playback
    // -----------------------------------------------------------------------

    /// Read from the cursor page, or stop reading.
    pub fn toggle_playback(&mut self) -> ToggleOutcome {
        let cursor = self.cursor();
        self.playback.toggle(cursor)
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.playback.set_language(language);
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn handle_speech_event(&mut self, event: SpeechEvent) -> PlaybackState {
        self.playback.handle_event(event)
    }

    /// Wait for the next speech event and apply it.
    pub async fn pump_speech(&mut self) -> PlaybackState {
        self.playback.pump().await
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn open_document(&self) -> &OpenDocument {
        &self.open
    }

    pub fn pages(&self) -> SharedPages {
        Arc::clone(&self.pages)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require_open(&self) -> Result<(), SessionError> {
        if self.open == OpenDocument::Closed {
            Err(SessionError::NoDocumentOpen)
        } else {
            Ok(())
        }
    }

    fn reset_working_copy(&mut self) {
        self.playback.cancel();
        lock_pages(&self.pages).clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::pages::PageStatus;
    use crate::playback::MockSpeech;
    use crate::recognition::{MockRecognizer, RecognitionError};
    use crate::session::MockPicker;
    use crate::storage::MemoryStore;

    struct Harness {
        session: SessionController,
        speech: Arc<MockSpeech>,
        repository: Arc<DocumentRepository>,
    }

    fn harness_with(mock: MockRecognizer, picker: MockPicker, gallery_limit: usize) -> Harness {
        let config = AppConfig {
            pipeline: PipelineConfig {
                gallery_limit,
                ..PipelineConfig::default()
            },
            ..AppConfig::default()
        };
        let speech = Arc::new(MockSpeech::new());
        let synth: Arc<dyn SpeechSynthesizer> = speech.clone();
        let repository = Arc::new(DocumentRepository::new(
            Arc::new(MemoryStore::new()),
            "documents",
        ));
        let session = SessionController::new(
            &config,
            Arc::new(mock),
            synth,
            Arc::clone(&repository),
            Arc::new(picker),
        );
        Harness {
            session,
            speech,
            repository,
        }
    }

    /// Poll `check` for up to a second.
    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    async fn acquire_via(
        tx: &mpsc::Sender<SessionCommand>,
        source: PickSource,
    ) -> Result<Vec<PageId>, SessionError> {
        let (reply, rx) = oneshot::channel();
        tx.send(SessionCommand::Acquire { source, reply })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn playback_state_via(tx: &mpsc::Sender<SessionCommand>) -> PlaybackState {
        let (reply, rx) = oneshot::channel();
        tx.send(SessionCommand::PlaybackState { reply })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn settles_to_idle(tx: &mpsc::Sender<SessionCommand>) -> bool {
        for _ in 0..200 {
            if playback_state_via(tx).await == PlaybackState::Idle {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    fn all_ready(pages: &SharedPages) -> bool {
        let store = lock_pages(pages);
        !store.is_empty()
            && store
                .snapshot()
                .iter()
                .all(|p| p.status() == PageStatus::Ready)
    }

    fn harness(mock: MockRecognizer) -> Harness {
        harness_with(mock, MockPicker::cancelled(), 10)
    }

    fn images(uris: &[&str]) -> Vec<ImageRef> {
        uris.iter().map(|u| ImageRef::new(*u)).collect()
    }

    fn texts(session: &SessionController) -> Vec<String> {
        session
            .snapshot()
            .iter()
            .map(|p| p.text().to_string())
            .collect()
    }

    #[tokio::test]
    async fn pages_require_an_open_document() {
        let mut h = harness(MockRecognizer::new());
        assert!(matches!(
            h.session.add_pages(images(&["a"])),
            Err(SessionError::NoDocumentOpen)
        ));
        assert!(matches!(
            h.session.save("Nope").await,
            Err(SessionError::NoDocumentOpen)
        ));
    }

    #[tokio::test]
    async fn added_pages_show_as_pending_then_settle() {
        let mock = MockRecognizer::new()
            .ok("a", " page   one ")
            .err("b", RecognitionError::Http(500))
            .delay("a", 20);
        let mut h = harness(mock);
        h.session.new_document();

        let ids = h.session.add_pages(images(&["a", "b"])).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(h.session.is_processing());
        assert!(h
            .session
            .snapshot()
            .iter()
            .all(|p| !p.status().is_settled()));

        h.session.wait_idle().await;

        let pages = h.session.snapshot();
        assert_eq!(pages[0].text(), "page one");
        assert_eq!(pages[1].status(), PageStatus::Failed);
        let reports = h.session.batch_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].failed, 1);
    }

    #[tokio::test]
    async fn camera_pick_is_one_image() {
        let mut h = harness_with(MockRecognizer::new(), MockPicker::picked(&["x", "y", "z"]), 10);
        h.session.new_document();

        let ids = h.session.acquire(PickSource::Camera).await.unwrap();

        assert_eq!(ids.len(), 1);
        h.session.wait_idle().await;
        assert_eq!(texts(&h.session), vec!["x"]);
    }

    #[tokio::test]
    async fn gallery_pick_is_capped() {
        let mut h = harness_with(MockRecognizer::new(), MockPicker::picked(&["x", "y", "z"]), 2);
        h.session.new_document();

        let ids = h.session.acquire(PickSource::Gallery).await.unwrap();

        assert_eq!(ids.len(), 2);
        h.session.wait_idle().await;
        assert_eq!(texts(&h.session), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn denied_permission_creates_no_pages() {
        let mut h = harness_with(
            MockRecognizer::new(),
            MockPicker::denied(PickSource::Camera),
            10,
        );
        h.session.new_document();

        let err = h.session.acquire(PickSource::Camera).await.unwrap_err();

        assert!(matches!(err, SessionError::PermissionDenied(PickSource::Camera)));
        assert!(h.session.snapshot().is_empty());
    }

    #[tokio::test]
    async fn cancelled_pick_adds_nothing() {
        let mut h = harness(MockRecognizer::new());
        h.session.new_document();

        let ids = h.session.acquire(PickSource::Gallery).await.unwrap();

        assert!(ids.is_empty());
        assert!(!h.session.is_processing());
    }

    #[tokio::test]
    async fn save_validates_name_then_persists() {
        let mut h = harness(MockRecognizer::new().ok("a", "hello"));
        h.session.new_document();
        h.session.add_pages(images(&["a"])).unwrap();

        let err = h.session.save("   ").await.unwrap_err();
        assert!(err.is_validation());

        let doc = h.session.save("My Book").await.unwrap();
        assert_eq!(doc.pages[0].text, "hello");
        assert_eq!(
            h.session.open_document(),
            &OpenDocument::Saved {
                id: doc.id.clone(),
                name: "My Book".into()
            }
        );
        assert_eq!(h.session.list().await.len(), 1);
    }

    #[tokio::test]
    async fn save_waits_for_in_flight_recognition() {
        let mut h = harness(MockRecognizer::new().ok("slow", "late text").delay("slow", 30));
        h.session.new_document();
        h.session.add_pages(images(&["slow"])).unwrap();

        let doc = h.session.save("Patient").await.unwrap();

        assert_eq!(doc.pages[0].text, "late text");
    }

    #[tokio::test]
    async fn saved_document_reopens_with_same_text() {
        let mut h = harness(MockRecognizer::new().ok("a", "first").ok("b", "second"));
        h.session.new_document();
        h.session.add_pages(images(&["a", "b"])).unwrap();
        let doc = h.session.save("Round trip").await.unwrap();
        let before = texts(&h.session);

        h.session.back();
        assert!(h.session.snapshot().is_empty());
        assert_eq!(h.session.open_document(), &OpenDocument::Closed);

        h.session.open(&doc.id).await.unwrap();

        assert_eq!(texts(&h.session), before);
        assert_eq!(h.session.cursor(), 0);
        let stored = h.repository.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.pages.len(), 2);
    }

    #[tokio::test]
    async fn open_unknown_document_is_not_found() {
        let mut h = harness(MockRecognizer::new());
        let err = h.session.open(&DocumentId::from("missing")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn clear_during_recognition_does_not_resurrect_pages() {
        let mut h = harness(MockRecognizer::new().delay("a", 30));
        h.session.new_document();
        h.session.add_pages(images(&["a", "b"])).unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        h.session.clear();
        h.session.wait_idle().await;

        assert!(h.session.snapshot().is_empty());
        assert_eq!(h.session.batch_reports()[0].discarded, 2);
    }

    #[tokio::test]
    async fn playback_reads_through_document() {
        let mut h = harness(MockRecognizer::new().ok("a", "one").ok("b", "two").ok("c", "three"));
        h.session.new_document();
        h.session.add_pages(images(&["a", "b", "c"])).unwrap();
        h.session.wait_idle().await;

        assert_eq!(h.session.toggle_playback(), ToggleOutcome::Started { page: 0 });
        while h.session.playback_state().is_speaking() {
            h.speech.finish_last();
            h.session.pump_speech().await;
        }

        assert_eq!(h.speech.texts(), vec!["one", "two", "three"]);
        assert_eq!(h.session.cursor(), 2);
    }

    #[tokio::test]
    async fn back_stops_speech_mid_utterance() {
        let mut h = harness(MockRecognizer::new().ok("a", "one").ok("b", "two"));
        h.session.new_document();
        h.session.add_pages(images(&["a", "b"])).unwrap();
        h.session.wait_idle().await;

        h.session.toggle_playback();
        h.session.back();
        h.speech.finish_last();
        let state = h.session.pump_speech().await;

        assert_eq!(state, PlaybackState::Idle);
        assert_eq!(h.speech.stop_count(), 1);
        assert_eq!(h.speech.texts(), vec!["one"]);
    }

    #[tokio::test]
    async fn toggle_on_unrecognised_page_is_ignored() {
        let mut h = harness(MockRecognizer::new().delay("a", 30));
        h.session.new_document();
        h.session.add_pages(images(&["a"])).unwrap();

        assert_eq!(h.session.toggle_playback(), ToggleOutcome::Ignored);
        assert!(h.speech.texts().is_empty());
    }

    #[tokio::test]
    async fn deleting_open_document_leaves_unsaved_copy() {
        let mut h = harness(MockRecognizer::new());
        h.session.new_document();
        let doc = h.session.save("Temp").await.unwrap();

        assert!(h.session.delete(&doc.id).await.unwrap());
        assert!(!h.session.delete(&doc.id).await.unwrap());
        assert_eq!(h.session.open_document(), &OpenDocument::Unsaved);
    }

    #[tokio::test]
    async fn command_loop_acquires_and_saves() {
        let h = harness_with(
            MockRecognizer::new().ok("cam", "from the camera"),
            MockPicker::picked(&["cam"]),
            10,
        );
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.session.run(rx));

        tx.send(SessionCommand::NewDocument).await.unwrap();
        let ids = acquire_via(&tx, PickSource::Camera).await.unwrap();
        assert_eq!(ids.len(), 1);
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(SessionCommand::Save {
            name: "Loop".into(),
            reply: reply_tx,
        })
        .await
        .unwrap();

        let doc = reply_rx.await.unwrap().unwrap();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].text, "from the camera");

        drop(tx);
        task.await.unwrap();
        assert_eq!(h.repository.list().await.len(), 1);
    }

    #[tokio::test]
    async fn command_loop_reports_denied_camera() {
        let h = harness_with(
            MockRecognizer::new(),
            MockPicker::denied(PickSource::Camera),
            10,
        );
        let pages = h.session.pages();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.session.run(rx));

        tx.send(SessionCommand::NewDocument).await.unwrap();
        let result = acquire_via(&tx, PickSource::Camera).await;

        assert!(matches!(
            result,
            Err(SessionError::PermissionDenied(PickSource::Camera))
        ));
        assert!(lock_pages(&pages).is_empty());

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn command_loop_reads_pages_aloud_in_order() {
        let h = harness_with(
            MockRecognizer::new().ok("a", "one").ok("b", "two").ok("c", "three"),
            MockPicker::picked(&["a", "b", "c"]),
            10,
        );
        let pages = h.session.pages();
        let speech = Arc::clone(&h.speech);
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.session.run(rx));

        tx.send(SessionCommand::NewDocument).await.unwrap();
        assert_eq!(acquire_via(&tx, PickSource::Gallery).await.unwrap().len(), 3);
        assert!(eventually(|| all_ready(&pages)).await);

        tx.send(SessionCommand::TogglePlayback).await.unwrap();
        for spoken in 1..=3 {
            assert!(eventually(|| speech.texts().len() == spoken).await);
            speech.finish_last();
        }

        assert!(settles_to_idle(&tx).await);
        assert_eq!(speech.texts(), vec!["one", "two", "three"]);
        assert_eq!(lock_pages(&pages).cursor(), 2);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn command_loop_back_cancels_speech() {
        let h = harness_with(
            MockRecognizer::new().ok("a", "one").ok("b", "two"),
            MockPicker::picked(&["a", "b"]),
            10,
        );
        let pages = h.session.pages();
        let speech = Arc::clone(&h.speech);
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.session.run(rx));

        tx.send(SessionCommand::NewDocument).await.unwrap();
        acquire_via(&tx, PickSource::Gallery).await.unwrap();
        assert!(eventually(|| all_ready(&pages)).await);

        tx.send(SessionCommand::TogglePlayback).await.unwrap();
        assert!(eventually(|| speech.texts().len() == 1).await);
        tx.send(SessionCommand::Back).await.unwrap();
        assert!(eventually(|| speech.stop_count() == 1).await);

        // The interrupted utterance reporting completion must not advance.
        speech.finish_last();
        assert!(settles_to_idle(&tx).await);
        assert_eq!(speech.texts(), vec!["one"]);
        assert!(lock_pages(&pages).is_empty());

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_applied_while_save_waits_for_recognition() {
        let mut h = harness(
            MockRecognizer::new()
                .ok("a", "one")
                .ok("slow", "two")
                .delay("slow", 400),
        );
        h.session.new_document();
        h.session.add_pages(images(&["a"])).unwrap();
        h.session.wait_idle().await;
        assert_eq!(h.session.toggle_playback(), ToggleOutcome::Started { page: 0 });
        h.session.add_pages(images(&["slow"])).unwrap();

        let speech = Arc::clone(&h.speech);
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.session.run(rx));

        let (save_tx, mut save_rx) = oneshot::channel();
        tx.send(SessionCommand::Save {
            name: "Pending".into(),
            reply: save_tx,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(SessionCommand::TogglePlayback).await.unwrap();

        assert!(eventually(|| speech.stop_count() == 1).await);
        assert!(save_rx.try_recv().is_err(), "save finished before recognition");
        assert_eq!(playback_state_via(&tx).await, PlaybackState::Idle);

        let doc = save_rx.await.unwrap().unwrap();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[1].text, "two");

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn command_loop_save_without_document_fails_fast() {
        let h = harness(MockRecognizer::new());
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.session.run(rx));

        let (reply, reply_rx) = oneshot::channel();
        tx.send(SessionCommand::Save {
            name: "Nothing".into(),
            reply,
        })
        .await
        .unwrap();

        assert!(matches!(
            reply_rx.await.unwrap(),
            Err(SessionError::NoDocumentOpen)
        ));
        drop(tx);
        task.await.unwrap();
    }
}
