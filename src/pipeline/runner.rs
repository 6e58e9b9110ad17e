//! Recognition pipeline: turns a batch of images into recognised pages.
//!
//! # Batch flow
//!
//! ```text
//! submit(images)
//!   └─▶ stage: append N Pending pages            (visible immediately)
//!   └─▶ run_batch, per page in submission order:
//!         mark Processing → recognizer.recognize → normalise
//!           ├─ Ok  → set_result(Text)     [Ready]
//!           └─ Err → warn + set_result(Failure)   [Failed]
//! ```
//!
//! Failures are page-local.  `submit` never returns an error and a failed
//! page never stops the rest of its batch.
//!
//! In [`PipelineMode::BoundedParallel`] up to `max_in_flight` calls run at
//! once, but results are still applied in submission order
//! (`StreamExt::buffered` yields in input order).

use std::sync::Arc;

use futures::StreamExt;

use crate::config::{PipelineConfig, PipelineMode};
use crate::pages::{lock_pages, Applied, ImageRef, PageId, RecognitionOutcome, SharedPages};
use crate::recognition::{normalize_text, Recognizer};

// ---------------------------------------------------------------------------
// Batch / BatchReport
// ---------------------------------------------------------------------------

/// Pages staged together from one acquisition.
#[derive(Debug, Clone)]
pub struct Batch {
    entries: Vec<(PageId, ImageRef)>,
}

impl Batch {
    pub fn ids(&self) -> Vec<PageId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub ready: usize,
    pub failed: usize,
    /// Pages cleared from the store before their result could be applied.
    pub discarded: usize,
}

// ---------------------------------------------------------------------------
// RecognitionPipeline
// ---------------------------------------------------------------------------

pub struct RecognitionPipeline {
    pages: SharedPages,
    recognizer: Arc<dyn Recognizer>,
    mode: PipelineMode,
    max_in_flight: usize,
}

impl RecognitionPipeline {
    pub fn new(pages: SharedPages, recognizer: Arc<dyn Recognizer>, config: &PipelineConfig) -> Self {
        Self {
            pages,
            recognizer,
            mode: config.mode,
            max_in_flight: config.max_in_flight.max(1),
        }
    }

    /// Append and recognise `images`, returning once every page has settled.
    pub async fn submit(&self, images: Vec<ImageRef>) -> BatchReport {
        let batch = self.stage(images);
        self.run_batch(&batch).await
    }

    /// Append one `Pending` page per image without issuing any call.
    pub fn stage(&self, images: Vec<ImageRef>) -> Batch {
        let ids = lock_pages(&self.pages).append(images.clone());
        Batch {
            entries: ids.into_iter().zip(images).collect(),
        }
    }

    /// Recognise every page of a staged batch.
    pub async fn run_batch(&self, batch: &Batch) -> BatchReport {
        let mut report = BatchReport {
            total: batch.len(),
            ..BatchReport::default()
        };
        log::info!(
            "pipeline: recognising {} page(s) ({:?})",
            batch.len(),
            self.mode
        );

        match self.mode {
            PipelineMode::Sequential => {
                for (id, image) in &batch.entries {
                    let outcome = self.recognize_page(*id, image).await;
                    self.apply(*id, outcome, &mut report);
                }
            }
            PipelineMode::BoundedParallel => {
                let this = self;
                let mut results = futures::stream::iter(batch.entries.clone())
                    .map(|(id, image)| async move {
                        let outcome = this.recognize_page(id, &image).await;
                        (id, outcome)
                    })
                    .buffered(self.max_in_flight);

                while let Some((id, outcome)) = results.next().await {
                    self.apply(id, outcome, &mut report);
                }
            }
        }

        log::info!(
            "pipeline: batch done: {} ready, {} failed, {} discarded",
            report.ready,
            report.failed,
            report.discarded
        );
        report
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Run one recognition call.  `None` means the page was cleared before
    /// its call started, so no call was made.
    async fn recognize_page(&self, id: PageId, image: &ImageRef) -> Option<RecognitionOutcome> {
        if !self.begin(id) {
            return None;
        }

        let outcome = match self.recognizer.recognize(image).await {
            Ok(raw) => RecognitionOutcome::Text(normalize_text(&raw)),
            Err(e) => {
                log::warn!("pipeline: page {} failed: {e}", id.index());
                RecognitionOutcome::Failure
            }
        };
        Some(outcome)
    }

    fn begin(&self, id: PageId) -> bool {
        match lock_pages(&self.pages).mark_processing(id) {
            Ok(Applied::Applied) => true,
            Ok(Applied::Discarded) => false,
            Err(e) => {
                log::warn!("pipeline: cannot start page {}: {e}", id.index());
                false
            }
        }
    }

    fn apply(&self, id: PageId, outcome: Option<RecognitionOutcome>, report: &mut BatchReport) {
        let Some(outcome) = outcome else {
            report.discarded += 1;
            return;
        };
        let failed = outcome == RecognitionOutcome::Failure;

        match lock_pages(&self.pages).set_result(id, outcome) {
            Ok(Applied::Applied) if failed => report.failed += 1,
            Ok(Applied::Applied) => report.ready += 1,
            Ok(Applied::Discarded) => {
                log::debug!("pipeline: result for cleared page {} dropped", id.index());
                report.discarded += 1;
            }
            Err(e) => {
                log::warn!("pipeline: result for page {} ignored: {e}", id.index());
                report.discarded += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
