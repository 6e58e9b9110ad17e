//! Single-task batch queue in front of [`RecognitionPipeline`].
//!
//! The session stages a batch (its pages show up as `Pending` straight away)
//! and hands it to [`PipelineWorker::enqueue`].  One tokio task runs the
//! queued batches strictly one after another, so the same page store is never
//! processed by two overlapping runs.
//!
//! ```text
//! enqueue(batch) ──mpsc──▶ worker task: run_batch(batch1), run_batch(batch2), ...
//!        │                        │
//!        └── outstanding += 1     └── outstanding -= 1  (watch channel)
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::runner::{Batch, BatchReport, RecognitionPipeline};

pub struct PipelineWorker {
    pipeline: Arc<RecognitionPipeline>,
    batch_tx: mpsc::UnboundedSender<Batch>,
    outstanding_tx: Arc<watch::Sender<usize>>,
    outstanding_rx: watch::Receiver<usize>,
    reports: Arc<Mutex<Vec<BatchReport>>>,
    handle: JoinHandle<()>,
}

impl PipelineWorker {
    /// Spawn the worker task on the current tokio runtime.
    pub fn spawn(pipeline: Arc<RecognitionPipeline>) -> Self {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (outstanding_tx, outstanding_rx) = watch::channel(0usize);
        let outstanding_tx = Arc::new(outstanding_tx);
        let reports = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn(Self::run(
            Arc::clone(&pipeline),
            batch_rx,
            Arc::clone(&outstanding_tx),
            Arc::clone(&reports),
        ));

        Self {
            pipeline,
            batch_tx,
            outstanding_tx,
            outstanding_rx,
            reports,
            handle,
        }
    }

    async fn run(
        pipeline: Arc<RecognitionPipeline>,
        mut batch_rx: mpsc::UnboundedReceiver<Batch>,
        outstanding: Arc<watch::Sender<usize>>,
        reports: Arc<Mutex<Vec<BatchReport>>>,
    ) {
        while let Some(batch) = batch_rx.recv().await {
            let report = pipeline.run_batch(&batch).await;
            reports
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(report);
            outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }

        log::debug!("pipeline: batch channel closed, worker shutting down");
    }

    pub fn pipeline(&self) -> &Arc<RecognitionPipeline> {
        &self.pipeline
    }

    /// Queue a staged batch.  Returns `false` if the worker task has stopped.
    pub fn enqueue(&self, batch: Batch) -> bool {
        if batch.is_empty() {
            return true;
        }
        self.outstanding_tx.send_modify(|n| *n += 1);
        if self.batch_tx.send(batch).is_err() {
            self.outstanding_tx.send_modify(|n| *n = n.saturating_sub(1));
            log::error!("pipeline: worker task is gone, batch dropped");
            return false;
        }
        true
    }

    /// Number of batches queued or running.
    pub fn outstanding(&self) -> usize {
        *self.outstanding_rx.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.outstanding() > 0
    }

    /// Wait until every queued batch has settled.
    pub async fn wait_idle(&self) {
        let mut rx = self.outstanding_rx.clone();
        if rx.wait_for(|n| *n == 0).await.is_err() {
            log::warn!("pipeline: outstanding counter closed while waiting");
        }
    }

    /// Take the reports of every batch finished since the last call.
    pub fn drain_reports(&self) -> Vec<BatchReport> {
        std::mem::take(&mut *self.reports.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        // Queued batches still finish; only an idle worker is stopped early.
        if !self.is_busy() {
            self.handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, PipelineMode};
    use crate::pages::{lock_pages, new_shared_pages, ImageRef, PageStatus, SharedPages};
    use crate::recognition::{MockRecognizer, Recognizer};

    fn make_worker(mock: MockRecognizer) -> (PipelineWorker, SharedPages, Arc<MockRecognizer>) {
        make_worker_with(mock, &PipelineConfig::default())
    }

    fn make_worker_with(
        mock: MockRecognizer,
        config: &PipelineConfig,
    ) -> (PipelineWorker, SharedPages, Arc<MockRecognizer>) {
        let pages = new_shared_pages();
        let mock = Arc::new(mock);
        let recognizer: Arc<dyn Recognizer> = mock.clone();
        let pipeline = Arc::new(RecognitionPipeline::new(
            Arc::clone(&pages),
            recognizer,
            config,
        ));
        (PipelineWorker::spawn(pipeline), pages, mock)
    }

    #[tokio::test]
    async fn queued_batches_run_one_after_another() {
        let mock = MockRecognizer::new().delay("a0", 30);
        let (worker, pages, mock) = make_worker(mock);

        let first = worker
            .pipeline()
            .stage(vec![ImageRef::new("a0"), ImageRef::new("a1")]);
        assert!(worker.enqueue(first));
        let second = worker.pipeline().stage(vec![ImageRef::new("b0")]);
        assert!(worker.enqueue(second));

        // Both batches are visible before anything is recognised.
        assert_eq!(lock_pages(&pages).len(), 3);
        assert!(worker.is_busy());

        worker.wait_idle().await;

        assert_eq!(mock.calls(), vec!["a0", "a1", "b0"]);
        assert_eq!(mock.max_in_flight(), 1);
        assert!(lock_pages(&pages)
            .snapshot()
            .iter()
            .all(|p| p.status() == PageStatus::Ready));

        let reports = worker.drain_reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].total, 2);
        assert_eq!(reports[1].total, 1);
        assert!(worker.drain_reports().is_empty());
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_idle() {
        let (worker, _, _) = make_worker(MockRecognizer::new());
        assert!(!worker.is_busy());
        worker.wait_idle().await;
        assert_eq!(worker.outstanding(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_not_queued() {
        let (worker, _, _) = make_worker(MockRecognizer::new());
        let batch = worker.pipeline().stage(Vec::new());
        assert!(worker.enqueue(batch));
        assert_eq!(worker.outstanding(), 0);
    }

    #[tokio::test]
    async fn bounded_parallel_batch_runs_on_worker_task() {
        let mock = MockRecognizer::new()
            .ok("p0", "slow")
            .delay("p0", 40)
            .ok("p1", "fast")
            .delay("p1", 5)
            .ok("p2", "third");
        let config = PipelineConfig {
            mode: PipelineMode::BoundedParallel,
            max_in_flight: 2,
            ..PipelineConfig::default()
        };
        let (worker, pages, mock) = make_worker_with(mock, &config);

        let batch = worker.pipeline().stage(vec![
            ImageRef::new("p0"),
            ImageRef::new("p1"),
            ImageRef::new("p2"),
        ]);
        assert!(worker.enqueue(batch));
        worker.wait_idle().await;

        let texts: Vec<String> = lock_pages(&pages)
            .snapshot()
            .iter()
            .map(|p| p.text().to_string())
            .collect();
        assert_eq!(texts, vec!["slow", "fast", "third"]);
        assert_eq!(mock.max_in_flight(), 2);
        assert_eq!(worker.drain_reports()[0].ready, 3);
    }
}
