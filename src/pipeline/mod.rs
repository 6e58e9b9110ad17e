//! Page recognition pipeline.
//!
//! # Architecture
//!
//! ```text
//! SessionController::add_pages(images)
//!        │
//!        ├─ RecognitionPipeline::stage   → N Pending pages in PageStore
//!        │
//!        └─ PipelineWorker::enqueue      → worker task (one batch at a time)
//!                 │
//!                 └─ RecognitionPipeline::run_batch
//!                       per page: Processing → Recognizer → Ready | Failed
//!
//! SharedPages (Arc<Mutex<PageStore>>) ←─── read by the session / UI
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use page_reader::config::AppConfig;
//! use page_reader::pages::{new_shared_pages, ImageRef};
//! use page_reader::pipeline::RecognitionPipeline;
//! use page_reader::recognition::{ApiRecognizer, Recognizer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let pages = new_shared_pages();
//!     let recognizer: Arc<dyn Recognizer> =
//!         Arc::new(ApiRecognizer::from_config(&config.recognition));
//!
//!     let pipeline = RecognitionPipeline::new(pages, recognizer, &config.pipeline);
//!     let report = pipeline.submit(vec![ImageRef::new("page1.jpg")]).await;
//!     println!("{} ready, {} failed", report.ready, report.failed);
//! }
//! ```

pub mod runner;
pub mod worker;

pub use runner::{Batch, BatchReport, RecognitionPipeline};
pub use worker::PipelineWorker;
