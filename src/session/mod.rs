//! Top-level session orchestration.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use page_reader::config::AppConfig;
//! use page_reader::playback::ConsoleSpeech;
//! use page_reader::recognition::ApiRecognizer;
//! use page_reader::session::{PathPicker, PickSource, SessionController};
//! use page_reader::storage::{DocumentRepository, FileStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let repository = Arc::new(DocumentRepository::new(
//!         Arc::new(FileStore::new(config.storage.resolved_dir())),
//!         config.storage.collection_key.clone(),
//!     ));
//!     let mut session = SessionController::new(
//!         &config,
//!         Arc::new(ApiRecognizer::from_config(&config.recognition)),
//!         Arc::new(ConsoleSpeech::from_config(&config.speech)),
//!         repository,
//!         Arc::new(PathPicker::new(vec!["page1.jpg".into()])),
//!     );
//!
//!     session.new_document();
//!     session.acquire(PickSource::Gallery).await.unwrap();
//!     let doc = session.save("Chapter 1").await.unwrap();
//!     println!("saved {}", doc.id);
//! }
//! ```

pub mod controller;
pub mod picker;

pub use controller::{OpenDocument, SessionCommand, SessionController, SessionError};
pub use picker::{ImagePicker, PathPicker, PickOutcome, PickSource, PickerError};

#[cfg(test)]
pub use picker::MockPicker;
