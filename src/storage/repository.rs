//! Named, persisted documents.
//!
//! The whole collection lives as one JSON array under one key of a
//! [`KeyValueStore`].  Every mutation is a read-modify-write of that array,
//! serialised through a write lock so two rapid saves always build on the
//! latest list instead of overwriting each other's append.
//!
//! A missing or unparsable blob reads as "no documents yet".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::pages::{ImageRef, Page, PageStatus};

use super::kv::{KeyValueStore, StorageError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted status.  Transient states are never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredStatus {
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPage {
    pub image: ImageRef,
    pub text: String,
    pub status: StoredStatus,
}

impl StoredPage {
    /// `Some(text)` for pages that were recognised, `None` for failed ones.
    pub fn recognized_text(&self) -> Option<String> {
        match self.status {
            StoredStatus::Ready => Some(self.text.clone()),
            StoredStatus::Failed => None,
        }
    }
}

impl From<&Page> for StoredPage {
    /// Pages still pending or processing are stored as failed with no text.
    fn from(page: &Page) -> Self {
        let status = match page.status() {
            PageStatus::Ready => StoredStatus::Ready,
            _ => StoredStatus::Failed,
        };
        Self {
            image: page.image.clone(),
            text: page.text().to_string(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub pages: Vec<StoredPage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub name: String,
    pub page_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            page_count: doc.pages.len(),
            created_at: doc.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// RepositoryError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("document name must not be empty")]
    Validation,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cannot serialise document collection: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// DocumentRepository
// ---------------------------------------------------------------------------

pub struct DocumentRepository {
    store: Arc<dyn KeyValueStore>,
    key: String,
    write_lock: tokio::sync::Mutex<()>,
}

impl DocumentRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Every document, oldest first.  Storage failures read as empty.
    pub async fn list(&self) -> Vec<DocumentSummary> {
        match self.load().await {
            Ok(docs) => docs.iter().map(DocumentSummary::from).collect(),
            Err(e) => {
                log::warn!("repository: cannot read collection ({e}); listing nothing");
                Vec::new()
            }
        }
    }

    pub async fn get(&self, id: &DocumentId) -> Result<Option<Document>, RepositoryError> {
        Ok(self.load().await?.into_iter().find(|doc| &doc.id == id))
    }

    /// Persist `pages` as a new document called `name` (trimmed).
    pub async fn create(&self, name: &str, pages: &[Page]) -> Result<Document, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepositoryError::Validation);
        }

        let document = Document {
            id: DocumentId::generate(),
            name: name.to_string(),
            created_at: Utc::now(),
            pages: pages.iter().map(StoredPage::from).collect(),
        };

        let _guard = self.write_lock.lock().await;
        let mut docs = self.load().await?;
        docs.push(document.clone());
        self.persist(&docs).await?;

        log::info!(
            "repository: saved \"{}\" ({} pages) as {}",
            document.name,
            document.pages.len(),
            document.id
        );
        Ok(document)
    }

    /// Remove the document with `id`.  Returns whether anything was removed;
    /// an unknown id is not an error.
    pub async fn delete(&self, id: &DocumentId) -> Result<bool, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut docs = self.load().await?;
        let before = docs.len();
        docs.retain(|doc| &doc.id != id);

        if docs.len() == before {
            log::debug!("repository: delete of unknown document {id} ignored");
            return Ok(false);
        }
        self.persist(&docs).await?;
        log::info!("repository: deleted {id}");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn load(&self) -> Result<Vec<Document>, StorageError> {
        let Some(blob) = self.store.get(&self.key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&blob) {
            Ok(docs) => Ok(docs),
            Err(e) => {
                log::warn!("repository: stored collection is corrupt ({e}); treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn persist(&self, docs: &[Document]) -> Result<(), RepositoryError> {
        let blob = serde_json::to_vec_pretty(docs)?;
        self.store.set(&self.key, blob).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
