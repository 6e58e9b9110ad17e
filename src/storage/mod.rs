//! Document persistence.
//!
//! * [`KeyValueStore`]: whole-blob `get`/`set` capability.
//! * [`FileStore`] / [`MemoryStore`]: on-disk and in-process stores.
//! * [`DocumentRepository`]: list / get / create / delete over one key.

pub mod kv;
pub mod repository;

pub use kv::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use repository::{
    Document, DocumentId, DocumentRepository, DocumentSummary, RepositoryError, StoredPage,
    StoredStatus,
};
