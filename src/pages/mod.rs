//! Working copy of the open document's pages.

pub mod store;

pub use store::{
    lock_pages, new_shared_pages, Applied, ImageRef, Page, PageId, PageState, PageStatus,
    PageStore, PageStoreError, RecognitionOutcome, SharedPages,
};
