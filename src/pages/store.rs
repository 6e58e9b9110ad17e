//! Ordered page collection for the currently open document.
//!
//! Pages are keyed by [`PageId`], which pairs the page's position with the
//! store generation it was created in.  [`PageStore::clear`] bumps the
//! generation, so a recognition result that was in flight across a clear can
//! never land on a page appended afterwards, even when the positions match.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ImageRef
// ---------------------------------------------------------------------------

/// Opaque handle to a source image owned by the picker capability.
///
/// The store never reads the image; only the recognizer does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn uri(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// PageId
// ---------------------------------------------------------------------------

/// Stable identity of a page within one store generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    generation: u64,
    index: usize,
}

impl PageId {
    /// Zero-based position of the page in its document.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// PageState / PageStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a page's recognition.
///
/// ```text
/// Pending ──dispatch──▶ Processing ──ok──▶ Ready(text)
///                                 └─err──▶ Failed
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    Pending,
    Processing,
    /// Recognition succeeded.  The text may be empty.
    Ready(String),
    Failed,
}

/// Status view derived from [`PageState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl PageStatus {
    /// `true` once recognition has finished one way or the other.
    pub fn is_settled(&self) -> bool {
        matches!(self, PageStatus::Ready | PageStatus::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PageStatus::Pending => "pending",
            PageStatus::Processing => "processing",
            PageStatus::Ready => "ready",
            PageStatus::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub id: PageId,
    pub image: ImageRef,
    pub state: PageState,
}

impl Page {
    pub fn index(&self) -> usize {
        self.id.index
    }

    /// Recognised text, or `""` when the page is not `Ready`.
    pub fn text(&self) -> &str {
        match &self.state {
            PageState::Ready(text) => text,
            _ => "",
        }
    }

    pub fn status(&self) -> PageStatus {
        match self.state {
            PageState::Pending => PageStatus::Pending,
            PageState::Processing => PageStatus::Processing,
            PageState::Ready(_) => PageStatus::Ready,
            PageState::Failed => PageStatus::Failed,
        }
    }

    /// `true` when there is something to read aloud.
    pub fn has_text(&self) -> bool {
        !self.text().is_empty()
    }
}

// ---------------------------------------------------------------------------
// RecognitionOutcome
// ---------------------------------------------------------------------------

/// What the pipeline resolves a page with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Text(String),
    Failure,
}

/// Whether a result landed on a live page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// The page belonged to a generation that has since been cleared.
    Discarded,
}

// ---------------------------------------------------------------------------
// PageStoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageStoreError {
    /// The index was never assigned in the current generation.
    #[error("page {index} is out of range (store holds {len} pages)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The page has already been resolved; a page is resolved exactly once.
    #[error("page {0} has already been resolved")]
    AlreadyResolved(usize),
}

// ---------------------------------------------------------------------------
// PageStore
// ---------------------------------------------------------------------------

/// Append-only, ordered page collection plus the reading cursor.
#[derive(Debug, Default)]
pub struct PageStore {
    generation: u64,
    pages: BTreeMap<usize, Page>,
    cursor: usize,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one `Pending` page per image, in input order, and return the
    /// new ids.  The cursor moves to the first appended page.
    pub fn append(&mut self, images: Vec<ImageRef>) -> Vec<PageId> {
        let first = self.pages.len();
        let ids: Vec<PageId> = images
            .into_iter()
            .enumerate()
            .map(|(offset, image)| {
                let id = PageId {
                    generation: self.generation,
                    index: first + offset,
                };
                self.pages.insert(
                    id.index,
                    Page {
                        id,
                        image,
                        state: PageState::Pending,
                    },
                );
                id
            })
            .collect();

        if !ids.is_empty() {
            self.cursor = first;
        }
        ids
    }

    /// Move a `Pending` page to `Processing` just before its recognition call.
    pub fn mark_processing(&mut self, id: PageId) -> Result<Applied, PageStoreError> {
        let page = match self.live_page_mut(id)? {
            Some(page) => page,
            None => return Ok(Applied::Discarded),
        };
        match page.status() {
            PageStatus::Pending => {
                page.state = PageState::Processing;
                Ok(Applied::Applied)
            }
            PageStatus::Processing => Ok(Applied::Applied),
            _ => Err(PageStoreError::AlreadyResolved(id.index)),
        }
    }

    /// Resolve exactly the page `id` with `outcome`.
    ///
    /// Results for a cleared generation are discarded without error.
    pub fn set_result(
        &mut self,
        id: PageId,
        outcome: RecognitionOutcome,
    ) -> Result<Applied, PageStoreError> {
        let page = match self.live_page_mut(id)? {
            Some(page) => page,
            None => return Ok(Applied::Discarded),
        };
        if page.status().is_settled() {
            return Err(PageStoreError::AlreadyResolved(id.index));
        }
        page.state = match outcome {
            RecognitionOutcome::Text(text) => PageState::Ready(text),
            RecognitionOutcome::Failure => PageState::Failed,
        };
        Ok(Applied::Applied)
    }

    /// Discard all pages and start a new generation.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.cursor = 0;
        self.generation += 1;
    }

    /// Replace the contents with already-settled pages (opening a document).
    pub fn restore(&mut self, pages: impl IntoIterator<Item = (ImageRef, Option<String>)>) {
        self.clear();
        for (index, (image, text)) in pages.into_iter().enumerate() {
            let id = PageId {
                generation: self.generation,
                index,
            };
            let state = match text {
                Some(text) => PageState::Ready(text),
                None => PageState::Failed,
            };
            self.pages.insert(index, Page { id, image, state });
        }
    }

    /// Ordered read-only copy of every page.
    pub fn snapshot(&self) -> Vec<Page> {
        self.pages.values().cloned().collect()
    }

    pub fn get(&self, index: usize) -> Option<&Page> {
        self.pages.get(&index)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `true` when no page is `Pending` or `Processing`.
    pub fn is_settled(&self) -> bool {
        self.pages.values().all(|p| p.status().is_settled())
    }

    // -----------------------------------------------------------------------
    // Cursor
    // -----------------------------------------------------------------------

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Page under the cursor, if any.
    pub fn current(&self) -> Option<&Page> {
        self.pages.get(&self.cursor)
    }

    /// Move the cursor to `index`.  Returns `false` when out of range.
    pub fn set_cursor(&mut self, index: usize) -> bool {
        if index < self.pages.len() {
            self.cursor = index;
            true
        } else {
            false
        }
    }

    /// Advance the cursor; stays put on the last page.
    pub fn next(&mut self) -> usize {
        if self.cursor + 1 < self.pages.len() {
            self.cursor += 1;
        }
        self.cursor
    }

    /// Step the cursor back; stays put on the first page.
    pub fn previous(&mut self) -> usize {
        self.cursor = self.cursor.saturating_sub(1);
        self.cursor
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn live_page_mut(&mut self, id: PageId) -> Result<Option<&mut Page>, PageStoreError> {
        if id.generation != self.generation {
            log::debug!(
                "pages: ignoring update for page {} of cleared generation {}",
                id.index,
                id.generation
            );
            return Ok(None);
        }
        let len = self.pages.len();
        self.pages
            .get_mut(&id.index)
            .map(Some)
            .ok_or(PageStoreError::IndexOutOfRange { index: id.index, len })
    }
}

// ---------------------------------------------------------------------------
// SharedPages
// ---------------------------------------------------------------------------

/// Thread-safe handle to the working [`PageStore`].
///
/// Lock for a short critical section; do **not** hold the guard across
/// `.await` points.
pub type SharedPages = Arc<Mutex<PageStore>>;

pub fn new_shared_pages() -> SharedPages {
    Arc::new(Mutex::new(PageStore::new()))
}

/// Lock the store, recovering the guard if a previous holder panicked.
pub fn lock_pages(pages: &SharedPages) -> MutexGuard<'_, PageStore> {
    pages.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn images(n: usize) -> Vec<ImageRef> {
        (0..n).map(|i| ImageRef::new(format!("file:///img{i}.jpg"))).collect()
    }

    #[test]
    fn append_assigns_positions_in_input_order() {
        let mut store = PageStore::new();
        let first = store.append(images(2));
        let second = store.append(images(3));

        let indices: Vec<usize> = first.iter().chain(&second).map(|id| id.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(store.len(), 5);
        assert!(store
            .snapshot()
            .iter()
            .all(|p| p.status() == PageStatus::Pending));
    }

    #[test]
    fn append_moves_cursor_to_first_new_page() {
        let mut store = PageStore::new();
        store.append(images(2));
        assert_eq!(store.cursor(), 0);
        store.append(images(2));
        assert_eq!(store.cursor(), 2);
    }

    #[test]
    fn empty_append_keeps_cursor() {
        let mut store = PageStore::new();
        store.append(images(3));
        store.set_cursor(2);
        assert!(store.append(Vec::new()).is_empty());
        assert_eq!(store.cursor(), 2);
    }

    #[test]
    fn set_result_ready_and_failed() {
        let mut store = PageStore::new();
        let ids = store.append(images(3));

        store.mark_processing(ids[0]).unwrap();
        assert_eq!(store.get(0).unwrap().status(), PageStatus::Processing);

        store
            .set_result(ids[0], RecognitionOutcome::Text("hello".into()))
            .unwrap();
        store.set_result(ids[1], RecognitionOutcome::Failure).unwrap();
        store
            .set_result(ids[2], RecognitionOutcome::Text(String::new()))
            .unwrap();

        let pages = store.snapshot();
        assert_eq!(pages[0].text(), "hello");
        assert_eq!(pages[0].status(), PageStatus::Ready);
        assert_eq!(pages[1].text(), "");
        assert_eq!(pages[1].status(), PageStatus::Failed);
        // Successful-but-empty is Ready, not Failed.
        assert_eq!(pages[2].status(), PageStatus::Ready);
        assert!(!pages[2].has_text());
        assert!(store.is_settled());
    }

    #[test]
    fn set_result_twice_is_rejected() {
        let mut store = PageStore::new();
        let ids = store.append(images(1));
        store.set_result(ids[0], RecognitionOutcome::Failure).unwrap();

        let err = store
            .set_result(ids[0], RecognitionOutcome::Text("late".into()))
            .unwrap_err();
        assert_eq!(err, PageStoreError::AlreadyResolved(0));
        assert_eq!(store.get(0).unwrap().status(), PageStatus::Failed);
    }

    #[test]
    fn set_result_out_of_range_is_an_error() {
        let mut store = PageStore::new();
        store.append(images(1));
        let bogus = PageId {
            generation: store.generation(),
            index: 7,
        };
        let err = store
            .set_result(bogus, RecognitionOutcome::Failure)
            .unwrap_err();
        assert_eq!(err, PageStoreError::IndexOutOfRange { index: 7, len: 1 });
    }

    #[test]
    fn result_after_clear_is_discarded() {
        let mut store = PageStore::new();
        let stale = store.append(images(2));
        store.clear();
        assert!(store.is_empty());

        let outcome = store
            .set_result(stale[1], RecognitionOutcome::Text("ghost".into()))
            .unwrap();
        assert_eq!(outcome, Applied::Discarded);
        assert!(store.is_empty());
    }

    #[test]
    fn stale_result_does_not_touch_reused_position() {
        let mut store = PageStore::new();
        let stale = store.append(images(1));
        store.clear();
        let fresh = store.append(images(1));
        assert_eq!(stale[0].index(), fresh[0].index());

        let outcome = store
            .set_result(stale[0], RecognitionOutcome::Text("old".into()))
            .unwrap();
        assert_eq!(outcome, Applied::Discarded);
        assert_eq!(store.get(0).unwrap().status(), PageStatus::Pending);
    }

    #[test]
    fn restore_loads_settled_pages() {
        let mut store = PageStore::new();
        store.append(images(4));
        store.restore(vec![
            (ImageRef::new("a"), Some("one".into())),
            (ImageRef::new("b"), None),
        ]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.cursor(), 0);
        assert_eq!(store.get(0).unwrap().text(), "one");
        assert_eq!(store.get(1).unwrap().status(), PageStatus::Failed);
        assert!(store.is_settled());
    }

    #[test]
    fn cursor_navigation_clamps() {
        let mut store = PageStore::new();
        assert_eq!(store.next(), 0);
        assert_eq!(store.previous(), 0);

        store.append(images(3));
        assert_eq!(store.next(), 1);
        assert_eq!(store.next(), 2);
        assert_eq!(store.next(), 2);
        assert_eq!(store.previous(), 1);
        assert!(!store.set_cursor(3));
        assert!(store.set_cursor(0));
        assert_eq!(store.current().unwrap().index(), 0);
    }

    #[test]
    fn shared_pages_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedPages>();
    }
}
