//! Image acquisition capability (camera / gallery).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

use crate::pages::ImageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickSource {
    /// Always a batch of one.
    Camera,
    /// Up to the configured gallery limit.
    Gallery,
}

impl std::fmt::Display for PickSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PickSource::Camera => f.write_str("camera"),
            PickSource::Gallery => f.write_str("gallery"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Picked(Vec<ImageRef>),
    /// The user backed out; nothing is created.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickerError {
    #[error("permission to access the {0} was denied")]
    PermissionDenied(PickSource),

    #[error("picker unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ImagePicker: Send + Sync {
    /// Ask for at most `limit` images from `source`.
    async fn pick(&self, source: PickSource, limit: usize) -> Result<PickOutcome, PickerError>;
}

// ---------------------------------------------------------------------------
// PathPicker
// ---------------------------------------------------------------------------

/// Hands out files from a fixed list, `limit` at a time.  An exhausted list
/// reads as a cancelled pick.
pub struct PathPicker {
    remaining: Mutex<VecDeque<PathBuf>>,
}

impl PathPicker {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            remaining: Mutex::new(paths.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ImagePicker for PathPicker {
    async fn pick(&self, source: PickSource, limit: usize) -> Result<PickOutcome, PickerError> {
        let take = match source {
            PickSource::Camera => 1,
            PickSource::Gallery => limit.max(1),
        };
        let paths: Vec<PathBuf> = {
            let mut remaining = self
                .remaining
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let n = take.min(remaining.len());
            remaining.drain(..n).collect()
        };
        if paths.is_empty() {
            return Ok(PickOutcome::Cancelled);
        }

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            if tokio::fs::metadata(&path).await.is_err() {
                return Err(PickerError::Unavailable(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
            images.push(ImageRef::new(path.to_string_lossy()));
        }
        Ok(PickOutcome::Picked(images))
    }
}

// ---------------------------------------------------------------------------
// MockPicker  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub struct MockPicker {
    response: Result<PickOutcome, PickerError>,
}

#[cfg(test)]
impl MockPicker {
    pub fn picked(uris: &[&str]) -> Self {
        Self {
            response: Ok(PickOutcome::Picked(
                uris.iter().map(|u| ImageRef::new(*u)).collect(),
            )),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            response: Ok(PickOutcome::Cancelled),
        }
    }

    pub fn denied(source: PickSource) -> Self {
        Self {
            response: Err(PickerError::PermissionDenied(source)),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ImagePicker for MockPicker {
    async fn pick(&self, _source: PickSource, _limit: usize) -> Result<PickOutcome, PickerError> {
        self.response.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
