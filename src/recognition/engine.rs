//! Core `Recognizer` trait and `ApiRecognizer` implementation.
//!
//! `ApiRecognizer` uploads the image bytes to an image-to-text HTTP service
//! and reads the recognised text out of one JSON field.  All connection
//! details come from [`RecognitionConfig`].
//!
//! [`MockRecognizer`] (available under `#[cfg(test)]`) returns scripted
//! responses with optional per-image delays so the pipeline can be tested
//! against out-of-order completion without a network.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RecognitionConfig;
use crate::pages::ImageRef;

// ---------------------------------------------------------------------------
// RecognitionError
// ---------------------------------------------------------------------------

/// Errors that can occur while recognising one page.
///
/// The pipeline treats every variant the same way: the page is marked
/// failed.  The variants exist for logging.
#[derive(Debug, Clone, Error)]
pub enum RecognitionError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("recognition request timed out")]
    Timeout,

    /// The service answered with a non-success status.
    #[error("recognition service returned HTTP {0}")]
    Http(u16),

    /// The response body was not the expected JSON shape.
    #[error("failed to parse recognition response: {0}")]
    Parse(String),

    /// The image could not be read from its reference.
    #[error("cannot read image {uri}: {reason}")]
    Image { uri: String, reason: String },
}

impl From<reqwest::Error> for RecognitionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RecognitionError::Timeout
        } else if let Some(status) = e.status() {
            RecognitionError::Http(status.as_u16())
        } else {
            RecognitionError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Recognizer trait
// ---------------------------------------------------------------------------

/// Async image-to-text capability.
///
/// Implementors must be `Send + Sync` so they can be held behind an
/// `Arc<dyn Recognizer>` and called from the pipeline worker task.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Return the raw (un-normalised) text found in `image`.
    async fn recognize(&self, image: &ImageRef) -> Result<String, RecognitionError>;
}

// ---------------------------------------------------------------------------
// ApiRecognizer
// ---------------------------------------------------------------------------

/// POSTs image bytes to the configured endpoint.
///
/// The `apikey` header is attached only when `config.api_key` is a non-empty
/// string.
pub struct ApiRecognizer {
    client: reqwest::Client,
    config: RecognitionConfig,
}

impl ApiRecognizer {
    /// Build an `ApiRecognizer` from application config.
    ///
    /// The HTTP client carries the per-request timeout from
    /// `config.timeout_secs`; a timed-out request surfaces as
    /// [`RecognitionError::Timeout`].
    pub fn from_config(config: &RecognitionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    async fn read_image(image: &ImageRef) -> Result<Vec<u8>, RecognitionError> {
        tokio::fs::read(image_path(image))
            .await
            .map_err(|e| RecognitionError::Image {
                uri: image.uri().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Local filesystem path behind an image reference (`file://` is stripped).
pub fn image_path(image: &ImageRef) -> PathBuf {
    let uri = image.uri();
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

#[async_trait]
impl Recognizer for ApiRecognizer {
    async fn recognize(&self, image: &ImageRef) -> Result<String, RecognitionError> {
        let bytes = Self::read_image(image).await?;

        let mut req = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);

        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.header("apikey", key);
        }

        let response = req.send().await?.error_for_status()?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RecognitionError::Parse(e.to_string()))?;

        extract_text(&json, &self.config.text_field)
    }
}

/// Pull the text field out of a service response.
///
/// A `null` field counts as "no text found", not as a failure.
pub fn extract_text(json: &serde_json::Value, field: &str) -> Result<String, RecognitionError> {
    match json.get(field) {
        Some(serde_json::Value::String(text)) => Ok(text.clone()),
        Some(serde_json::Value::Null) => Ok(String::new()),
        Some(other) => Err(RecognitionError::Parse(format!(
            "field `{field}` is not a string: {other}"
        ))),
        None => Err(RecognitionError::Parse(format!("missing field `{field}`"))),
    }
}

// ---------------------------------------------------------------------------
// MockRecognizer  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockRecognizer;

#[cfg(test)]
mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Scripted recognizer.  Unscripted images echo their uri back as text.
    #[derive(Default)]
    pub struct MockRecognizer {
        responses: HashMap<String, Result<String, RecognitionError>>,
        delays: HashMap<String, Duration>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockRecognizer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(mut self, uri: &str, text: &str) -> Self {
            self.responses.insert(uri.into(), Ok(text.into()));
            self
        }

        pub fn err(mut self, uri: &str, error: RecognitionError) -> Self {
            self.responses.insert(uri.into(), Err(error));
            self
        }

        pub fn delay(mut self, uri: &str, millis: u64) -> Self {
            self.delays.insert(uri.into(), Duration::from_millis(millis));
            self
        }

        /// Uris in the order their calls started.
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        /// Highest number of calls that were running at the same time.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Recognizer for MockRecognizer {
        async fn recognize(&self, image: &ImageRef) -> Result<String, RecognitionError> {
            let uri = image.uri().to_string();
            self.calls.lock().unwrap().push(uri.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(&uri) {
                tokio::time::sleep(*delay).await;
            } else {
                tokio::task::yield_now().await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.responses
                .get(&uri)
                .cloned()
                .unwrap_or_else(|| Ok(uri.clone()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
