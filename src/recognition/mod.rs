//! Remote image-to-text recognition.
//!
//! * [`Recognizer`]: async trait implemented by every backend.
//! * [`ApiRecognizer`]: HTTP upload backend.
//! * [`normalize_text`]: whitespace normalisation applied to every result.
//! * [`RecognitionError`]: transport / parse / image-read failures.

pub mod engine;
pub mod normalize;

pub use engine::{extract_text, image_path, ApiRecognizer, RecognitionError, Recognizer};
pub use normalize::normalize_text;

#[cfg(test)]
pub use engine::MockRecognizer;
