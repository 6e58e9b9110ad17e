//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// PipelineMode
// ---------------------------------------------------------------------------

/// How the recognition calls of one batch are scheduled.
///
/// | Variant         | Calls in flight     | Result application |
/// |-----------------|---------------------|--------------------|
/// | Sequential      | 1                   | submission order   |
/// | BoundedParallel | up to `max_in_flight` | submission order |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineMode {
    /// One call at a time, in submission order.
    Sequential,
    /// Up to `max_in_flight` calls at once; results are still applied in
    /// submission order.
    BoundedParallel,
}

impl Default for PipelineMode {
    fn default() -> Self {
        Self::Sequential
    }
}

// ---------------------------------------------------------------------------
// RecognitionConfig
// ---------------------------------------------------------------------------

/// Settings for the remote image-to-text service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Upload endpoint.  The image bytes are POSTed as the request body.
    pub endpoint: String,
    /// Sent as the `apikey` header when present and non-empty.
    pub api_key: Option<String>,
    /// Maximum seconds to wait for a single page before it is marked failed.
    pub timeout_secs: u64,
    /// JSON field of the response that carries the recognised text.
    pub text_field: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.apilayer.com/image_to_text/upload".into(),
            api_key: None,
            timeout_secs: 30,
            text_field: "all_text".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Settings for batch scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// Upper bound on concurrent calls in `BoundedParallel` mode.
    pub max_in_flight: usize,
    /// Maximum number of images accepted from one gallery pick.
    pub gallery_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            max_in_flight: 3,
            gallery_limit: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechConfig
// ---------------------------------------------------------------------------

/// Settings handed to the speech capability with every utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// BCP-47 language tag, e.g. `"th-TH"`.
    pub language: String,
    pub pitch: f32,
    pub rate: f32,
    /// Pacing used by the console synthesiser to simulate utterance length.
    pub words_per_second: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: "th-TH".into(),
            pitch: 1.0,
            rate: 1.0,
            words_per_second: 2.5,
        }
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

/// Settings for the persisted document collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Key under which the whole collection is stored as one blob.
    pub collection_key: String,
    /// Overrides the platform data directory when set.
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            collection_key: "documents".into(),
            data_dir: None,
        }
    }
}

impl StorageConfig {
    /// Directory the file store writes into.
    pub fn resolved_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| AppPaths::new().store_dir)
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use page_reader::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub recognition: RecognitionConfig,
    pub pipeline: PipelineConfig,
    pub speech: SpeechConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
