//! Where page-reader keeps its files.
//!
//! Settings live in the per-user config directory, documents in the local
//! data directory, so a synced config folder never drags the document
//! collection along with it:
//!
//! ```text
//! <config_dir>/page-reader/settings.toml     AppConfig (TOML)
//! <data_local_dir>/page-reader/store/        FileStore, one <key>.json per key
//! ```
//!
//! `<config_dir>` and `<data_local_dir>` come from the `dirs` crate
//! (`~/.config` and `~/.local/share` on Linux, `%APPDATA%` and
//! `%LOCALAPPDATA%` on Windows, `~/Library/Application Support` on macOS).

use std::path::{Path, PathBuf};

const APP_NAME: &str = "page-reader";
const SETTINGS_FILE: &str = "settings.toml";
const STORE_DIR: &str = "store";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// `config_dir/settings.toml`.
    pub settings_file: PathBuf,
    /// Directory handed to `FileStore`.
    pub store_dir: PathBuf,
}

impl AppPaths {
    /// Platform directories, or `./page-reader` when the platform has none.
    pub fn new() -> Self {
        let fallback = || PathBuf::from(".");
        Self::layout(
            &dirs::config_dir().unwrap_or_else(fallback),
            &dirs::data_local_dir().unwrap_or_else(fallback),
        )
    }

    /// Everything under one directory (portable installs, tests).
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::layout(root, root)
    }

    fn layout(config_base: &Path, data_base: &Path) -> Self {
        let config_dir = config_base.join(APP_NAME);
        Self {
            settings_file: config_dir.join(SETTINGS_FILE),
            store_dir: data_base.join(APP_NAME).join(STORE_DIR),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
