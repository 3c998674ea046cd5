//! Configuration management for mindchat.
//!
//! # Configuration Sources
//!
//! ## Settings (TOML File)
//! Located at `~/.config/mindchat/config.toml`:
//! ```toml
//! [embedding]
//! model_path = "/opt/models/minilm"
//!
//! [counseling]
//! index_path = "/var/lib/mindchat/topic_index.sqlite3"
//!
//! [counseling.routing]
//! min_user_turns = 2
//! distance_threshold = 1.1
//! ```
//!
//! ## Paths
//! The data root defaults to the XDG data directory
//! (`~/.local/share/mindchat`) and can be overridden with
//! `MINDCHAT_DATA_DIR`. Models and bundled resources live under it.

pub mod counseling;
mod settings;

use std::path::{Path, PathBuf};

pub use counseling::{CounselingSettings, RoutingSettings};
pub use settings::{EmbeddingSettings, Settings, SettingsError};

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("missing data directory")]
    MissingDataDir,
}

/// Filesystem roots used by the application.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Data root; all relative settings paths resolve against it.
    pub root: PathBuf,
    /// Downloaded model cache.
    pub model_dir: PathBuf,
    /// Bundled static resources (prompt data, pre-built indexes).
    pub resource_dir: PathBuf,
}

impl Paths {
    /// Resolve paths from the environment.
    ///
    /// `MINDCHAT_DATA_DIR` overrides the XDG data directory.
    pub fn resolve() -> Result<Self, ConfigError> {
        let root = if let Ok(override_dir) = std::env::var("MINDCHAT_DATA_DIR") {
            PathBuf::from(override_dir)
        } else {
            dirs::data_dir()
                .ok_or(ConfigError::MissingDataDir)?
                .join("mindchat")
        };
        Ok(Self::from_root(root))
    }

    /// Derive the standard layout under an explicit root (used by tests).
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let model_dir = root.join("models");
        let resource_dir = root.join("resources");
        Self {
            root,
            model_dir,
            resource_dir,
        }
    }
}

/// Combined configuration: filesystem paths plus TOML settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: Paths,
    pub settings: Settings,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let paths = Paths::resolve()?;
        let settings = Settings::load()?;
        Ok(Self { paths, settings })
    }

    /// Build a config over an explicit root with the given settings.
    pub fn with_root(root: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            paths: Paths::from_root(root),
            settings,
        }
    }

    /// Resolve a settings path: absolute paths pass through, relative
    /// paths are joined to the data root.
    pub fn resolve_path(&self, value: &Path) -> PathBuf {
        if value.is_absolute() {
            value.to_path_buf()
        } else {
            self.paths.root.join(value)
        }
    }
}

/// Load environment variables from a `.env` file if present.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {:?}", path),
        Err(_) => tracing::debug!("No .env file found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_from_root_layout() {
        let paths = Paths::from_root("/tmp/mindchat-test");
        assert_eq!(paths.model_dir, Path::new("/tmp/mindchat-test/models"));
        assert_eq!(
            paths.resource_dir,
            Path::new("/tmp/mindchat-test/resources")
        );
    }

    #[test]
    fn test_resolve_path() {
        let config = Config::with_root("/data/mindchat", Settings::default());
        assert_eq!(
            config.resolve_path(Path::new("models/minilm")),
            Path::new("/data/mindchat/models/minilm")
        );
        assert_eq!(
            config.resolve_path(Path::new("/abs/model")),
            Path::new("/abs/model")
        );
    }
}
