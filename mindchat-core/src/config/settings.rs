//! Settings configuration loaded from TOML files.
//!
//! Non-sensitive configuration stored in TOML format in the XDG config
//! directory (`~/.config/mindchat/config.toml`). A missing file yields
//! defaults; an unparsable file is logged and also yields defaults, so a
//! corrupt config never prevents the application from starting.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::counseling::CounselingSettings;

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# mindchat configuration file
# Located at: ~/.config/mindchat/config.toml

[embedding]
# Path to a local sentence-embedding model directory. When unset, the
# bundled model is used if present, falling back to the model cache
# (downloading on first use).
# model_path = "/path/to/model"

[counseling]
# Path to the pre-built topic exemplar index.
# index_path = "/path/to/topic_index.sqlite3"

[counseling.routing]
# min_user_turns = 2
# distance_threshold = 1.1
# score_threshold = 1.2
# margin_threshold = 0.4
# top_k = 3
"#;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("toml serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

/// Application settings from the TOML configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub counseling: CounselingSettings,
}

/// Embedding model settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Explicit local model directory. Relative paths resolve against the
    /// data root.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        match Self::from_toml(&content) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::warn!("Failed to parse {:?}, using defaults: {}", config_path, err);
                Ok(Self::default())
            }
        }
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Serialize settings to TOML content.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path.
    ///
    /// Uses the XDG config directory: `~/.config/mindchat/config.toml`,
    /// overridable with `MINDCHAT_CONFIG_DIR`.
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("MINDCHAT_CONFIG_DIR") {
            let dir = PathBuf::from(override_dir);
            return Ok(dir.join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("mindchat");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Save settings to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = self.to_toml()?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let settings = Settings::from_toml(DEFAULT_CONFIG_TOML).unwrap();
        assert!(settings.embedding.model_path.is_none());
        assert_eq!(settings.counseling.routing.min_user_turns, 2);
    }

    #[test]
    fn test_from_toml_overrides() {
        let settings = Settings::from_toml(
            r#"
            [embedding]
            model_path = "models/minilm"

            [counseling]
            index_path = "db/topics.sqlite3"
            collection = "custom_topics"

            [counseling.routing]
            score_threshold = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(
            settings.embedding.model_path.as_deref(),
            Some(Path::new("models/minilm"))
        );
        assert_eq!(settings.counseling.collection, "custom_topics");
        assert_eq!(settings.counseling.routing.score_threshold, 2.0);
        // untouched fields keep defaults
        assert_eq!(settings.counseling.routing.margin_threshold, 0.4);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(Settings::from_toml("embedding = nonsense [").is_err());
    }

    #[test]
    fn test_round_trip() {
        let settings = Settings::default();
        let toml = settings.to_toml().unwrap();
        let parsed = Settings::from_toml(&toml).unwrap();
        assert_eq!(
            parsed.counseling.routing.top_k,
            settings.counseling.routing.top_k
        );
    }

    #[test]
    fn test_save_to_path_creates_parents_and_reloads() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut settings = Settings::default();
        settings.counseling.collection = "custom_topics".to_string();
        settings.embedding.model_path = Some(PathBuf::from("models/minilm"));
        settings.save_to_path(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed = Settings::from_toml(&content).unwrap();
        assert_eq!(parsed.counseling.collection, "custom_topics");
        assert_eq!(
            parsed.embedding.model_path.as_deref(),
            Some(Path::new("models/minilm"))
        );
    }
}
