//! Lazy loader for the local sentence-embedding model.
//!
//! The provider resolves a concrete model directory once at construction
//! (env override → settings → bundled resources → model cache) and loads
//! the fastembed model on first `encode`. A load happens at most once per
//! instance; a failed load is cached and re-raised so a broken model never
//! causes retry storms.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use fastembed::{InitOptions, TextEmbedding};
use mindchat_core::Config;

use crate::errors::EmbeddingError;

/// Model identifier of the multilingual sentence encoder
/// (`sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2`).
const FASTEMBED_MODEL: fastembed::EmbeddingModel =
    fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2;
const MODEL_DIRNAME: &str = "paraphrase-multilingual-MiniLM-L12-v2";
const MODEL_PATH_ENV: &str = "MINDCHAT_EMBEDDING_MODEL_PATH";

/// Text → vector encoding seam.
///
/// The production implementation is [`EmbeddingProvider`]; tests and
/// offline runs use [`HashEncoder`].
pub trait TextEncoder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Lazily-loaded fastembed model bound to a resolved on-disk location.
///
/// `TextEmbedding::embed` takes `&mut self`, so the loaded model sits
/// behind a `Mutex`; the surrounding `OnceLock` gives the lock-free fast
/// path once loading (or the cached failure) has settled.
pub struct EmbeddingProvider {
    model_path: PathBuf,
    slot: OnceLock<Result<Mutex<TextEmbedding>, EmbeddingError>>,
}

impl EmbeddingProvider {
    pub fn new(config: &Config) -> Self {
        Self {
            model_path: resolve_model_path(config),
            slot: OnceLock::new(),
        }
    }

    /// The model directory this provider resolved at construction.
    pub fn model_path(&self) -> &PathBuf {
        &self.model_path
    }

    fn ensure_loaded(&self) -> Result<&Mutex<TextEmbedding>, EmbeddingError> {
        // Fast path: steady-state calls never contend on the loading lock.
        if let Some(slot) = self.slot.get() {
            return slot.as_ref().map_err(Clone::clone);
        }
        self.slot
            .get_or_init(|| self.load().map(Mutex::new))
            .as_ref()
            .map_err(Clone::clone)
    }

    fn load(&self) -> Result<TextEmbedding, EmbeddingError> {
        let mut options =
            InitOptions::new(FASTEMBED_MODEL).with_show_download_progress(false);

        if self.model_path.exists() {
            // Local files present: point the cache at them so no network
            // fetch happens.
            tracing::info!("Loading embedding model from {:?}", self.model_path);
            options = options.with_cache_dir(self.model_path.clone());
        } else {
            // Fetch by identifier and persist under the resolved cache
            // path. A cache-directory failure must never fail the load;
            // fall back to fastembed's default cache.
            tracing::info!(
                "Embedding model not found locally, fetching into {:?}",
                self.model_path
            );
            match std::fs::create_dir_all(&self.model_path) {
                Ok(()) => options = options.with_cache_dir(self.model_path.clone()),
                Err(err) => {
                    tracing::warn!("Failed to create embedding model cache: {}", err);
                }
            }
        }

        TextEmbedding::try_new(options).map_err(|err| classify_load_error(&err.to_string()))
    }
}

impl TextEncoder for EmbeddingProvider {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.ensure_loaded()?;
        let mut model = model
            .lock()
            .map_err(|_| EmbeddingError::LoadFailed("embedding model lock poisoned".into()))?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|err| EmbeddingError::LoadFailed(err.to_string()))
    }
}

/// Resolution order: env override, settings path, bundled model directory
/// if it exists on disk, model cache fallback.
fn resolve_model_path(config: &Config) -> PathBuf {
    if let Ok(override_path) = std::env::var(MODEL_PATH_ENV) {
        let trimmed = override_path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    if let Some(path) = &config.settings.embedding.model_path {
        return config.resolve_path(path);
    }

    let bundled = config.paths.resource_dir.join("models").join(MODEL_DIRNAME);
    if bundled.exists() {
        return bundled;
    }

    config.paths.model_dir.join("embedding").join(MODEL_DIRNAME)
}

fn classify_load_error(message: &str) -> EmbeddingError {
    // The ONNX runtime shared library failing to load means the dependency
    // itself is unusable, not that this particular model is bad.
    if message.contains("onnxruntime") || message.contains("libonnxruntime") {
        EmbeddingError::Unavailable(message.to_string())
    } else {
        EmbeddingError::LoadFailed(message.to_string())
    }
}

/// Deterministic hash-based encoder for tests and offline runs.
///
/// Not semantically meaningful; it only guarantees that identical texts
/// map to identical unit-norm vectors of the requested dimensionality.
pub struct HashEncoder {
    dim: usize,
}

impl HashEncoder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl TextEncoder for HashEncoder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        use sha2::{Digest, Sha256};

        Ok(texts
            .iter()
            .map(|text| {
                let digest = Sha256::digest(text.as_bytes());
                let mut vector: Vec<f32> = (0..self.dim)
                    .map(|i| (digest[i % digest.len()] as f32 / 255.0) * 2.0 - 1.0)
                    .collect();
                let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
                for value in &mut vector {
                    *value /= norm;
                }
                vector
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindchat_core::Settings;

    #[test]
    fn test_hash_encoder_is_deterministic() {
        let encoder = HashEncoder::new(8);
        let a = encoder.encode(&["hello".to_string()]).unwrap();
        let b = encoder.encode(&["hello".to_string()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);

        let norm = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hash_encoder_empty_input() {
        let encoder = HashEncoder::new(8);
        assert!(encoder.encode(&[]).unwrap().is_empty());
    }

    // One test covers every tier: the env override is process-global, so
    // probing it from several parallel tests would race.
    #[test]
    fn test_resolve_model_path_tiers() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();

        // No overrides, nothing bundled: model cache fallback.
        let config = Config::with_root(root, Settings::default());
        assert_eq!(
            resolve_model_path(&config),
            root.join("models/embedding").join(MODEL_DIRNAME)
        );

        // A bundled model directory wins over the cache once it exists.
        let bundled = root.join("resources/models").join(MODEL_DIRNAME);
        std::fs::create_dir_all(&bundled).unwrap();
        assert_eq!(resolve_model_path(&config), bundled);

        // Settings path wins over the bundled directory; relative paths
        // resolve against the data root.
        let mut settings = Settings::default();
        settings.embedding.model_path = Some(PathBuf::from("custom/model"));
        let config_with_settings = Config::with_root(root, settings);
        assert_eq!(
            resolve_model_path(&config_with_settings),
            root.join("custom/model")
        );

        // The env override beats everything.
        unsafe { std::env::set_var(MODEL_PATH_ENV, "/env/model") };
        assert_eq!(
            resolve_model_path(&config_with_settings),
            PathBuf::from("/env/model")
        );
        unsafe { std::env::remove_var(MODEL_PATH_ENV) };
    }

    #[test]
    fn test_classify_load_error() {
        assert!(matches!(
            classify_load_error("could not open libonnxruntime.so"),
            EmbeddingError::Unavailable(_)
        ));
        assert!(matches!(
            classify_load_error("model.onnx is corrupt"),
            EmbeddingError::LoadFailed(_)
        ));
    }
}
