/// Embedding failures, cached per provider instance and re-raised without
/// retry, hence `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// The embedding runtime itself is not usable (e.g. the ONNX runtime
    /// library cannot be loaded).
    #[error("embedding runtime unavailable: {0}")]
    Unavailable(String),
    /// The runtime is present but the resolved model path or remote fetch
    /// could not produce a usable model.
    #[error("embedding model load failed: {0}")]
    LoadFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CounselingError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("topic index unavailable: {0}")]
    RetrievalUnavailable(String),
    #[error("topic retrieval failed: {0}")]
    RetrievalFailed(String),
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("sqlite-vec initialization error: {0}")]
    SqliteVec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CounselingResult<T> = Result<T, CounselingError>;
