//! Topic exemplar retrieval over a persistent sqlite-vec collection.
//!
//! The index is pre-built offline (see [`TopicIndexBuilder`]) and treated
//! as read-only at query time. Opening is lazy: the first query resolves
//! the database and collection, and a failure there is cached and
//! re-raised on every subsequent call.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::embedding::TextEncoder;
use crate::errors::{CounselingError, CounselingResult};

/// Raw neighbors requested before topic deduplication. Several neighbors
/// may collapse to the same topic, so fetching exactly `top_k` could
/// starve the result set.
const MIN_RAW_NEIGHBORS: usize = 20;

static SQLITE_VEC_INIT_RC: OnceLock<i32> = OnceLock::new();

/// A deduplicated nearest-exemplar hit. Lower distance means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMatch {
    pub topic: String,
    pub distance: f32,
}

/// Read-only handle on the topic exemplar collection.
pub struct TopicIndex {
    db_path: PathBuf,
    collection: String,
    encoder: Arc<dyn TextEncoder>,
    pool: tokio::sync::OnceCell<Result<SqlitePool, OpenFailure>>,
}

#[derive(Debug, Clone)]
enum OpenFailure {
    Unavailable(String),
    Failed(String),
}

impl From<OpenFailure> for CounselingError {
    fn from(failure: OpenFailure) -> Self {
        match failure {
            OpenFailure::Unavailable(message) => CounselingError::RetrievalUnavailable(message),
            OpenFailure::Failed(message) => CounselingError::RetrievalFailed(message),
        }
    }
}

impl TopicIndex {
    pub fn new(
        db_path: impl Into<PathBuf>,
        collection: impl Into<String>,
        encoder: Arc<dyn TextEncoder>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            collection: collection.into(),
            encoder,
            pool: tokio::sync::OnceCell::new(),
        }
    }

    /// Query the nearest topic exemplars for `text`.
    ///
    /// Results are nearest-first, deduplicated by topic, within
    /// `distance_threshold` and capped at `top_k`. Empty query text
    /// yields an empty result without touching the index.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        distance_threshold: f32,
    ) -> CounselingResult<Vec<TopicMatch>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.ensure_open().await?;

        let encoder = Arc::clone(&self.encoder);
        let query_text = text.to_string();
        let mut vectors = tokio::task::spawn_blocking(move || encoder.encode(&[query_text]))
            .await
            .map_err(|err| CounselingError::RetrievalFailed(err.to_string()))??;
        let Some(vector) = vectors.pop() else {
            return Ok(Vec::new());
        };

        let payload = serde_json::to_string(&vector)
            .map_err(|err| CounselingError::RetrievalFailed(err.to_string()))?;
        let raw_limit = top_k.max(MIN_RAW_NEIGHBORS);

        let sql = format!(
            "SELECT topic, distance FROM {} WHERE embedding MATCH ? ORDER BY distance ASC LIMIT ?",
            self.collection
        );
        let rows: Vec<(Option<String>, Option<f64>)> = sqlx::query_as(&sql)
            .bind(payload)
            .bind(raw_limit as i64)
            .fetch_all(pool)
            .await
            .map_err(|err| CounselingError::RetrievalFailed(err.to_string()))?;

        Ok(filter_matches(rows, top_k, distance_threshold))
    }

    async fn ensure_open(&self) -> CounselingResult<&SqlitePool> {
        let slot = self.pool.get_or_init(|| self.open()).await;
        match slot {
            Ok(pool) => Ok(pool),
            Err(failure) => Err(failure.clone().into()),
        }
    }

    async fn open(&self) -> Result<SqlitePool, OpenFailure> {
        init_sqlite_vec_once()
            .map_err(|err| OpenFailure::Failed(err.to_string()))?;

        if let Err(err) = validate_collection_name(&self.collection) {
            return Err(OpenFailure::Failed(err.to_string()));
        }

        if !self.db_path.exists() {
            return Err(OpenFailure::Unavailable(format!(
                "topic index not found: {}",
                self.db_path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.db_path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|err| OpenFailure::Failed(err.to_string()))?;

        let table: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&self.collection)
                .fetch_optional(&pool)
                .await
                .map_err(|err| OpenFailure::Failed(err.to_string()))?;
        if table.is_none() {
            return Err(OpenFailure::Unavailable(format!(
                "collection '{}' missing from {}",
                self.collection,
                self.db_path.display()
            )));
        }

        Ok(pool)
    }
}

/// Filter raw neighbors into the final match list: drop rows with missing
/// or non-finite distances, rows past the distance ceiling and rows with
/// empty topic labels, then deduplicate by topic keeping the nearest
/// occurrence, stopping at `top_k`.
fn filter_matches(
    rows: Vec<(Option<String>, Option<f64>)>,
    top_k: usize,
    distance_threshold: f32,
) -> Vec<TopicMatch> {
    let mut results: Vec<TopicMatch> = Vec::new();
    for (topic, distance) in rows {
        let Some(distance) = distance else { continue };
        let distance = distance as f32;
        if !distance.is_finite() || distance > distance_threshold {
            continue;
        }
        let Some(topic) = topic else { continue };
        if topic.is_empty() || results.iter().any(|m| m.topic == topic) {
            continue;
        }
        results.push(TopicMatch { topic, distance });
        if results.len() >= top_k {
            break;
        }
    }
    results
}

fn validate_collection_name(name: &str) -> CounselingResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CounselingError::InvalidCollection(name.to_string()))
    }
}

/// Register sqlite-vec as a process-wide auto-extension, once.
fn init_sqlite_vec_once() -> CounselingResult<()> {
    use libsqlite3_sys::{SQLITE_OK, sqlite3, sqlite3_api_routines, sqlite3_auto_extension};
    use sqlite_vec::sqlite3_vec_init;

    let rc = *SQLITE_VEC_INIT_RC.get_or_init(|| unsafe {
        type SqliteVecInitFn =
            unsafe extern "C" fn(*mut sqlite3, *mut *const i8, *const sqlite3_api_routines) -> i32;

        sqlite3_auto_extension(Some(std::mem::transmute::<*const (), SqliteVecInitFn>(
            sqlite3_vec_init as *const (),
        )))
    });

    if rc == SQLITE_OK {
        Ok(())
    } else {
        Err(CounselingError::SqliteVec(format!(
            "sqlite-vec init failed with code {rc}"
        )))
    }
}

/// Offline construction of the topic exemplar collection.
///
/// Creates (or opens) the database file and its vec0 virtual table, then
/// inserts `(topic, embedding)` exemplar rows. Query-time code never
/// writes; this is the indexing tool's and the test suite's seeding path.
pub struct TopicIndexBuilder {
    pool: SqlitePool,
    collection: String,
}

impl TopicIndexBuilder {
    pub async fn create(
        db_path: &Path,
        collection: &str,
        dimension: usize,
    ) -> CounselingResult<Self> {
        init_sqlite_vec_once()?;
        validate_collection_name(collection)?;

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let create_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(embedding float[{}], +topic text)",
            collection, dimension
        );
        sqlx::query(&create_sql).execute(&pool).await?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    pub async fn insert(&self, topic: &str, embedding: &[f32]) -> CounselingResult<()> {
        let payload = serde_json::to_string(embedding)
            .map_err(|err| CounselingError::RetrievalFailed(err.to_string()))?;
        let sql = format!(
            "INSERT INTO {}(embedding, topic) VALUES (?, ?)",
            self.collection
        );
        sqlx::query(&sql)
            .bind(payload)
            .bind(topic)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn finish(self) {
        self.pool.close().await;
    }
}
