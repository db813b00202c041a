use async_trait::async_trait;
use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use super::database::{Database, DOCUMENT_ID_KEY};

#[derive(Error, Debug)]
pub enum VectorDBError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Operation failed: {0}")]
    Operation(String),
    #[error("Invalid SQLite version: {0}")]
    InvalidVersion(String),
}

pub type Metadata = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StoreMode {
    Persistent,
    InMemory,
}

impl StoreMode {
    pub fn for_sqlite_version(version: SqliteVersion) -> Self {
        if version >= SqliteVersion::PERSISTENCE_MINIMUM {
            StoreMode::Persistent
        } else {
            StoreMode::InMemory
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Persistent => f.write_str("persistent"),
            StoreMode::InMemory => f.write_str("in-memory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SqliteVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SqliteVersion {
    pub const PERSISTENCE_MINIMUM: SqliteVersion = SqliteVersion { major: 3, minor: 35, patch: 0 };
}

impl FromStr for SqliteVersion {
    type Err = VectorDBError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.').map(|p| p.parse::<u32>());
        let mut next = |required: bool| match parts.next() {
            Some(Ok(n)) => Ok(n),
            None if !required => Ok(0),
            _ => Err(VectorDBError::InvalidVersion(s.to_string())),
        };
        Ok(SqliteVersion {
            major: next(true)?,
            minor: next(true)?,
            patch: next(false)?,
        })
    }
}

impl fmt::Display for SqliteVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Which store to open: decided from the SQLite version, or forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorePreference {
    #[default]
    Auto,
    Memory,
    Persistent,
}

impl FromStr for StorePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(StorePreference::Auto),
            "memory" | "in-memory" => Ok(StorePreference::Memory),
            "persistent" | "sqlite" => Ok(StorePreference::Persistent),
            other => Err(format!("unknown vector store mode: {}", other)),
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn mode(&self) -> StoreMode;

    async fn add(&self, entries: Vec<EmbeddingEntry>) -> Result<usize, VectorDBError>;

    /// Nearest entries by cosine similarity. Every key of `filter` must equal
    /// the entry's metadata value.
    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<QueryMatch>, VectorDBError>;

    async fn count(&self) -> Result<usize, VectorDBError>;

    async fn clear(&self) -> Result<(), VectorDBError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a * norm_b))
}

fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    filter.map_or(true, |f| f.iter().all(|(k, v)| metadata.get(k) == Some(v)))
}

fn rank<'a, I>(entries: I, query: &[f32], limit: usize, filter: Option<&Metadata>) -> Vec<QueryMatch>
where
    I: IntoIterator<Item = &'a EmbeddingEntry>,
{
    let mut scored: Vec<QueryMatch> = entries
        .into_iter()
        .filter(|e| matches_filter(&e.metadata, filter))
        .filter_map(|e| {
            // entries from another embedder have a different width
            let score = cosine_similarity(query, &e.embedding)?;
            Some(QueryMatch {
                id: e.id.clone(),
                document: e.document.clone(),
                metadata: e.metadata.clone(),
                score,
            })
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[derive(Default)]
pub struct MemoryVectorStore {
    entries: RwLock<Vec<EmbeddingEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn mode(&self) -> StoreMode {
        StoreMode::InMemory
    }

    async fn add(&self, entries: Vec<EmbeddingEntry>) -> Result<usize, VectorDBError> {
        let mut stored = self.entries.write();
        let added = entries.len();
        for entry in entries {
            match stored.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => stored.push(entry),
            }
        }
        Ok(added)
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<QueryMatch>, VectorDBError> {
        Ok(rank(self.entries.read().iter(), embedding, limit, filter))
    }

    async fn count(&self) -> Result<usize, VectorDBError> {
        Ok(self.entries.read().len())
    }

    async fn clear(&self) -> Result<(), VectorDBError> {
        self.entries.write().clear();
        Ok(())
    }
}

pub struct SqliteVectorStore {
    db: Database,
    collection: String,
}

impl SqliteVectorStore {
    pub async fn open(path: &Path, collection: &str) -> Result<Self, VectorDBError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VectorDBError::Connection(e.to_string()))?;
        }
        let db = Database::new(path)
            .await
            .map_err(|e| VectorDBError::Connection(e.to_string()))?;
        Ok(Self {
            db,
            collection: collection.to_string(),
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Persistent
    }

    async fn add(&self, entries: Vec<EmbeddingEntry>) -> Result<usize, VectorDBError> {
        self.db
            .insert_embeddings(&self.collection, entries)
            .await
            .map_err(|e| VectorDBError::Operation(e.to_string()))
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<QueryMatch>, VectorDBError> {
        let document_id = filter
            .and_then(|f| f.get(DOCUMENT_ID_KEY))
            .and_then(|v| v.as_str());
        let entries = self
            .db
            .load_embeddings(&self.collection, document_id)
            .await
            .map_err(|e| VectorDBError::Operation(e.to_string()))?;
        Ok(rank(entries.iter(), embedding, limit, filter))
    }

    async fn count(&self) -> Result<usize, VectorDBError> {
        self.db
            .count_embeddings(&self.collection)
            .await
            .map_err(|e| VectorDBError::Operation(e.to_string()))
    }

    async fn clear(&self) -> Result<(), VectorDBError> {
        self.db
            .clear_collection(&self.collection)
            .await
            .map_err(|e| VectorDBError::Operation(e.to_string()))
    }
}

async fn probe_sqlite_version() -> Result<SqliteVersion, VectorDBError> {
    let db = Database::in_memory()
        .await
        .map_err(|e| VectorDBError::Connection(e.to_string()))?;
    let version = db
        .sqlite_version()
        .await
        .map_err(|e| VectorDBError::Operation(e.to_string()))?;
    version.parse()
}

/// Open the embedding store once for the lifetime of the process.
///
/// `Auto` keeps embeddings on disk when the linked SQLite is at least
/// 3.35.0 and in memory otherwise. Any failure on the persistent path
/// degrades to the in-memory store.
pub async fn open_vector_store(
    data_dir: &Path,
    collection: &str,
    preference: StorePreference,
) -> Arc<dyn VectorStore> {
    let mode = match preference {
        StorePreference::Memory => StoreMode::InMemory,
        StorePreference::Persistent => StoreMode::Persistent,
        StorePreference::Auto => match probe_sqlite_version().await {
            Ok(version) => {
                let mode = StoreMode::for_sqlite_version(version);
                info!("SQLite {} detected, using {} vector store", version, mode);
                mode
            }
            Err(e) => {
                warn!("Could not determine SQLite version ({}), using in-memory vector store", e);
                StoreMode::InMemory
            }
        },
    };

    if mode == StoreMode::Persistent {
        let path = data_dir.join("vector_store").join("embeddings.db");
        match SqliteVectorStore::open(&path, collection).await {
            Ok(store) => {
                info!("Persistent vector store at {}", path.display());
                return Arc::new(store);
            }
            Err(e) => warn!("Failed to open persistent vector store: {}. Falling back to in-memory", e),
        }
    }

    Arc::new(MemoryVectorStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, department: &str, embedding: Vec<f32>) -> EmbeddingEntry {
        EmbeddingEntry {
            id: id.to_string(),
            document: id.to_string(),
            metadata: HashMap::from([("department".to_string(), json!(department))]),
            embedding,
        }
    }

    #[test]
    fn test_version_threshold_selects_mode() {
        let old: SqliteVersion = "3.34.1".parse().unwrap();
        let exact: SqliteVersion = "3.35.0".parse().unwrap();
        let newer: SqliteVersion = "3.45.2".parse().unwrap();
        assert_eq!(StoreMode::for_sqlite_version(old), StoreMode::InMemory);
        assert_eq!(StoreMode::for_sqlite_version(exact), StoreMode::Persistent);
        assert_eq!(StoreMode::for_sqlite_version(newer), StoreMode::Persistent);
        assert_eq!(
            StoreMode::for_sqlite_version("2.8.17".parse().unwrap()),
            StoreMode::InMemory
        );
        assert_eq!(
            StoreMode::for_sqlite_version("4.0".parse().unwrap()),
            StoreMode::Persistent
        );
    }

    #[test]
    fn test_version_parse_errors() {
        assert!("".parse::<SqliteVersion>().is_err());
        assert!("three".parse::<SqliteVersion>().is_err());
        assert_eq!("3.35".parse::<SqliteVersion>().unwrap(), SqliteVersion::PERSISTENCE_MINIMUM);
    }

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
    }

    #[tokio::test]
    async fn test_memory_store_query_and_filter() {
        let store = MemoryVectorStore::new();
        store
            .add(vec![
                entry("payroll-1", "Payroll", vec![1.0, 0.0]),
                entry("payroll-2", "Payroll", vec![0.7, 0.7]),
                entry("hr-1", "HR", vec![0.9, 0.1]),
                entry("wide", "Payroll", vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let all = store.query(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "payroll-1");
        assert_eq!(all[1].id, "hr-1");

        let filter = HashMap::from([("department".to_string(), json!("Payroll"))]);
        let payroll = store.query(&[1.0, 0.0], 1, Some(&filter)).await.unwrap();
        assert_eq!(payroll.len(), 1);
        assert_eq!(payroll[0].id, "payroll-1");

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_store").join("embeddings.db");
        {
            let store = SqliteVectorStore::open(&path, "rcm").await.unwrap();
            store.add(vec![entry("a", "Payroll", vec![0.0, 1.0])]).await.unwrap();
        }
        let reopened = SqliteVectorStore::open(&path, "rcm").await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let found = reopened.query(&[0.0, 1.0], 5, None).await.unwrap();
        assert_eq!(found[0].id, "a");
        assert_eq!(reopened.mode(), StoreMode::Persistent);
    }

    #[tokio::test]
    async fn test_persistent_store_filters_by_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::open(&dir.path().join("embeddings.db"), "rcm").await.unwrap();
        let mut current = entry("current", "Payroll", vec![1.0, 0.0]);
        current.metadata.insert("document_id".to_string(), json!("doc-2"));
        let mut previous = entry("previous", "Payroll", vec![1.0, 0.0]);
        previous.metadata.insert("document_id".to_string(), json!("doc-1"));
        store.add(vec![current, previous]).await.unwrap();

        let filter = HashMap::from([
            ("document_id".to_string(), json!("doc-2")),
            ("department".to_string(), json!("Payroll")),
        ]);
        let found = store.query(&[1.0, 0.0], 5, Some(&filter)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "current");
    }

    #[tokio::test]
    async fn test_unopenable_persistent_store_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the data directory should be
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = open_vector_store(&blocker, "rcm", StorePreference::Persistent).await;
        assert_eq!(store.mode(), StoreMode::InMemory);
        store.add(vec![entry("a", "Payroll", vec![1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_open_vector_store_honours_preference() {
        let dir = tempfile::tempdir().unwrap();
        let memory = open_vector_store(dir.path(), "rcm", StorePreference::Memory).await;
        assert_eq!(memory.mode(), StoreMode::InMemory);

        let auto = open_vector_store(dir.path(), "rcm", StorePreference::Auto).await;
        assert_eq!(auto.mode(), StoreMode::Persistent);
        assert!(dir.path().join("vector_store").join("embeddings.db").exists());
    }
}
