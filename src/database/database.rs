use rusqlite::params;
use tokio_rusqlite::Connection;
use std::path::Path;
use log::info;
use thiserror::Error;
use std::sync::Arc;
use std::collections::HashMap;
use super::vector_db::EmbeddingEntry;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("Database connection error: {0}")]
    Connection(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// SQLite table of embeddings, one row per stored entry.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Connection>,
}

type EmbeddingRow = (String, String, String, Vec<u8>);

/// Key under which entries carry their source document.
pub const DOCUMENT_ID_KEY: &str = "document_id";

/// Vectors are stored as little-endian `f32` blobs.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl Database {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self { conn: Arc::new(conn) };
        db.initialize().await?;
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self { conn: Arc::new(conn) };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS embeddings (
                    id TEXT PRIMARY KEY,
                    collection TEXT NOT NULL,
                    document TEXT NOT NULL,
                    document_id TEXT,
                    metadata TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
                );
                CREATE INDEX IF NOT EXISTS idx_embeddings_document ON embeddings (collection, document_id);"
            )
        })
        .await?;

        info!("Database initialized successfully");
        Ok(())
    }

    /// Version string of the linked SQLite library, e.g. "3.45.1".
    pub async fn sqlite_version(&self) -> Result<String, DatabaseError> {
        let version = self.conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await?;
        Ok(version)
    }

    pub async fn insert_embeddings(
        &self,
        collection: &str,
        entries: Vec<EmbeddingEntry>,
    ) -> Result<usize, DatabaseError> {
        let collection = collection.to_string();
        let mut rows: Vec<(EmbeddingRow, Option<String>)> = Vec::with_capacity(entries.len());
        for entry in entries {
            let document_id = entry
                .metadata
                .get(DOCUMENT_ID_KEY)
                .and_then(|v| v.as_str())
                .map(str::to_string);
            rows.push((
                (
                    entry.id,
                    entry.document,
                    serde_json::to_string(&entry.metadata)?,
                    encode_vector(&entry.embedding),
                ),
                document_id,
            ));
        }

        let inserted = self.conn
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO embeddings (id, collection, document, document_id, metadata, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                    )?;
                    for ((id, document, metadata, embedding), document_id) in &rows {
                        stmt.execute(params![id, collection, document, document_id, metadata, embedding])?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await?;

        Ok(inserted)
    }

    /// Entries of a collection, optionally only those of one document.
    pub async fn load_embeddings(
        &self,
        collection: &str,
        document_id: Option<&str>,
    ) -> Result<Vec<EmbeddingEntry>, DatabaseError> {
        let collection = collection.to_string();
        let document_id = document_id.map(str::to_string);
        let rows = self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, document, metadata, embedding
                     FROM embeddings
                     WHERE collection = ?1 AND (?2 IS NULL OR document_id = ?2)
                     ORDER BY created_at"
                )?;

                let rows = stmt.query_map(params![collection, document_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })?;

                let mut entries: Vec<EmbeddingRow> = Vec::new();
                for row in rows {
                    entries.push(row?);
                }

                Ok(entries)
            })
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, document, metadata, embedding) in rows {
            entries.push(EmbeddingEntry {
                id,
                document,
                metadata: serde_json::from_str::<HashMap<String, serde_json::Value>>(&metadata)?,
                embedding: decode_vector(&embedding),
            });
        }
        Ok(entries)
    }

    pub async fn count_embeddings(&self, collection: &str) -> Result<usize, DatabaseError> {
        let collection = collection.to_string();
        let count = self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM embeddings WHERE collection = ?",
                    [&collection],
                    |row| row.get::<_, i64>(0),
                )
            })
            .await?;
        Ok(count.max(0) as usize)
    }

    pub async fn clear_collection(&self, collection: &str) -> Result<(), DatabaseError> {
        let collection = collection.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM embeddings WHERE collection = ?", [&collection])
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, embedding: Vec<f32>) -> EmbeddingEntry {
        EmbeddingEntry {
            id: id.to_string(),
            document: format!("document {}", id),
            metadata: HashMap::from([("department".to_string(), json!("Payroll"))]),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_sqlite_version_is_reported() {
        let db = Database::in_memory().await.unwrap();
        let version = db.sqlite_version().await.unwrap();
        assert!(version.starts_with("3."));
    }

    #[tokio::test]
    async fn test_embeddings_roundtrip_per_collection() {
        let db = Database::in_memory().await.unwrap();
        db.insert_embeddings("rcm", vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        db.insert_embeddings("other", vec![entry("c", vec![0.5, 0.5])]).await.unwrap();

        let loaded = db.load_embeddings("rcm", None).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.iter().find(|e| e.id == "a").unwrap().embedding, vec![1.0, 0.0]);
        assert_eq!(loaded[0].metadata["department"], json!("Payroll"));
        assert_eq!(db.count_embeddings("other").await.unwrap(), 1);

        db.clear_collection("rcm").await.unwrap();
        assert_eq!(db.count_embeddings("rcm").await.unwrap(), 0);
        assert_eq!(db.count_embeddings("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_load_filters_by_document_in_sql() {
        let db = Database::in_memory().await.unwrap();
        let mut first = entry("a", vec![0.25, -1.5, 3.0]);
        first.metadata.insert(DOCUMENT_ID_KEY.to_string(), json!("doc-1"));
        let mut second = entry("b", vec![1.0, 0.0, 0.0]);
        second.metadata.insert(DOCUMENT_ID_KEY.to_string(), json!("doc-2"));
        db.insert_embeddings("rcm", vec![first, second, entry("c", vec![0.0, 1.0, 0.0])])
            .await
            .unwrap();

        let only = db.load_embeddings("rcm", Some("doc-1")).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, "a");
        assert_eq!(only[0].embedding, vec![0.25, -1.5, 3.0]);
        assert_eq!(db.load_embeddings("rcm", None).await.unwrap().len(), 3);
        assert!(db.load_embeddings("rcm", Some("missing")).await.unwrap().is_empty());
    }

    #[test]
    fn test_vector_blob_encoding() {
        let vector = vec![1.0, -0.5, f32::MIN_POSITIVE];
        let bytes = encode_vector(&vector);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_vector(&bytes), vector);
    }
}
