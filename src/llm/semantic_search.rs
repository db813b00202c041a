use anyhow::{Error, Result};
use log::{info, warn};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::database::{EmbeddingEntry, Metadata, StoreMode, VectorStore};
use crate::document::ProcessedDocument;
use crate::llm::chunking::{chunk_text, CHUNK_OVERLAP, CHUNK_SIZE};
use crate::llm::embeddings::Embedder;
use crate::rcm::heuristics::baseline_result;

const QUERY_CACHE_SIZE: usize = 128;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub text: String,
    pub score: f32,
    pub source: String,
    pub metadata: Metadata,
}

/// Embedding index over uploaded documents.
pub struct SemanticSearch {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl SemanticSearch {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        let capacity = NonZeroUsize::new(QUERY_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            embedder,
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn mode(&self) -> StoreMode {
        self.store.mode()
    }

    fn entries_for(document: &ProcessedDocument) -> Vec<(String, String, Metadata)> {
        let source = document.metadata.file_name.clone();
        let mut entries = Vec::new();

        if let Some(text) = document.text() {
            let chunks = chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
            let total = chunks.len();
            for (i, chunk) in chunks.into_iter().enumerate() {
                let metadata = Metadata::from([
                    ("chunk_index".to_string(), json!(i)),
                    ("source".to_string(), json!(source)),
                    ("document_id".to_string(), json!(document.id)),
                    ("file_type".to_string(), json!(document.metadata.format.extension())),
                    ("total_chunks".to_string(), json!(total)),
                ]);
                entries.push((format!("{}-chunk-{}", document.id, i), chunk, metadata));
            }
            return entries;
        }

        for (i, record) in document.records.iter().enumerate() {
            let result = baseline_result(record);
            let text = format!(
                "Department: {}\nControl Objective: {}\nWhat Can Go Wrong: {}\nRisk Level: {}\nControl Activities: {}\nGap Details: {}",
                record.department,
                record.control_objective,
                record.what_can_go_wrong,
                result.risk_level,
                record.control_activities,
                result.control_gap,
            );
            let metadata = Metadata::from([
                ("document_type".to_string(), json!("control_objective")),
                ("department".to_string(), json!(record.department)),
                ("risk_level".to_string(), json!(result.risk_level.as_str())),
                ("has_gap".to_string(), json!(result.is_gap)),
                ("source".to_string(), json!(source)),
                ("document_id".to_string(), json!(document.id)),
            ]);
            entries.push((format!("{}-obj-{}", document.id, i), text, metadata));

            if result.is_gap {
                let text = format!(
                    "Control gap in {}: {}\nObjective: {}",
                    record.department, result.control_gap, record.control_objective
                );
                let metadata = Metadata::from([
                    ("document_type".to_string(), json!("gap")),
                    ("department".to_string(), json!(record.department)),
                    ("source".to_string(), json!(source)),
                    ("document_id".to_string(), json!(document.id)),
                ]);
                entries.push((format!("{}-gap-{}", document.id, i), text, metadata));
            }
        }
        entries
    }

    /// Embed and store the document's chunks or records. Returns the entry count.
    pub async fn index_document(&self, document: &ProcessedDocument) -> Result<usize> {
        let entries = Self::entries_for(document);
        if entries.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = entries.iter().map(|(_, text, _)| text.clone()).collect();
        let embeddings = self.embedder.generate_batch_embeddings(&texts).await?;

        let entries: Vec<EmbeddingEntry> = entries
            .into_iter()
            .zip(embeddings)
            .map(|((id, document, metadata), embedding)| EmbeddingEntry {
                id,
                document,
                metadata,
                embedding,
            })
            .collect();

        let added = self.store
            .add(entries)
            .await
            .map_err(|e| Error::msg(format!("Failed to index document: {}", e)))?;
        info!("Indexed {} entries for {} in {} store", added, document.metadata.file_name, self.mode());
        Ok(added)
    }

    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.lock().get(query) {
            return Ok(cached.clone());
        }
        let embedding = self.embedder.generate_embedding(query).await?;
        self.query_cache.lock().put(query.to_string(), embedding.clone());
        Ok(embedding)
    }

    pub async fn search(&self, query: &str, limit: usize, filter: Option<&Metadata>) -> Result<Vec<SearchResult>> {
        let embedding = self.query_embedding(query).await?;
        let matches = self.store
            .query(&embedding, limit, filter)
            .await
            .map_err(|e| Error::msg(format!("Failed to search: {}", e)))?;

        Ok(matches
            .into_iter()
            .map(|m| SearchResult {
                source: m.metadata
                    .get("source")
                    .and_then(|s| s.as_str())
                    .unwrap_or_default()
                    .to_string(),
                text: m.document,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }

    /// Retrieved passages from one document, formatted for a prompt.
    /// Empty when nothing is indexed or the store fails.
    pub async fn context_for(&self, document_id: &str, query: &str, limit: usize) -> String {
        let filter = Metadata::from([("document_id".to_string(), json!(document_id))]);
        match self.search(query, limit, Some(&filter)).await {
            Ok(results) => Self::format_results(&results),
            Err(e) => {
                warn!("Context retrieval failed: {}", e);
                String::new()
            }
        }
    }

    pub fn format_results(results: &[SearchResult]) -> String {
        let mut formatted = String::new();

        for (i, result) in results.iter().enumerate() {
            formatted.push_str(&format!(
                "{}. [Score: {:.2}] {} (Source: {})\n",
                i + 1,
                result.score,
                result.text,
                result.source
            ));
        }

        formatted
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await.map_err(|e| Error::msg(e.to_string()))
    }

    pub async fn clear(&self) -> Result<()> {
        self.query_cache.lock().clear();
        self.store.clear().await.map_err(|e| Error::msg(e.to_string()))
    }
}
