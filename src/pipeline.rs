use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AppConfig, EmbeddingBackend};
use crate::database::{open_vector_store, StoreMode};
use crate::document::{process_document, IngestError, ProcessedDocument};
use crate::llm::{AnalysisEngine, AnalysisError, Embedder, EmbeddingGenerator, HashingEmbedder, SemanticSearch};
use crate::providers::gemini::{GeminiProvider, RCM_SYSTEM_MESSAGE};
use crate::providers::traits::CompletionProvider;
use crate::rcm::{AnalysisOptions, Assessment};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Upload to assessment: parse, index, analyze.
pub struct Pipeline {
    provider: Arc<dyn CompletionProvider>,
    engine: AnalysisEngine,
    search: Arc<SemanticSearch>,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn CompletionProvider>, search: Arc<SemanticSearch>) -> Self {
        Self {
            engine: AnalysisEngine::new(provider.clone(), Some(search.clone())),
            provider,
            search,
        }
    }

    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let provider: Arc<dyn CompletionProvider> =
            Arc::new(GeminiProvider::new(&config.gemini, RCM_SYSTEM_MESSAGE.to_string())?);
        let embedder: Arc<dyn Embedder> = match config.store.embeddings {
            EmbeddingBackend::Local => Arc::new(HashingEmbedder::default()),
            EmbeddingBackend::Gemini => Arc::new(EmbeddingGenerator::new(provider.clone())),
        };
        info!("Using {} embeddings", embedder.name());

        let store = open_vector_store(&config.store.data_dir, &config.store.collection, config.store.preference).await;
        Ok(Self::new(provider, Arc::new(SemanticSearch::new(store, embedder))))
    }

    pub fn search(&self) -> &Arc<SemanticSearch> {
        &self.search
    }

    pub fn store_mode(&self) -> StoreMode {
        self.search.mode()
    }

    pub async fn model(&self) -> Option<String> {
        self.provider.get_model_info().await.ok()
    }

    /// Parses off the async runtime, then indexes. Indexing failures only warn.
    pub async fn ingest(&self, file_name: &str, bytes: Vec<u8>) -> Result<ProcessedDocument, PipelineError> {
        let name = file_name.to_string();
        let document = tokio::task::spawn_blocking(move || process_document(&name, &bytes))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;

        if let Err(e) = self.search.index_document(&document).await {
            warn!("Indexing {} failed, continuing without retrieval: {}", file_name, e);
        }
        Ok(document)
    }

    pub async fn analyze(
        &self,
        document: &ProcessedDocument,
        options: &AnalysisOptions,
    ) -> Result<Assessment, PipelineError> {
        Ok(self.engine.analyze(document, options).await?)
    }

    pub async fn run(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        options: &AnalysisOptions,
    ) -> Result<Assessment, PipelineError> {
        let document = self.ingest(file_name, bytes).await?;
        self.analyze(&document, options).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::OfflineProvider;
    use super::*;
    use crate::database::MemoryVectorStore;
    use crate::rcm::AnalysisDepth;

    fn pipeline(embedder: Arc<dyn Embedder>) -> Pipeline {
        let search = Arc::new(SemanticSearch::new(Arc::new(MemoryVectorStore::new()), embedder));
        Pipeline::new(Arc::new(OfflineProvider), search)
    }

    const CSV: &str = "Department,Control Objective,What Can Go Wrong\n\
                       Payroll,Salary accuracy,Unauthorized salary change\n";

    #[tokio::test]
    async fn test_run_with_offline_provider() {
        let pipeline = pipeline(Arc::new(HashingEmbedder::default()));
        let options = AnalysisOptions {
            depth: AnalysisDepth::Standard,
            include_recommendations: true,
        };
        let assessment = pipeline.run("rcm.csv", CSV.as_bytes().to_vec(), &options).await.unwrap();
        assert_eq!(assessment.controls.len(), 1);
        assert_eq!(assessment.recommendations[0].title, "Review Control Framework for Payroll");
        assert_eq!(pipeline.search().count().await.unwrap(), 2);
        assert_eq!(pipeline.store_mode(), StoreMode::InMemory);
    }

    #[tokio::test]
    async fn test_indexing_failure_is_not_fatal() {
        let provider: Arc<dyn CompletionProvider> = Arc::new(OfflineProvider);
        let pipeline = pipeline(Arc::new(EmbeddingGenerator::new(provider)));
        let document = pipeline.ingest("rcm.csv", CSV.as_bytes().to_vec()).await.unwrap();
        assert_eq!(document.records.len(), 1);
        assert_eq!(pipeline.search().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_errors() {
        let pipeline = pipeline(Arc::new(HashingEmbedder::default()));
        let err = pipeline.ingest("notes.txt", b"hello".to_vec()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Ingest(IngestError::UnsupportedFormat(_))));
    }
}
