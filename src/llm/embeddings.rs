use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::providers::traits::CompletionProvider;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> String;

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>>;

    async fn generate_batch_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let embedding = self.generate_embedding(text).await?;
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }
}

/// Local embedder: hashes character trigrams and words into a fixed-width,
/// L2-normalised vector. Needs no network access.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let index = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let normalized = text.to_lowercase();

        for word in normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut vector, &format!("w:{}", word), 2.0);

            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, &gram, 1.0);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> String {
        format!("hashing-{}", self.dimensions)
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }
}

/// Embeddings from the language model provider's embedding endpoint.
pub struct EmbeddingGenerator {
    provider: Arc<dyn CompletionProvider>,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Embedder for EmbeddingGenerator {
    fn name(&self) -> String {
        "provider".to_string()
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.provider.generate_embedding(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::vector_db::cosine_similarity;

    #[tokio::test]
    async fn test_hashing_embedding_shape() {
        let embedder = HashingEmbedder::default();
        let embedding = embedder.generate_embedding("Unauthorized payroll changes").await.unwrap();
        assert_eq!(embedding.len(), DEFAULT_EMBEDDING_DIMENSIONS);
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(embedder.embed("").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("payroll salary approval");
        let close = embedder.embed("approval of payroll salary changes");
        let far = embedder.embed("firewall patch management for servers");
        let close_score = cosine_similarity(&query, &close).unwrap();
        let far_score = cosine_similarity(&query, &far).unwrap();
        assert!(close_score > far_score);
    }

    #[tokio::test]
    async fn test_batch_embeddings() {
        let embedder = HashingEmbedder::new(16);
        let texts = vec!["a".to_string(), "b".to_string()];
        let embeddings = embedder.generate_batch_embeddings(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings.iter().all(|e| e.len() == 16));
    }
}
