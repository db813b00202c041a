pub mod analysis;
pub mod chunking;
pub mod embeddings;
pub mod prompts;
pub mod response;
pub mod semantic_search;

pub use analysis::{AnalysisEngine, AnalysisError};
pub use embeddings::{Embedder, EmbeddingGenerator, HashingEmbedder};
pub use semantic_search::{SearchResult, SemanticSearch};
