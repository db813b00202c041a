pub mod vector_db;
pub mod database;

pub use database::Database;
pub use database::DatabaseError;
pub use vector_db::{
    open_vector_store, EmbeddingEntry, MemoryVectorStore, Metadata, QueryMatch, SqliteVectorStore,
    SqliteVersion, StoreMode, StorePreference, VectorDBError, VectorStore,
};
