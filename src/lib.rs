pub mod api;
pub mod config;
pub mod database;
pub mod document;
pub mod export;
pub mod llm;
pub mod pipeline;
pub mod providers;
pub mod rcm;

// Re-export commonly used items
pub use config::AppConfig;
pub use export::ExportKind;
pub use pipeline::{Pipeline, PipelineError};
pub use rcm::{AnalysisDepth, AnalysisOptions, Assessment};
