mod processor;
mod spreadsheet;
mod text;

pub use processor::process_document;
pub use spreadsheet::{detect_header_row, ColumnMap, Field, Sheet};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::rcm::ExtractedRecord;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("Uploaded file is empty")]
    Empty,
    #[error("Failed to parse {format} document: {message}")]
    Parse { format: DocumentFormat, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Excel,
    LegacyExcel,
    Csv,
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub const ACCEPTED_EXTENSIONS: [&'static str; 5] = ["xlsx", "xls", "csv", "pdf", "docx"];

    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let extension = file_name.rsplit_once('.')?.1.to_lowercase();
        match extension.as_str() {
            "xlsx" => Some(DocumentFormat::Excel),
            "xls" => Some(DocumentFormat::LegacyExcel),
            "csv" => Some(DocumentFormat::Csv),
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            _ => None,
        }
    }

    pub fn is_tabular(&self) -> bool {
        matches!(self, DocumentFormat::Excel | DocumentFormat::LegacyExcel | DocumentFormat::Csv)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Excel => "xlsx",
            DocumentFormat::LegacyExcel => "xls",
            DocumentFormat::Csv => "csv",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DocumentFormat::Excel | DocumentFormat::LegacyExcel => "Excel",
            DocumentFormat::Csv => "CSV",
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::Docx => "DOCX",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub format: DocumentFormat,
    pub size_bytes: usize,
    pub sheet_count: usize,
    pub text_length: usize,
    pub table_count: usize,
}

pub type Table = Vec<Vec<String>>;

#[derive(Debug, Clone)]
pub enum DocumentContent {
    Tabular { sheets: Vec<Sheet> },
    Text { text: String, tables: Vec<Table> },
}

/// An uploaded file after format-specific parsing.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub id: String,
    pub metadata: DocumentMetadata,
    pub content: DocumentContent,
    /// Empty for PDF and DOCX; those records come from the language model.
    pub records: Vec<ExtractedRecord>,
    pub departments: Vec<String>,
}

impl ProcessedDocument {
    pub fn is_tabular(&self) -> bool {
        matches!(self.content, DocumentContent::Tabular { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            DocumentContent::Text { text, .. } => Some(text),
            DocumentContent::Tabular { .. } => None,
        }
    }

    pub fn sheets(&self) -> &[Sheet] {
        match &self.content {
            DocumentContent::Tabular { sheets } => sheets,
            DocumentContent::Text { .. } => &[],
        }
    }
}

/// Distinct departments in first-seen order.
pub fn departments_of(records: &[ExtractedRecord]) -> Vec<String> {
    let mut departments: Vec<String> = Vec::new();
    for record in records {
        if !departments.contains(&record.department) {
            departments.push(record.department.clone());
        }
    }
    departments
}
