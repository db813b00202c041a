//! Downloadable reports built from an `Assessment`.

mod csv_export;
mod excel;
mod summary;

pub use csv_export::write_csv;
pub use excel::write_workbook;
pub use summary::executive_summary;

use chrono::{DateTime, Local};
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::rcm::Assessment;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Excel export failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("Export I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Xlsx,
    Csv,
    Summary,
}

impl ExportKind {
    pub const ALL: [ExportKind; 3] = [ExportKind::Xlsx, ExportKind::Csv, ExportKind::Summary];

    pub fn file_name(&self, at: DateTime<Local>) -> String {
        let stamp = at.format("%Y%m%d_%H%M");
        match self {
            ExportKind::Xlsx => format!("RCM_Analysis_{}.xlsx", stamp),
            ExportKind::Csv => format!("RCM_Data_{}.csv", stamp),
            ExportKind::Summary => format!("Executive_Summary_{}.txt", stamp),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportKind::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ExportKind::Csv => "text/csv; charset=utf-8",
            ExportKind::Summary => "text/plain; charset=utf-8",
        }
    }

    pub fn render(&self, assessment: &Assessment) -> Result<Vec<u8>, ExportError> {
        match self {
            ExportKind::Xlsx => write_workbook(assessment),
            ExportKind::Csv => write_csv(assessment),
            ExportKind::Summary => Ok(executive_summary(assessment).into_bytes()),
        }
    }
}

impl FromStr for ExportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xlsx" | "excel" => Ok(ExportKind::Xlsx),
            "csv" => Ok(ExportKind::Csv),
            "summary" | "txt" => Ok(ExportKind::Summary),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}
