use log::info;
use uuid::Uuid;

use super::spreadsheet::{extract_records, read_csv, read_workbook};
use super::text::{read_docx, read_pdf};
use super::{departments_of, DocumentContent, DocumentFormat, DocumentMetadata, IngestError, ProcessedDocument};

/// Parse an uploaded file into metadata, raw content and RCM records.
pub fn process_document(file_name: &str, bytes: &[u8]) -> Result<ProcessedDocument, IngestError> {
    let format = DocumentFormat::from_file_name(file_name)
        .ok_or_else(|| IngestError::UnsupportedFormat(file_name.to_string()))?;
    if bytes.is_empty() {
        return Err(IngestError::Empty);
    }

    info!("Processing {} document: {}", format, file_name);

    let (content, records) = match format {
        DocumentFormat::Excel | DocumentFormat::LegacyExcel | DocumentFormat::Csv => {
            let sheets = if format == DocumentFormat::Csv {
                read_csv(bytes)?
            } else {
                read_workbook(format, bytes)?
            };
            let records = extract_records(&sheets, format);
            (DocumentContent::Tabular { sheets }, records)
        }
        DocumentFormat::Pdf => {
            let text = read_pdf(bytes)?;
            (DocumentContent::Text { text, tables: Vec::new() }, Vec::new())
        }
        DocumentFormat::Docx => {
            let (text, tables) = read_docx(bytes)?;
            (DocumentContent::Text { text, tables }, Vec::new())
        }
    };

    let metadata = match &content {
        DocumentContent::Tabular { sheets } => DocumentMetadata {
            file_name: file_name.to_string(),
            format,
            size_bytes: bytes.len(),
            sheet_count: sheets.len(),
            text_length: 0,
            table_count: 0,
        },
        DocumentContent::Text { text, tables } => DocumentMetadata {
            file_name: file_name.to_string(),
            format,
            size_bytes: bytes.len(),
            sheet_count: 0,
            text_length: text.chars().count(),
            table_count: tables.len(),
        },
    };

    let departments = departments_of(&records);
    info!(
        "Extracted {} control objectives across {} departments",
        records.len(),
        departments.len()
    );

    Ok(ProcessedDocument {
        id: Uuid::new_v4().to_string(),
        metadata,
        content,
        records,
        departments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_and_empty_files() {
        assert!(matches!(
            process_document("notes.txt", b"hello"),
            Err(IngestError::UnsupportedFormat(_))
        ));
        assert!(matches!(process_document("rcm.csv", b""), Err(IngestError::Empty)));
    }

    #[test]
    fn test_processes_csv() {
        let data = "Department,Control Objective,What Can Go Wrong,Control Activities\n\
                    Payroll,Salary accuracy,Incorrect salary,Review\n\
                    Treasury,Bank limits,Unauthorized transfer,Dual approval\n";
        let doc = process_document("rcm.csv", data.as_bytes()).unwrap();
        assert!(doc.is_tabular());
        assert_eq!(doc.records.len(), 2);
        assert_eq!(doc.departments, vec!["Payroll", "Treasury"]);
        assert_eq!(doc.metadata.sheet_count, 1);
    }

    #[test]
    fn test_corrupt_workbook_is_a_parse_error() {
        assert!(matches!(
            process_document("rcm.xlsx", b"definitely not a workbook"),
            Err(IngestError::Parse { .. })
        ));
    }
}
