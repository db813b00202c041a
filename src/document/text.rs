use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};

use super::{DocumentFormat, IngestError, Table};

pub(super) fn read_pdf(bytes: &[u8]) -> Result<String, IngestError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| IngestError::Parse {
        format: DocumentFormat::Pdf,
        message: e.to_string(),
    })
}

fn docx_error(message: impl ToString) -> IngestError {
    IngestError::Parse {
        format: DocumentFormat::Docx,
        message: message.to_string(),
    }
}

/// Paragraph text and table cells from a DOCX archive.
pub(super) fn read_docx(bytes: &[u8]) -> Result<(String, Vec<Table>), IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(docx_error)?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(docx_error)?
        .read_to_string(&mut xml)
        .map_err(docx_error)?;
    parse_document_xml(&xml)
}

fn parse_document_xml(xml: &str) -> Result<(String, Vec<Table>), IngestError> {
    let mut reader = Reader::from_str(xml);

    let mut paragraphs: Vec<String> = Vec::new();
    let mut tables: Vec<Table> = Vec::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut table_depth = 0usize;
    let mut table: Table = Vec::new();
    let mut table_row: Vec<String> = Vec::new();
    let mut cell = String::new();

    loop {
        match reader.read_event().map_err(docx_error)? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tbl" => table_depth += 1,
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => paragraph.push('\t'),
                b"w:br" | b"w:cr" => paragraph.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                paragraph.push_str(&t.unescape().map_err(docx_error)?);
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    let text = std::mem::take(&mut paragraph);
                    let text = text.trim();
                    if table_depth > 0 {
                        if !text.is_empty() {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(text);
                        }
                    } else if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                }
                b"w:tc" if table_depth == 1 => table_row.push(std::mem::take(&mut cell)),
                b"w:tr" if table_depth == 1 => {
                    let row = std::mem::take(&mut table_row);
                    if row.iter().any(|c| !c.is_empty()) {
                        table.push(row);
                    }
                }
                b"w:tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && !table.is_empty() {
                        tables.push(std::mem::take(&mut table));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let mut text = paragraphs.join("\n\n");
    for table in &tables {
        text.push_str("\n\n");
        let lines: Vec<String> = table.iter().map(|row| row.join(" | ")).collect();
        text.push_str(&lines.join("\n"));
    }

    Ok((text, tables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOCUMENT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Payroll &amp; Personnel RCM</w:t></w:r></w:p>
    <w:tbl>
      <w:tr>
        <w:tc><w:p><w:r><w:t>Control Objective</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>What Can Go Wrong</w:t></w:r></w:p></w:tc>
      </w:tr>
      <w:tr>
        <w:tc><w:p><w:r><w:t>Salary accuracy</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>Incorrect</w:t></w:r><w:r><w:t xml:space="preserve"> salary</w:t></w:r></w:p></w:tc>
      </w:tr>
    </w:tbl>
    <w:p><w:r><w:t>End of matrix</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    #[test]
    fn test_parse_document_xml() {
        let (text, tables) = parse_document_xml(DOCUMENT_XML).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0][1], vec!["Salary accuracy", "Incorrect salary"]);
        assert!(text.starts_with("Payroll & Personnel RCM\n\nEnd of matrix"));
        assert!(text.contains("Control Objective | What Can Go Wrong"));
    }

    #[test]
    fn test_read_docx_archive() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("word/document.xml", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(DOCUMENT_XML.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        let (text, tables) = read_docx(buffer.get_ref()).unwrap();
        assert_eq!(tables.len(), 1);
        assert!(text.contains("End of matrix"));
    }

    #[test]
    fn test_read_docx_rejects_garbage() {
        assert!(matches!(read_docx(b"not a zip"), Err(IngestError::Parse { .. })));
    }
}
