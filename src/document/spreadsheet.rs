use calamine::{Reader, Xls, Xlsx};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Cursor;

use super::{DocumentFormat, IngestError};
use crate::rcm::{ExtractedRecord, RiskLevel};

const HEADER_KEYWORDS: &[&str] = &[
    "area", "department", "risk", "control", "process", "objective", "what can go wrong", "type",
];
const HEADER_SCAN_ROWS: usize = 10;
const MAX_HEADER_CELL_CHARS: usize = 80;

/// A sheet as a grid of trimmed cell strings with fully empty rows removed.
#[derive(Debug, Clone, Serialize)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|c| c.trim().to_string()).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|c| !c.is_empty()))
            .collect();
        Self { name: name.into(), rows }
    }

    /// Markdown rendering used in prompts.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("### Sheet: {}\n", self.name);
        for (i, row) in self.rows.iter().enumerate() {
            out.push_str(&format!("| {} |\n", row.join(" | ")));
            if i == 0 {
                out.push_str(&format!("|{}\n", " --- |".repeat(row.len().max(1))));
            }
        }
        out
    }
}

/// Columns an RCM sheet may carry, in the order they claim header cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Department,
    RiskLevel,
    ControlObjective,
    WhatCanGoWrong,
    IsGap,
    GapDetails,
    ProposedControl,
    ControlActivities,
    SubProcess,
}

impl Field {
    const ORDER: [Field; 9] = [
        Field::Department,
        Field::RiskLevel,
        Field::ControlObjective,
        Field::WhatCanGoWrong,
        Field::IsGap,
        Field::GapDetails,
        Field::ProposedControl,
        Field::ControlActivities,
        Field::SubProcess,
    ];

    fn patterns(&self) -> &'static [&'static str] {
        match self {
            Field::Department => &["department", "dept", "business unit", "area", "function"],
            Field::RiskLevel => &["risk level", "risk rating", "risk priority", "priority", "severity"],
            Field::ControlObjective => &["control objective", "control obj", "objective"],
            Field::WhatCanGoWrong => &["what can go wrong", "risk description", "potential risk", "risk"],
            Field::IsGap => &["is gap", "has gap", "control/design gap"],
            Field::GapDetails => &["gap details", "control gap", "design gap", "gap"],
            Field::ProposedControl => &[
                "proposed control",
                "proposed solution",
                "recommendation",
                "remediation",
                "action plan",
            ],
            Field::ControlActivities => &["control activit", "mitigating control", "control description", "control"],
            Field::SubProcess => &["sub process", "subprocess", "process"],
        }
    }
}

/// Assignment of header columns to fields. Each column is claimed at most once.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    columns: HashMap<Field, usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &[String]) -> Self {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let mut claimed = vec![false; lowered.len()];
        let mut columns = HashMap::new();

        for field in Field::ORDER {
            let found = field.patterns().iter().find_map(|pattern| {
                let exact = (0..lowered.len()).find(|&i| !claimed[i] && lowered[i] == *pattern);
                exact.or_else(|| (0..lowered.len()).find(|&i| !claimed[i] && lowered[i].contains(pattern)))
            });
            if let Some(index) = found {
                claimed[index] = true;
                columns.insert(field, index);
            }
        }

        Self { columns }
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// A sheet is an RCM when it names control objectives, or both risks and control activities.
    pub fn qualifies(&self) -> bool {
        self.get(Field::ControlObjective).is_some()
            || (self.get(Field::WhatCanGoWrong).is_some() && self.get(Field::ControlActivities).is_some())
    }

    fn cell<'a>(&self, row: &'a [String], field: Field) -> &'a str {
        self.get(field)
            .and_then(|i| row.get(i))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn record(&self, row: &[String]) -> Option<ExtractedRecord> {
        let objective = self.cell(row, Field::ControlObjective);
        let risk = self.cell(row, Field::WhatCanGoWrong);
        if objective.is_empty() && risk.is_empty() {
            return None;
        }

        let department = match self.cell(row, Field::Department) {
            "" => "Unknown",
            d => d,
        };
        let control_activities = if self.get(Field::ControlActivities).is_some() {
            self.cell(row, Field::ControlActivities)
        } else {
            objective
        };
        let gap_details = self.cell(row, Field::GapDetails);
        let declared_gap = if self.get(Field::IsGap).is_some() {
            parse_flag(self.cell(row, Field::IsGap))
        } else if self.get(Field::GapDetails).is_some() {
            Some(parse_flag(gap_details).unwrap_or(!gap_details.is_empty()))
        } else {
            None
        };

        Some(ExtractedRecord {
            department: department.to_string(),
            sub_process: self.cell(row, Field::SubProcess).to_string(),
            control_objective: objective.to_string(),
            what_can_go_wrong: risk.to_string(),
            control_activities: control_activities.to_string(),
            declared_risk_level: RiskLevel::from_label(self.cell(row, Field::RiskLevel)),
            declared_gap,
            gap_details: match parse_flag(gap_details) {
                Some(_) => String::new(),
                None => gap_details.to_string(),
            },
            proposed_control: self.cell(row, Field::ProposedControl).to_string(),
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" | "gap" => Some(true),
        "no" | "n" | "false" | "0" | "none" | "n/a" | "no gap" => Some(false),
        _ => None,
    }
}

/// Index of the row, within the first ten, with the most header keywords.
/// Rows holding a cell longer than a label are never headers.
pub fn detect_header_row(rows: &[Vec<String>]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (index, row) in rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
        if row.iter().any(|c| c.chars().count() > MAX_HEADER_CELL_CHARS) {
            continue;
        }
        let hits = row
            .iter()
            .map(|c| c.to_lowercase())
            .filter(|c| HEADER_KEYWORDS.iter().any(|k| c.contains(k)))
            .count();
        if hits > 0 && best.map_or(true, |(_, best_hits)| hits > best_hits) {
            best = Some((index, hits));
        }
    }
    best.map(|(index, _)| index)
}

fn sheet_records(sheet: &Sheet, header_index: usize) -> Option<Vec<ExtractedRecord>> {
    let columns = ColumnMap::from_headers(&sheet.rows[header_index]);
    if !columns.qualifies() {
        return None;
    }
    debug!("Sheet {} mapped columns: {:?}", sheet.name, columns);
    Some(
        sheet.rows[header_index + 1..]
            .iter()
            .filter_map(|row| columns.record(row))
            .collect(),
    )
}

/// Positional reading for headerless CSV files.
fn positional_records(rows: &[Vec<String>]) -> Vec<ExtractedRecord> {
    let at = |row: &[String], i: usize| row.get(i).cloned().unwrap_or_default();
    rows.iter()
        .filter_map(|row| {
            let objective = at(row, 0);
            let risk = at(row, 1);
            if objective.is_empty() && risk.is_empty() {
                return None;
            }
            let gap_details = at(row, 3);
            Some(ExtractedRecord {
                department: "General".to_string(),
                control_objective: objective,
                what_can_go_wrong: risk,
                control_activities: at(row, 2),
                declared_gap: (!gap_details.is_empty()).then_some(true),
                gap_details,
                proposed_control: at(row, 4),
                ..Default::default()
            })
        })
        .collect()
}

pub(super) fn extract_records(sheets: &[Sheet], format: DocumentFormat) -> Vec<ExtractedRecord> {
    let mut records = Vec::new();
    for sheet in sheets.iter().filter(|s| s.rows.len() >= 2) {
        let header_index = match format {
            DocumentFormat::Csv => Some(0),
            _ => detect_header_row(&sheet.rows),
        };
        let extracted = header_index.and_then(|h| sheet_records(sheet, h));
        match (extracted, format) {
            (Some(found), _) => {
                info!("Extracted {} control objectives from sheet {}", found.len(), sheet.name);
                records.extend(found);
            }
            (None, DocumentFormat::Csv) => {
                warn!("CSV header not recognised, reading columns by position");
                records.extend(positional_records(&sheet.rows));
            }
            (None, _) => debug!("Sheet {} does not look like a risk control matrix", sheet.name),
        }
    }
    records
}

fn read_sheets<R>(mut workbook: R) -> Vec<Sheet>
where
    R: Reader<Cursor<Vec<u8>>>,
    R::Error: std::fmt::Display,
{
    let names = workbook.sheet_names().to_owned();
    let mut sheets = Vec::new();
    for name in names {
        match workbook.worksheet_range(&name) {
            Some(Ok(range)) => {
                let rows = range
                    .rows()
                    .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                    .collect();
                sheets.push(Sheet::new(name, rows));
            }
            Some(Err(e)) => warn!("Skipping sheet {}: {}", name, e),
            None => warn!("Sheet {} listed but not found", name),
        }
    }
    sheets
}

pub(super) fn read_workbook(format: DocumentFormat, bytes: &[u8]) -> Result<Vec<Sheet>, IngestError> {
    let cursor = Cursor::new(bytes.to_vec());
    let parse_error = |message: String| IngestError::Parse { format, message };
    let sheets = match format {
        DocumentFormat::LegacyExcel => {
            read_sheets(Xls::new(cursor).map_err(|e| parse_error(e.to_string()))?)
        }
        _ => read_sheets(Xlsx::new(cursor).map_err(|e| parse_error(e.to_string()))?),
    };
    if sheets.is_empty() {
        return Err(parse_error("workbook has no readable sheets".to_string()));
    }
    Ok(sheets)
}

pub(super) fn read_csv(bytes: &[u8]) -> Result<Vec<Sheet>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::Parse {
            format: DocumentFormat::Csv,
            message: e.to_string(),
        })?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(vec![Sheet::new("CSV", rows)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_column_map_prefers_specific_patterns() {
        let headers = row(&[
            "Area",
            "Control Objective",
            "Risk/ What Can Go Wrong",
            "Risk Level",
            "Control Activities",
            "Proposed Solution",
        ]);
        let map = ColumnMap::from_headers(&headers);
        assert_eq!(map.get(Field::Department), Some(0));
        assert_eq!(map.get(Field::ControlObjective), Some(1));
        assert_eq!(map.get(Field::WhatCanGoWrong), Some(2));
        assert_eq!(map.get(Field::RiskLevel), Some(3));
        assert_eq!(map.get(Field::ControlActivities), Some(4));
        assert_eq!(map.get(Field::ProposedControl), Some(5));
        assert!(map.qualifies());
    }

    #[test]
    fn test_column_map_rejects_non_rcm_headers() {
        let map = ColumnMap::from_headers(&row(&["Department", "Title", "Recommendation", "Priority"]));
        assert!(!map.qualifies());
    }

    #[test]
    fn test_header_row_is_the_densest_candidate() {
        let rows = vec![
            row(&["Risk Control Matrix - Payroll", "", ""]),
            row(&["Prepared by internal audit", "", ""]),
            row(&["Area", "Control Objective", "What Can Go Wrong"]),
            row(&["Payroll", "Salary accuracy", "Incorrect salary paid"]),
        ];
        assert_eq!(detect_header_row(&rows), Some(2));
        assert_eq!(detect_header_row(&[row(&["a", "b"])]), None);
    }

    #[test]
    fn test_records_infer_defaults() {
        let sheet = Sheet::new(
            "RCM",
            vec![
                row(&["Area", "Control Objective", "What Can Go Wrong"]),
                row(&["", "Salary accuracy", "Incorrect salary paid"]),
                row(&["", "", ""]),
                row(&["Leave", "", ""]),
            ],
        );
        let records = extract_records(&[sheet], DocumentFormat::Excel);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].department, "Unknown");
        assert_eq!(records[0].control_activities, "Salary accuracy");
        assert_eq!(records[0].declared_gap, None);
        assert_eq!(records[0].declared_risk_level, None);
    }

    #[test]
    fn test_csv_with_headers() {
        let data = "Department,Control Objective,What Can Go Wrong,Risk Level,Control Activities,Is Gap,Gap Details,Proposed Control\n\
                    Payroll,Salary accuracy,Incorrect salary,H,Monthly review,Yes,No reconciliation,Automate reconciliation\n\
                    HR,Joiner approval,Fake employee,Low,HR sign-off,No,,\n";
        let sheets = read_csv(data.as_bytes()).unwrap();
        let records = extract_records(&sheets, DocumentFormat::Csv);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].declared_risk_level, Some(RiskLevel::High));
        assert_eq!(records[0].declared_gap, Some(true));
        assert_eq!(records[0].gap_details, "No reconciliation");
        assert_eq!(records[0].proposed_control, "Automate reconciliation");
        assert_eq!(records[1].declared_gap, Some(false));
    }

    #[test]
    fn test_csv_positional_fallback() {
        let data = "Vendor setup,Duplicate vendor,Vendor review,Missing check,Add dedupe report\nBank changes,Unverified change,,,\n";
        let sheets = read_csv(data.as_bytes()).unwrap();
        let records = extract_records(&sheets, DocumentFormat::Csv);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.department == "General"));
        assert_eq!(records[0].proposed_control, "Add dedupe report");
        assert_eq!(records[0].declared_gap, Some(true));
        assert_eq!(records[1].declared_gap, None);
    }

    #[test]
    fn test_sheet_markdown() {
        let sheet = Sheet::new("S", vec![row(&["A", "B"]), row(&["1", "2"])]);
        assert_eq!(sheet.to_markdown(), "### Sheet: S\n| A | B |\n| --- | --- |\n| 1 | 2 |\n");
    }
}
