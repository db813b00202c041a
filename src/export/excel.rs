use chrono::Local;
use rust_xlsxwriter::{Color, DataValidation, Format, FormatAlign, FormatBorder, Workbook, Worksheet};

use super::ExportError;
use crate::rcm::{Assessment, RiskCategory, RiskLevel, RiskType};

const COLUMN_WIDTH: f64 = 20.0;
const HEADER_BLUE: u32 = 0x4472C4;

const CONTROL_HEADERS: [&str; 9] = [
    "Department",
    "Control Objective",
    "What Can Go Wrong",
    "Risk Level",
    "Control Activities",
    "Control/Design Gap",
    "Gap Details",
    "Proposed Solution",
    "Risk Types",
];

const RECOMMENDATION_HEADERS: [&str; 5] = ["Department", "Title", "Recommendation", "Priority", "Expected Impact"];

struct Styles {
    title: Format,
    header: Format,
    cell: Format,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Format::new().set_bold().set_font_size(14).set_font_color(Color::RGB(0x0000FF)),
            header: Format::new()
                .set_bold()
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(HEADER_BLUE))
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Center),
            cell: Format::new().set_border(FormatBorder::Thin).set_text_wrap(),
        }
    }

    fn level(&self, level: RiskLevel) -> Format {
        let fill = match level {
            RiskLevel::High => 0xFF6B6B,
            RiskLevel::Medium => 0xFFA726,
            RiskLevel::Low => 0x66BB6A,
        };
        self.cell.clone().set_background_color(Color::RGB(fill))
    }
}

fn write_headers(sheet: &mut Worksheet, row: u32, headers: &[&str], format: &Format) -> Result<(), ExportError> {
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string_with_format(row, col as u16, *header, format)?;
        sheet.set_column_width(col as u16, COLUMN_WIDTH)?;
    }
    Ok(())
}

fn summary_sheet(assessment: &Assessment, styles: &Styles) -> Result<Worksheet, ExportError> {
    let mut sheet = Worksheet::new();
    sheet.set_name("Risk Summary")?;
    sheet.set_column_width(0, 28)?;
    sheet.set_column_width(1, 40)?;

    sheet.write_string_with_format(0, 0, "Risk Control Matrix Analysis", &styles.title)?;
    let generated = assessment
        .generated_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string();
    let facts = [
        ("Generated", generated),
        ("Analysis Depth", assessment.depth.label().to_string()),
        ("Departments", assessment.departments.join(", ")),
        ("Controls Analyzed", assessment.controls.len().to_string()),
        ("Gaps Identified", assessment.gap_count().to_string()),
        ("Overall Risk Score", assessment.risk_score_label()),
    ];
    for (i, (label, value)) in facts.iter().enumerate() {
        let row = i as u32 + 2;
        sheet.write_string_with_format(row, 0, *label, &styles.cell)?;
        sheet.write_string_with_format(row, 1, value.as_str(), &styles.cell)?;
    }

    let start = facts.len() as u32 + 3;
    sheet.write_string_with_format(start, 0, "Risk Level", &styles.header)?;
    sheet.write_string_with_format(start, 1, "Count", &styles.header)?;
    for (i, level) in RiskLevel::ALL.into_iter().enumerate() {
        let row = start + 1 + i as u32;
        sheet.write_string_with_format(row, 0, level.as_str(), &styles.level(level))?;
        sheet.write_number_with_format(row, 1, assessment.distribution.get(level) as f64, &styles.cell)?;
    }
    Ok(sheet)
}

fn controls_sheet(assessment: &Assessment, styles: &Styles) -> Result<Worksheet, ExportError> {
    let mut sheet = Worksheet::new();
    sheet.set_name("Control Objectives")?;
    write_headers(&mut sheet, 0, &CONTROL_HEADERS, &styles.header)?;

    for (i, control) in assessment.controls.iter().enumerate() {
        let row = i as u32 + 1;
        let record = &control.record;
        let result = &control.result;
        let risk_types = result
            .risk_types
            .iter()
            .map(RiskType::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        sheet.write_string_with_format(row, 0, &record.department, &styles.cell)?;
        sheet.write_string_with_format(row, 1, &record.control_objective, &styles.cell)?;
        sheet.write_string_with_format(row, 2, &record.what_can_go_wrong, &styles.cell)?;
        sheet.write_string_with_format(row, 3, result.risk_level.as_str(), &styles.level(result.risk_level))?;
        sheet.write_string_with_format(row, 4, &record.control_activities, &styles.cell)?;
        sheet.write_string_with_format(row, 5, if result.is_gap { "Yes" } else { "No" }, &styles.cell)?;
        sheet.write_string_with_format(row, 6, &result.control_gap, &styles.cell)?;
        sheet.write_string_with_format(row, 7, &result.recommendation, &styles.cell)?;
        sheet.write_string_with_format(row, 8, &risk_types, &styles.cell)?;
    }

    if !assessment.controls.is_empty() {
        let last = assessment.controls.len() as u32;
        let levels = DataValidation::new().allow_list_strings(&["High", "Medium", "Low"])?;
        sheet.add_data_validation(1, 3, last, 3, &levels)?;
        let flags = DataValidation::new().allow_list_strings(&["Yes", "No"])?;
        sheet.add_data_validation(1, 5, last, 5, &flags)?;
    }
    Ok(sheet)
}

fn department_sheet(assessment: &Assessment, styles: &Styles) -> Result<Worksheet, ExportError> {
    let mut sheet = Worksheet::new();
    sheet.set_name("Department Risk Analysis")?;

    let mut headers = vec!["Department"];
    headers.extend(RiskCategory::ALL.iter().map(RiskCategory::as_str));
    headers.push("Overall Risk Level");
    write_headers(&mut sheet, 0, &headers, &styles.header)?;

    for (i, risk) in assessment.department_risks.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string_with_format(row, 0, &risk.department, &styles.cell)?;
        for (j, category) in RiskCategory::ALL.into_iter().enumerate() {
            let level = RiskLevel::from_category_score(risk.category(category));
            sheet.write_string_with_format(row, j as u16 + 1, level.as_str(), &styles.level(level))?;
        }
        let overall = risk.overall_risk_level;
        let col = RiskCategory::ALL.len() as u16 + 1;
        sheet.write_string_with_format(row, col, overall.as_str(), &styles.level(overall))?;
    }
    Ok(sheet)
}

fn recommendations_sheet(assessment: &Assessment, styles: &Styles) -> Result<Worksheet, ExportError> {
    let mut sheet = Worksheet::new();
    sheet.set_name("Recommendations")?;
    write_headers(&mut sheet, 0, &RECOMMENDATION_HEADERS, &styles.header)?;
    sheet.set_column_width(2, 60)?;

    for (i, recommendation) in assessment.recommendations.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string_with_format(row, 0, &recommendation.department, &styles.cell)?;
        sheet.write_string_with_format(row, 1, &recommendation.title, &styles.cell)?;
        sheet.write_string_with_format(row, 2, &recommendation.description, &styles.cell)?;
        sheet.write_string_with_format(
            row,
            3,
            recommendation.priority.as_str(),
            &styles.level(recommendation.priority),
        )?;
        sheet.write_string_with_format(row, 4, &recommendation.impact, &styles.cell)?;
    }
    Ok(sheet)
}

/// Four-sheet workbook: summary, controls, department matrix and recommendations.
pub fn write_workbook(assessment: &Assessment) -> Result<Vec<u8>, ExportError> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();
    workbook.push_worksheet(summary_sheet(assessment, &styles)?);
    workbook.push_worksheet(controls_sheet(assessment, &styles)?);
    workbook.push_worksheet(department_sheet(assessment, &styles)?);
    workbook.push_worksheet(recommendations_sheet(assessment, &styles)?);
    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::process_document;
    use crate::export::fixtures;

    #[test]
    fn test_workbook_round_trip() {
        let assessment = fixtures::assessment();
        let bytes = write_workbook(&assessment).unwrap();

        let doc = process_document("export.xlsx", &bytes).unwrap();
        let names: Vec<&str> = doc.sheets().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Risk Summary", "Control Objectives", "Department Risk Analysis", "Recommendations"]
        );

        // only the control sheet reads back as a matrix
        assert_eq!(doc.records.len(), assessment.controls.len());
        for (record, control) in doc.records.iter().zip(&assessment.controls) {
            assert_eq!(record.department, control.record.department);
            assert_eq!(record.declared_risk_level, Some(control.result.risk_level));
            assert_eq!(record.proposed_control, control.result.recommendation);
        }
        assert_eq!(doc.departments, assessment.departments);
    }
}
