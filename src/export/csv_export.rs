use super::ExportError;
use crate::rcm::Assessment;

pub const CSV_HEADERS: [&str; 8] = [
    "Department",
    "Control Objective",
    "What Can Go Wrong",
    "Risk Level",
    "Control Activities",
    "Is Gap",
    "Gap Details",
    "Proposed Control",
];

/// One row per assessed control, readable again by the CSV importer.
pub fn write_csv(assessment: &Assessment) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADERS)?;

    for control in &assessment.controls {
        let record = &control.record;
        let result = &control.result;
        writer.write_record([
            record.department.as_str(),
            record.control_objective.as_str(),
            record.what_can_go_wrong.as_str(),
            result.risk_level.as_str(),
            record.control_activities.as_str(),
            if result.is_gap { "Yes" } else { "No" },
            result.control_gap.as_str(),
            result.recommendation.as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::process_document;
    use crate::export::fixtures;

    #[test]
    fn test_csv_round_trip() {
        let assessment = fixtures::assessment();
        let bytes = write_csv(&assessment).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("Department,Control Objective,What Can Go Wrong,Risk Level"));

        let doc = process_document("export.csv", &bytes).unwrap();
        assert_eq!(doc.records.len(), assessment.controls.len());
        for (record, control) in doc.records.iter().zip(&assessment.controls) {
            assert_eq!(record.department, control.record.department);
            assert_eq!(record.declared_risk_level, Some(control.result.risk_level));
            assert_eq!(record.proposed_control, control.result.recommendation);
            assert_eq!(record.declared_gap, Some(control.result.is_gap));
        }
    }
}
