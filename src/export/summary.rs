use chrono::Local;
use std::fmt::Write;

use crate::rcm::{Assessment, RiskLevel};

const TOP_RECOMMENDATIONS: usize = 5;

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{}\n{}", title, "=".repeat(title.chars().count()));
}

/// Plain-text executive summary for download.
pub fn executive_summary(assessment: &Assessment) -> String {
    let mut out = String::from("RISK CONTROL MATRIX ANALYSIS - EXECUTIVE SUMMARY\n");
    let generated = assessment.generated_at.with_timezone(&Local);
    let _ = writeln!(out, "Generated: {}", generated.format("%B %d, %Y at %I:%M %p"));
    let _ = writeln!(out, "Document: {} ({})", assessment.file_name, assessment.depth.label());

    section(&mut out, "OVERVIEW");
    let _ = writeln!(out, "Total Control Objectives: {}", assessment.controls.len());
    let _ = writeln!(out, "Departments Analyzed: {}", assessment.departments.len());
    let _ = writeln!(out, "Control Gaps Identified: {}", assessment.gap_count());
    let _ = writeln!(out, "Overall Risk Score: {}", assessment.risk_score_label());

    section(&mut out, "RISK DISTRIBUTION");
    for level in RiskLevel::ALL {
        let _ = writeln!(out, "{} Risk: {} controls", level, assessment.distribution.get(level));
    }

    section(&mut out, "DEPARTMENTS ANALYZED");
    for department in &assessment.departments {
        match assessment.department_risk(department) {
            Some(risk) => {
                let _ = writeln!(out, "• {} ({} risk)", department, risk.overall_risk_level);
            }
            None => {
                let _ = writeln!(out, "• {}", department);
            }
        }
    }

    section(&mut out, "KEY RECOMMENDATIONS");
    if assessment.recommendations.is_empty() {
        out.push_str("No recommendations were generated.\n");
    }
    for (i, recommendation) in assessment.recommendations.iter().take(TOP_RECOMMENDATIONS).enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, recommendation.title);
        let _ = writeln!(out, "   Priority: {}", recommendation.priority);
        let _ = writeln!(out, "   {}\n", recommendation.description);
    }

    out.push_str("\nFor detailed analysis, refer to the complete Excel report.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures;

    #[test]
    fn test_summary_sections() {
        let summary = executive_summary(&fixtures::assessment());
        assert!(summary.starts_with("RISK CONTROL MATRIX ANALYSIS - EXECUTIVE SUMMARY\nGenerated: March 0"));
        assert!(summary.contains("OVERVIEW\n========\nTotal Control Objectives: 3\nDepartments Analyzed: 2\nControl Gaps Identified: 1"));
        assert!(summary.contains("High Risk: 1 controls\nMedium Risk: 1 controls\nLow Risk: 1 controls"));
        assert!(summary.contains("• Payroll (High risk)"));
        assert!(summary.contains("1. Review Control Framework for Payroll\n   Priority: High"));
        assert!(summary.contains("2. Review Control Framework for Treasury\n   Priority: Low"));
    }

    #[test]
    fn test_summary_lists_at_most_five_recommendations() {
        let mut assessment = fixtures::assessment();
        let template = assessment.recommendations[0].clone();
        assessment.recommendations = (1..=7)
            .map(|i| {
                let mut r = template.clone();
                r.title = format!("Item {}", i);
                r
            })
            .collect();
        let summary = executive_summary(&assessment);
        assert!(summary.contains("5. Item 5"));
        assert!(!summary.contains("Item 6"));
    }
}
