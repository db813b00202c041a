use std::collections::BTreeMap;

use crate::rcm::{AssessedControl, ControlGap, DepartmentRisk, RiskCategory, RiskLevel};

pub const MAX_PROMPT_TEXT_CHARS: usize = 30_000;
const MAX_OBJECTIVES_PER_DEPARTMENT: usize = 5;

pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}...", head)
}

fn retrieved_section(context: &str) -> String {
    if context.trim().is_empty() {
        String::new()
    } else {
        format!("\nRELATED PASSAGES FROM THE DOCUMENT:\n{}\n", context)
    }
}

pub fn department_analysis(
    department: &str,
    controls: &[&AssessedControl],
    categories: &BTreeMap<RiskCategory, u8>,
    context: &str,
) -> String {
    let mut objectives = String::new();
    for (i, control) in controls.iter().take(MAX_OBJECTIVES_PER_DEPARTMENT).enumerate() {
        let record = &control.record;
        objectives.push_str(&format!("{}. Objective: {}\n", i + 1, record.control_objective));
        objectives.push_str(&format!("   What Can Go Wrong: {}\n", record.what_can_go_wrong));
        objectives.push_str(&format!("   Risk Level: {}\n", control.result.risk_level));
        objectives.push_str(&format!("   Control Activities: {}\n", record.control_activities));
        if control.result.is_gap {
            objectives.push_str(&format!("   Gap: {}\n", control.result.control_gap));
        }
        objectives.push('\n');
    }

    let category_lines: String = categories
        .iter()
        .map(|(category, value)| format!("- {}: {}/5\n", category.as_str(), value))
        .collect();

    format!(
        r#"Review the control objectives of the {department} department.

DEPARTMENT: {department}

RISK CATEGORIES (keyword scores, 1 = minimal, 5 = severe):
{category_lines}
CONTROL OBJECTIVES:
{objectives}{context}
For each control objective above:
1. Decide whether the control design has a gap (Yes/No).
2. Propose a solution of about 50 words (2-3 sentences) aimed at the specific risk in "What Can Go Wrong".
   Name concrete processes, technologies or controls. Do not repeat the same solution for different objectives.

Respond with ONLY a JSON object in this format:
{{
    "overall_risk_level": "High/Medium/Low",
    "key_risks": ["3-5 key risks"],
    "risk_types": {{
        "Operational": ["operational risks"],
        "Financial": ["financial risks"],
        "Fraud": ["fraud risks"],
        "Financial Fraud": ["financial fraud risks"],
        "Operational Fraud": ["operational fraud risks"]
    }},
    "summary": "short risk profile of the department",
    "control_gaps": [
        {{
            "objective": "exact text of the control objective",
            "has_gap": "Yes/No",
            "proposed_solution": "tailored solution"
        }}
    ]
}}"#,
        department = department,
        category_lines = category_lines,
        objectives = objectives,
        context = retrieved_section(context),
    )
}

pub fn comprehensive_review(departments: &[String], sheets_markdown: &str, context: &str) -> String {
    let department_list = if departments.is_empty() {
        "every department named in the document".to_string()
    } else {
        departments.join(", ")
    };

    format!(
        r#"Analyze the complete Risk Control Matrix below. Cover every department, in particular: {department_list}.

For each department:
1. Analyze its control objectives and risks.
2. Classify the risks as Operational, Financial, Fraud, Financial Fraud or Operational Fraud.
3. Identify control gaps.
4. Recommend improvements.

RISK CONTROL MATRIX:
{sheets}{context}
Respond with ONLY a JSON object in this format:
{{
    "departments": [
        {{
            "name": "Department Name",
            "overall_risk_level": "High/Medium/Low",
            "key_risks": ["Risk 1", "Risk 2"],
            "risk_analysis": {{
                "Operational": ["specific operational risks"],
                "Financial": ["specific financial risks"],
                "Fraud": ["specific fraud risks"],
                "Financial Fraud": ["specific financial fraud risks"],
                "Operational Fraud": ["specific operational fraud risks"]
            }},
            "control_gaps": [
                {{
                    "gap_title": "gap description",
                    "impact": "impact description",
                    "recommendation": "how to close the gap"
                }}
            ],
            "summary": "short risk profile"
        }}
    ],
    "overall_recommendations": [
        {{
            "title": "Recommendation title",
            "priority": "High/Medium/Low",
            "description": "Detailed recommendation",
            "impact": "Expected impact"
        }}
    ]
}}

Name specific risks rather than general statements."#,
        department_list = department_list,
        sheets = truncate_chars(sheets_markdown, MAX_PROMPT_TEXT_CHARS),
        context = retrieved_section(context),
    )
}

pub fn text_extraction(text: &str) -> String {
    format!(
        r#"The text below comes from a Risk Control Matrix document. Extract its structure, focusing on risks per department:

1. Departments mentioned in the document.
2. Control objectives of each department.
3. What can go wrong if each control fails.
4. Risk level (High, Medium, Low) of each control objective.
5. Control activities addressing each risk.
6. Control or design gaps.
7. Proposed controls for the gaps.
8. A risk assessment per department with category scores from 1 to 5 and an overall level.

TEXT:
{text}

Respond with ONLY a JSON object in this format:
{{
    "departments": ["string"],
    "control_objectives": [
        {{
            "department": "string",
            "objective": "string",
            "what_can_go_wrong": "string",
            "risk_level": "High/Medium/Low",
            "control_activities": "string",
            "is_gap": true,
            "gap_details": "string",
            "proposed_control": "string"
        }}
    ],
    "gaps": [
        {{
            "department": "string",
            "control_objective": "string",
            "gap_title": "string",
            "description": "string",
            "risk_impact": "string",
            "proposed_solution": "string"
        }}
    ],
    "department_risks": {{
        "Department Name": {{
            "overall_risk_level": "High/Medium/Low",
            "risk_categories": {{
                "Financial": 1,
                "Operational": 1,
                "Compliance": 1,
                "Strategic": 1,
                "Technological": 1
            }},
            "key_risks": ["string"],
            "summary": "string"
        }}
    }}
}}"#,
        text = truncate_chars(text, MAX_PROMPT_TEXT_CHARS),
    )
}

pub fn department_recommendations(department: &str, risk: &DepartmentRisk, controls: &[&AssessedControl]) -> String {
    let mut info = format!("Department: {}\nOverall Risk Level: {}\n", department, risk.overall_risk_level);
    if !risk.key_risks.is_empty() {
        info.push_str("Key Risks:\n");
        for key_risk in &risk.key_risks {
            info.push_str(&format!("- {}\n", key_risk));
        }
    }

    let high: Vec<_> = controls.iter().filter(|c| c.result.risk_level == RiskLevel::High).collect();
    let medium: Vec<_> = controls.iter().filter(|c| c.result.risk_level == RiskLevel::Medium).collect();
    let priority: Vec<_> = if high.is_empty() {
        medium.into_iter().take(2).collect()
    } else {
        high.into_iter().take(2).chain(medium.into_iter().take(1)).collect()
    };
    for control in priority {
        info.push_str(&format!("\nControl Objective: {}\n", control.record.control_objective));
        info.push_str(&format!("Risk: {}\n", control.record.what_can_go_wrong));
        info.push_str(&format!("Risk Level: {}\n", control.result.risk_level));
    }

    format!(
        r#"Write recommendations for the {department} department based on this risk analysis:

{info}
Give 2-3 recommendations that address the highest-priority risks with concrete actions, tools or controls.
Each needs a clear title, an implementation description of at least 3-4 sentences, the expected impact and a priority (High/Medium/Low).

Respond with ONLY a JSON array:
[
    {{
        "department": "{department}",
        "title": "Recommendation Title",
        "description": "Specific recommendation with actionable steps",
        "impact": "Expected impact",
        "priority": "High/Medium/Low"
    }}
]"#,
        department = department,
        info = info,
    )
}

pub fn overall_recommendations(gaps: &[ControlGap], controls: &[AssessedControl]) -> Option<String> {
    let mut findings = String::new();
    for (i, gap) in gaps.iter().enumerate() {
        findings.push_str(&format!("{}. Department: {}\n", i + 1, gap.department));
        findings.push_str(&format!("   Control Objective: {}\n", gap.control_objective));
        findings.push_str(&format!("   Description: {}\n", gap.description));
        findings.push_str(&format!("   Risk Impact: {}\n\n", gap.risk_impact));
    }
    if findings.is_empty() {
        for (i, control) in controls.iter().take(MAX_OBJECTIVES_PER_DEPARTMENT).enumerate() {
            findings.push_str(&format!("{}. Department: {}\n", i + 1, control.record.department));
            findings.push_str(&format!("   Control Objective: {}\n", control.record.control_objective));
            findings.push_str(&format!("   What Can Go Wrong: {}\n", control.record.what_can_go_wrong));
            findings.push_str(&format!("   Risk Level: {}\n\n", control.result.risk_level));
        }
    }
    if findings.is_empty() {
        return None;
    }

    Some(format!(
        r#"Review these control gaps and risks and give 3-5 strategic recommendations for the overall risk management program.

GAPS AND RISKS:
{findings}
For each recommendation give a concise title, a priority (High, Medium, Low), a detailed description,
the expected impact and the implementation complexity (High, Medium, Low).

Respond with ONLY a JSON array:
[
    {{
        "title": "string",
        "priority": "High/Medium/Low",
        "description": "string",
        "impact": "string",
        "complexity": "High/Medium/Low"
    }}
]"#,
        findings = findings,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcm::heuristics::{baseline_result, category_scores};
    use crate::rcm::ExtractedRecord;

    fn control(objective: &str, risk: &str) -> AssessedControl {
        let record = ExtractedRecord {
            department: "Payroll".to_string(),
            control_objective: objective.to_string(),
            what_can_go_wrong: risk.to_string(),
            ..Default::default()
        };
        let result = baseline_result(&record);
        AssessedControl { record, result }
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn test_department_prompt_lists_at_most_five_objectives() {
        let controls: Vec<AssessedControl> = (1..=7)
            .map(|i| control(&format!("Objective number {}", i), "Incorrect amount"))
            .collect();
        let refs: Vec<&AssessedControl> = controls.iter().collect();
        let categories = category_scores("Payroll", &controls);
        let prompt = department_analysis("Payroll", &refs, &categories, "1. [Score: 0.90] salary text");
        assert!(prompt.contains("Objective number 5"));
        assert!(!prompt.contains("Objective number 6"));
        assert!(prompt.contains("- Financial: 1/5"));
        assert!(prompt.contains("RELATED PASSAGES"));
    }

    #[test]
    fn test_overall_recommendations_needs_findings() {
        assert!(overall_recommendations(&[], &[]).is_none());
        let controls = vec![control("Salary accuracy", "Late payment")];
        let prompt = overall_recommendations(&[], &controls).unwrap();
        assert!(prompt.contains("Salary accuracy"));
    }
}
