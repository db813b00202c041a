//! Keyword rules used before, and instead of, the language model.

use std::collections::BTreeMap;

use super::{
    AnalysisResult, AssessedControl, ControlGap, DepartmentRisk, ExtractedRecord, Recommendation,
    RiskCategory, RiskDistribution, RiskLevel, RiskType,
};

const GAP_KEYWORDS: &[&str] = &[
    "inadequate", "missing", "lack", "absence", "not adequate", "incorrect", "error", "without",
    "unauthorized", "fail", "fraud", "inappropriate",
];

const HIGH_RISK_KEYWORDS: &[&str] = &[
    "critical", "high", "severe", "significant", "major", "fraud", "unauthorized", "incorrect",
];

const LOW_RISK_KEYWORDS: &[&str] = &["minor", "low", "minimal", "small", "unlikely"];

const RISK_TYPE_KEYWORDS: &[(RiskType, &[&str])] = &[
    (
        RiskType::Operational,
        &["process", "workflow", "efficiency", "performance", "delivery", "resource", "procedure", "operational", "operation"],
    ),
    (
        RiskType::Financial,
        &["financial", "budget", "cost", "expense", "revenue", "payment", "accounting", "payroll", "salary"],
    ),
    (
        RiskType::Fraud,
        &["fraud", "misappropriation", "theft", "falsification", "bribery", "corruption", "unauthorized"],
    ),
    (
        RiskType::FinancialFraud,
        &["financial fraud", "embezzlement", "accounting fraud", "false reporting", "misstatement", "incorrect amount"],
    ),
    (
        RiskType::OperationalFraud,
        &["operational fraud", "process manipulation", "override", "unauthorized", "fictitious", "absence of control"],
    ),
];

const CATEGORY_KEYWORDS: &[(RiskCategory, &[&str])] = &[
    (
        RiskCategory::Financial,
        &["financ", "account", "budget", "cost", "expense", "revenue", "payment", "tax", "audit"],
    ),
    (
        RiskCategory::Operational,
        &["operat", "process", "procedur", "workflow", "efficien", "product", "service", "delivery"],
    ),
    (
        RiskCategory::Compliance,
        &["comply", "compliance", "regulat", "legal", "law", "policy", "requirement", "standard"],
    ),
    (
        RiskCategory::Strategic,
        &["strateg", "goal", "objective", "mission", "vision", "plan", "market", "competi"],
    ),
    (
        RiskCategory::Technological,
        &["tech", "system", "data", "secur", "access", "software", "hardware", "it ", "cyber"],
    ),
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

pub fn infer_risk_level(risk_text: &str) -> RiskLevel {
    let text = risk_text.to_lowercase();
    if contains_any(&text, HIGH_RISK_KEYWORDS) {
        RiskLevel::High
    } else if contains_any(&text, LOW_RISK_KEYWORDS) {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

pub fn detect_gap(risk_text: &str) -> bool {
    contains_any(&risk_text.to_lowercase(), GAP_KEYWORDS)
}

pub fn classify_risk_types(text: &str) -> Vec<RiskType> {
    let text = text.to_lowercase();
    RISK_TYPE_KEYWORDS
        .iter()
        .filter(|(_, keywords)| contains_any(&text, keywords))
        .map(|(risk_type, _)| *risk_type)
        .collect()
}

/// Result derived from the record alone: declared values win, keywords fill the rest.
pub fn baseline_result(record: &ExtractedRecord) -> AnalysisResult {
    let risk_level = record
        .declared_risk_level
        .unwrap_or_else(|| infer_risk_level(&record.what_can_go_wrong));
    let is_gap = record
        .declared_gap
        .unwrap_or_else(|| detect_gap(&record.what_can_go_wrong));
    let control_gap = if !record.gap_details.is_empty() {
        record.gap_details.clone()
    } else if is_gap {
        record.what_can_go_wrong.clone()
    } else {
        String::new()
    };

    AnalysisResult {
        risk_level,
        is_gap,
        control_gap,
        recommendation: record.proposed_control.clone(),
        risk_types: classify_risk_types(&record.risk_text()),
    }
}

/// Proposed control used when neither the file nor the model supplied one.
pub fn fallback_solution(what_can_go_wrong: &str) -> &'static str {
    let text = what_can_go_wrong.to_lowercase();
    if text.contains("unauthorized access") {
        "Implement a comprehensive Identity and Access Management (IAM) solution with regular certification reviews. Establish segregation of duties matrix and enforce through automated controls. Implement privileged access management with just-in-time access."
    } else if text.contains("database") {
        "Implement database activity monitoring tools to track all changes. Establish formal change management procedures for schema and data modifications. Implement data loss prevention controls with automated alerting."
    } else if text.contains("accounting") || text.contains("financial") {
        "Implement automated validation rules for accounting entries with threshold-based approval workflows. Establish regular account reconciliation practices with management sign-off. Implement continuous monitoring dashboards for financial data integrity."
    } else {
        "Implement comprehensive documentation of control procedures with clear ownership. Establish regular control testing schedule with measurable effectiveness criteria. Enhance monitoring through automated dashboard reporting of control metrics."
    }
}

fn category_value(level: RiskLevel) -> u8 {
    match level {
        RiskLevel::High => 4,
        RiskLevel::Medium => 3,
        RiskLevel::Low => 2,
    }
}

/// Scores each category 1..=5 for one department from the keywords of its controls.
/// A category no control touches keeps the minimum of 1.
pub fn category_scores(department: &str, controls: &[AssessedControl]) -> BTreeMap<RiskCategory, u8> {
    let mut scores: BTreeMap<RiskCategory, u8> =
        RiskCategory::ALL.into_iter().map(|c| (c, 1)).collect();

    for control in controls.iter().filter(|c| c.record.department == department) {
        let text = control.record.risk_text().to_lowercase();
        let value = category_value(control.result.risk_level);
        for (category, keywords) in CATEGORY_KEYWORDS {
            if contains_any(&text, keywords) {
                let entry = scores.entry(*category).or_insert(1);
                *entry = (*entry).max(value);
            }
        }
    }

    scores
}

pub fn overall_from_categories(categories: &BTreeMap<RiskCategory, u8>) -> RiskLevel {
    if categories.is_empty() {
        return RiskLevel::Low;
    }
    let sum: u32 = categories.values().map(|v| *v as u32).sum();
    let avg = sum as f32 / categories.len() as f32;
    if avg >= 3.5 {
        RiskLevel::High
    } else if avg >= 2.5 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Department profile built without the model, from keyword category scores.
pub fn fallback_department_risk(department: &str, categories: BTreeMap<RiskCategory, u8>) -> DepartmentRisk {
    let level = overall_from_categories(&categories);
    let risk_types = BTreeMap::from([
        (RiskType::Operational, vec![format!("{} operational processes need review", department)]),
        (RiskType::Financial, vec![format!("{} financial controls should be evaluated", department)]),
        (RiskType::Fraud, vec![format!("{} fraud prevention needs assessment", department)]),
        (RiskType::FinancialFraud, vec![format!("{} financial reporting controls need review", department)]),
        (RiskType::OperationalFraud, vec![format!("{} operational override controls need assessment", department)]),
    ]);

    DepartmentRisk {
        department: department.to_string(),
        overall_risk_level: level,
        categories,
        key_risks: vec![
            format!("{} lacks adequate controls", department),
            format!("{} processes may have gaps", department),
            format!("{} risk assessment requires attention", department),
        ],
        risk_types,
        summary: format!(
            "The {} department shows a {} overall risk level based on analysis of control objectives and risk categories.",
            department,
            level.as_str().to_lowercase()
        ),
    }
}

/// Placeholder profile for a department the model left out of its answer.
pub fn pending_department_risk(department: &str) -> DepartmentRisk {
    let categories = BTreeMap::from([
        (RiskCategory::Financial, 2),
        (RiskCategory::Operational, 3),
        (RiskCategory::Compliance, 2),
        (RiskCategory::Strategic, 2),
        (RiskCategory::Technological, 2),
    ]);
    DepartmentRisk {
        department: department.to_string(),
        overall_risk_level: RiskLevel::Medium,
        categories,
        key_risks: vec![format!("Need to analyze {} department risks", department)],
        risk_types: BTreeMap::from([(
            RiskType::Operational,
            vec![format!("Potential operational risks in {}", department)],
        )]),
        summary: format!("Additional analysis required for {} department", department),
    }
}

pub fn fallback_recommendation(department: &str, priority: RiskLevel) -> Recommendation {
    Recommendation {
        department: department.to_string(),
        title: format!("Review Control Framework for {}", department),
        priority,
        description: format!(
            "Conduct a comprehensive review of the control framework in the {} department, focusing on high-risk areas. \
             Implement additional preventive controls to address potential gaps and automate manual processes where possible to reduce human error.",
            department
        ),
        impact: "Strengthened control environment and reduced risk exposure".to_string(),
        complexity: RiskLevel::Medium,
    }
}

pub fn overall_fallback_recommendation() -> Recommendation {
    Recommendation {
        department: "All Departments".to_string(),
        title: "Enhance Risk Control Framework".to_string(),
        priority: RiskLevel::High,
        description: "Conduct a comprehensive review of the risk control framework across all departments. \
                      Prioritize the identified control gaps and assign owners with remediation deadlines."
            .to_string(),
        impact: "Reduced organization-wide risk exposure and clearer accountability".to_string(),
        complexity: RiskLevel::Medium,
    }
}

/// Risk types named by each department's controls, with the objectives that raised them.
pub fn risk_types_from_controls<'a, I>(controls: I) -> BTreeMap<RiskType, Vec<String>>
where
    I: IntoIterator<Item = &'a AssessedControl>,
{
    let mut types: BTreeMap<RiskType, Vec<String>> = BTreeMap::new();
    for control in controls {
        for risk_type in &control.result.risk_types {
            let entries = types.entry(*risk_type).or_default();
            if !entries.contains(&control.record.what_can_go_wrong) && !control.record.what_can_go_wrong.is_empty() {
                entries.push(control.record.what_can_go_wrong.clone());
            }
        }
    }
    types
}

/// Weighted mean of the distribution (High 3, Medium 2, Low 1) on a 0-10 scale.
pub fn risk_score(distribution: &RiskDistribution) -> Option<f32> {
    let total = distribution.total();
    if total == 0 {
        return None;
    }
    let weighted = RiskLevel::ALL
        .iter()
        .map(|level| (level.weight() as usize * distribution.get(*level)) as f32)
        .sum::<f32>()
        / total as f32;
    let score = (weighted / 3.0 * 10.0).clamp(0.0, 10.0);
    Some((score * 10.0).round() / 10.0)
}

pub fn gap_title(text: &str) -> String {
    if text.chars().count() > 50 {
        let head: String = text.chars().take(50).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

pub fn gap_for(control: &AssessedControl) -> ControlGap {
    let record = &control.record;
    let description = if control.result.control_gap.is_empty() {
        record.what_can_go_wrong.clone()
    } else {
        control.result.control_gap.clone()
    };
    ControlGap {
        department: record.department.clone(),
        control_objective: record.control_objective.clone(),
        title: gap_title(&description),
        risk_impact: if record.what_can_go_wrong.is_empty() {
            format!("{} risk exposure", control.result.risk_level)
        } else {
            record.what_can_go_wrong.clone()
        },
        description,
        proposed_solution: control.result.recommendation.clone(),
    }
}
