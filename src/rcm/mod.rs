pub mod heuristics;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low];

    /// Recognises the labels found in RCM spreadsheets ("H", "Moderate",
    /// "Critical", ...). Returns `None` for anything else.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "high" | "h" | "critical" | "severe" => Some(RiskLevel::High),
            "medium" | "m" | "mod" | "moderate" => Some(RiskLevel::Medium),
            "low" | "l" | "minor" => Some(RiskLevel::Low),
            _ => None,
        }
    }

    /// Like `from_label`, but unknown labels default to Medium.
    pub fn normalize(label: &str) -> Self {
        Self::from_label(label).unwrap_or(RiskLevel::Medium)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "High",
            RiskLevel::Medium => "Medium",
            RiskLevel::Low => "Low",
        }
    }

    /// Level of a 1-5 category score: 4 and up is High, 3 is Medium.
    pub fn from_category_score(value: u8) -> Self {
        match value {
            4..=u8::MAX => RiskLevel::High,
            3 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            RiskLevel::High => 3,
            RiskLevel::Medium => 2,
            RiskLevel::Low => 1,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            RiskLevel::High => "#ff6b6b",
            RiskLevel::Medium => "#ffa726",
            RiskLevel::Low => "#66bb6a",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskType {
    Operational,
    Financial,
    Fraud,
    #[serde(rename = "Financial Fraud", alias = "Financial_Fraud")]
    FinancialFraud,
    #[serde(rename = "Operational Fraud", alias = "Operational_Fraud")]
    OperationalFraud,
}

impl RiskType {
    pub const ALL: [RiskType; 5] = [
        RiskType::Operational,
        RiskType::Financial,
        RiskType::Fraud,
        RiskType::FinancialFraud,
        RiskType::OperationalFraud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskType::Operational => "Operational",
            RiskType::Financial => "Financial",
            RiskType::Fraud => "Fraud",
            RiskType::FinancialFraud => "Financial Fraud",
            RiskType::OperationalFraud => "Operational Fraud",
        }
    }

    /// Accepts both "Financial Fraud" and "Financial_Fraud".
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().replace('_', " ").to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().to_lowercase() == normalized)
    }
}

impl fmt::Display for RiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskCategory {
    Financial,
    Operational,
    Compliance,
    Strategic,
    Technological,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 5] = [
        RiskCategory::Financial,
        RiskCategory::Operational,
        RiskCategory::Compliance,
        RiskCategory::Strategic,
        RiskCategory::Technological,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Financial => "Financial",
            RiskCategory::Operational => "Operational",
            RiskCategory::Compliance => "Compliance",
            RiskCategory::Strategic => "Strategic",
            RiskCategory::Technological => "Technological",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    #[default]
    Standard,
    Comprehensive,
    ExecutiveSummary,
}

impl AnalysisDepth {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisDepth::Standard => "Standard Analysis",
            AnalysisDepth::Comprehensive => "Comprehensive Review",
            AnalysisDepth::ExecutiveSummary => "Executive Summary",
        }
    }
}

impl FromStr for AnalysisDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "standard" | "standard_analysis" => Ok(AnalysisDepth::Standard),
            "comprehensive" | "comprehensive_review" => Ok(AnalysisDepth::Comprehensive),
            "executive" | "executive_summary" => Ok(AnalysisDepth::ExecutiveSummary),
            other => Err(format!("unknown analysis depth: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub depth: AnalysisDepth,
    pub include_recommendations: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            depth: AnalysisDepth::Standard,
            include_recommendations: true,
        }
    }
}

/// One row of a risk control matrix as read from the uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub department: String,
    pub sub_process: String,
    pub control_objective: String,
    pub what_can_go_wrong: String,
    pub control_activities: String,
    /// Values the source file already carries. Absent when the column is missing.
    pub declared_risk_level: Option<RiskLevel>,
    pub declared_gap: Option<bool>,
    pub gap_details: String,
    pub proposed_control: String,
}

impl ExtractedRecord {
    /// Objective and risk text, the input of every keyword heuristic.
    pub fn risk_text(&self) -> String {
        format!("{} {}", self.control_objective, self.what_can_go_wrong)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub risk_level: RiskLevel,
    pub is_gap: bool,
    pub control_gap: String,
    pub recommendation: String,
    pub risk_types: Vec<RiskType>,
}

/// A record and its result. Keeping them in one value means there is always
/// exactly one result per extracted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessedControl {
    pub record: ExtractedRecord,
    pub result: AnalysisResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentRisk {
    pub department: String,
    pub overall_risk_level: RiskLevel,
    pub categories: BTreeMap<RiskCategory, u8>,
    pub key_risks: Vec<String>,
    pub risk_types: BTreeMap<RiskType, Vec<String>>,
    pub summary: String,
}

impl DepartmentRisk {
    pub fn category(&self, category: RiskCategory) -> u8 {
        self.categories.get(&category).copied().unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlGap {
    pub department: String,
    pub control_objective: String,
    pub title: String,
    pub description: String,
    pub risk_impact: String,
    pub proposed_solution: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub department: String,
    pub title: String,
    pub priority: RiskLevel,
    pub description: String,
    pub impact: String,
    pub complexity: RiskLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDistribution {
    #[serde(rename = "High")]
    pub high: usize,
    #[serde(rename = "Medium")]
    pub medium: usize,
    #[serde(rename = "Low")]
    pub low: usize,
}

impl RiskDistribution {
    pub fn from_levels<I: IntoIterator<Item = RiskLevel>>(levels: I) -> Self {
        let mut dist = Self::default();
        for level in levels {
            match level {
                RiskLevel::High => dist.high += 1,
                RiskLevel::Medium => dist.medium += 1,
                RiskLevel::Low => dist.low += 1,
            }
        }
        dist
    }

    pub fn get(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::High => self.high,
            RiskLevel::Medium => self.medium,
            RiskLevel::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// The complete output of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub document_id: String,
    pub file_name: String,
    pub depth: AnalysisDepth,
    pub departments: Vec<String>,
    pub controls: Vec<AssessedControl>,
    pub department_risks: Vec<DepartmentRisk>,
    pub gaps: Vec<ControlGap>,
    pub recommendations: Vec<Recommendation>,
    pub distribution: RiskDistribution,
    pub risk_score: Option<f32>,
    pub generated_at: DateTime<Utc>,
}

impl Assessment {
    pub fn controls_for<'a>(&'a self, department: &'a str) -> impl Iterator<Item = &'a AssessedControl> + 'a {
        self.controls.iter().filter(move |c| c.record.department == department)
    }

    pub fn department_risk(&self, department: &str) -> Option<&DepartmentRisk> {
        self.department_risks.iter().find(|d| d.department == department)
    }

    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }

    pub fn risk_score_label(&self) -> String {
        match self.risk_score {
            Some(score) => format!("{:.1}", score),
            None => "N/A".to_string(),
        }
    }
}
