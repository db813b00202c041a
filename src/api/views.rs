use minijinja::Environment;
use serde::Serialize;

use super::session::{Session, SessionState};
use crate::document::{DocumentFormat, ProcessedDocument};
use crate::rcm::{AnalysisDepth, Assessment, RiskCategory, RiskLevel};

const DASHBOARD: &str = "dashboard.html";

#[derive(Serialize)]
struct DepthOption {
    value: &'static str,
    label: &'static str,
}

#[derive(Serialize)]
struct DocumentView {
    name: String,
    format: String,
    size_kb: String,
    detail: String,
    control_count: usize,
    departments: Vec<String>,
}

#[derive(Serialize)]
struct Metrics {
    controls: usize,
    gaps: usize,
    departments: usize,
    high_risks: usize,
    risk_score: String,
}

#[derive(Serialize)]
struct Badge {
    label: String,
    color: &'static str,
}

impl Badge {
    fn level(level: RiskLevel) -> Self {
        Self {
            label: level.as_str().to_string(),
            color: level.color(),
        }
    }
}

#[derive(Serialize)]
struct HeatRow {
    department: String,
    cells: Vec<HeatCell>,
    overall: Badge,
}

#[derive(Serialize)]
struct HeatCell {
    value: u8,
    color: &'static str,
}

#[derive(Serialize)]
struct ControlView {
    objective: String,
    what_can_go_wrong: String,
    activities: String,
    level: Badge,
    is_gap: bool,
    gap: String,
    recommendation: String,
    risk_types: String,
}

#[derive(Serialize)]
struct RiskTypeView {
    name: &'static str,
    items: Vec<String>,
}

#[derive(Serialize)]
struct DepartmentView {
    name: String,
    level: Badge,
    summary: String,
    key_risks: Vec<String>,
    risk_types: Vec<RiskTypeView>,
    controls: Vec<ControlView>,
}

#[derive(Serialize)]
struct RecommendationView {
    department: String,
    title: String,
    description: String,
    impact: String,
    complexity: String,
}

#[derive(Serialize)]
struct RecommendationGroup {
    priority: Badge,
    items: Vec<RecommendationView>,
}

#[derive(Serialize)]
struct LevelCount {
    level: Badge,
    count: usize,
}

#[derive(Serialize)]
struct ResultsView {
    file_name: String,
    depth: &'static str,
    generated: String,
    metrics: Metrics,
    distribution: Vec<LevelCount>,
    categories: Vec<&'static str>,
    heat_map: Vec<HeatRow>,
    departments: Vec<DepartmentView>,
    recommendation_groups: Vec<RecommendationGroup>,
}

#[derive(Serialize)]
pub struct DashboardPage {
    phase: &'static str,
    error: Option<String>,
    in_memory_store: bool,
    accept: String,
    max_upload_mb: usize,
    depths: Vec<DepthOption>,
    document: Option<DocumentView>,
    results: Option<ResultsView>,
}

fn document_view(document: &ProcessedDocument) -> DocumentView {
    let metadata = &document.metadata;
    let detail = if metadata.format.is_tabular() {
        format!("{} sheet(s)", metadata.sheet_count)
    } else {
        format!("{} characters, {} table(s)", metadata.text_length, metadata.table_count)
    };
    DocumentView {
        name: metadata.file_name.clone(),
        format: metadata.format.to_string(),
        size_kb: format!("{:.1}", metadata.size_bytes as f64 / 1024.0),
        detail,
        control_count: document.records.len(),
        departments: document.departments.clone(),
    }
}

fn results_view(assessment: &Assessment) -> ResultsView {
    let heat_map = assessment
        .department_risks
        .iter()
        .map(|risk| HeatRow {
            department: risk.department.clone(),
            cells: RiskCategory::ALL
                .into_iter()
                .map(|category| {
                    let value = risk.category(category);
                    HeatCell {
                        value,
                        color: RiskLevel::from_category_score(value).color(),
                    }
                })
                .collect(),
            overall: Badge::level(risk.overall_risk_level),
        })
        .collect();

    let departments = assessment
        .departments
        .iter()
        .map(|department| {
            let risk = assessment.department_risk(department);
            DepartmentView {
                name: department.clone(),
                level: Badge::level(risk.map(|r| r.overall_risk_level).unwrap_or(RiskLevel::Medium)),
                summary: risk.map(|r| r.summary.clone()).unwrap_or_default(),
                key_risks: risk.map(|r| r.key_risks.clone()).unwrap_or_default(),
                risk_types: risk
                    .map(|r| {
                        r.risk_types
                            .iter()
                            .map(|(risk_type, items)| RiskTypeView {
                                name: risk_type.as_str(),
                                items: items.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
                controls: assessment
                    .controls_for(department)
                    .map(|control| ControlView {
                        objective: control.record.control_objective.clone(),
                        what_can_go_wrong: control.record.what_can_go_wrong.clone(),
                        activities: control.record.control_activities.clone(),
                        level: Badge::level(control.result.risk_level),
                        is_gap: control.result.is_gap,
                        gap: control.result.control_gap.clone(),
                        recommendation: control.result.recommendation.clone(),
                        risk_types: control
                            .result
                            .risk_types
                            .iter()
                            .map(|t| t.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect(),
            }
        })
        .collect();

    let recommendation_groups = RiskLevel::ALL
        .into_iter()
        .filter_map(|priority| {
            let items: Vec<RecommendationView> = assessment
                .recommendations
                .iter()
                .filter(|r| r.priority == priority)
                .map(|r| RecommendationView {
                    department: r.department.clone(),
                    title: r.title.clone(),
                    description: r.description.clone(),
                    impact: r.impact.clone(),
                    complexity: r.complexity.as_str().to_string(),
                })
                .collect();
            (!items.is_empty()).then(|| RecommendationGroup {
                priority: Badge::level(priority),
                items,
            })
        })
        .collect();

    ResultsView {
        file_name: assessment.file_name.clone(),
        depth: assessment.depth.label(),
        generated: assessment
            .generated_at
            .with_timezone(&chrono::Local)
            .format("%B %d, %Y at %I:%M %p")
            .to_string(),
        metrics: Metrics {
            controls: assessment.controls.len(),
            gaps: assessment.gap_count(),
            departments: assessment.departments.len(),
            high_risks: assessment.distribution.high,
            risk_score: assessment.risk_score_label(),
        },
        distribution: RiskLevel::ALL
            .into_iter()
            .map(|level| LevelCount {
                level: Badge::level(level),
                count: assessment.distribution.get(level),
            })
            .collect(),
        categories: RiskCategory::ALL.iter().map(RiskCategory::as_str).collect(),
        heat_map,
        departments,
        recommendation_groups,
    }
}

impl DashboardPage {
    /// Snapshot of the session for rendering. Takes the pending error.
    pub fn from_session(session: &mut Session, in_memory_store: bool, max_upload_bytes: usize) -> Self {
        let error = session.take_error();
        let results = match session.state() {
            SessionState::Displaying { assessment, .. } => Some(results_view(assessment)),
            _ => None,
        };
        Self {
            phase: session.phase(),
            error,
            in_memory_store,
            accept: DocumentFormat::ACCEPTED_EXTENSIONS
                .iter()
                .map(|e| format!(".{}", e))
                .collect::<Vec<_>>()
                .join(","),
            max_upload_mb: max_upload_bytes / (1024 * 1024),
            depths: [AnalysisDepth::Standard, AnalysisDepth::Comprehensive, AnalysisDepth::ExecutiveSummary]
                .into_iter()
                .map(|depth| DepthOption {
                    value: match depth {
                        AnalysisDepth::Standard => "standard",
                        AnalysisDepth::Comprehensive => "comprehensive",
                        AnalysisDepth::ExecutiveSummary => "executive_summary",
                    },
                    label: depth.label(),
                })
                .collect(),
            document: session.document().map(|d| document_view(d)),
            results,
        }
    }
}

/// Template environment. HTML templates are auto-escaped.
pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(DASHBOARD, include_str!("templates/dashboard.html"))?;
        Ok(Self { env })
    }

    pub fn dashboard(&self, page: &DashboardPage) -> Result<String, minijinja::Error> {
        self.env.get_template(DASHBOARD)?.render(page)
    }
}
