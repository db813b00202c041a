use chrono::Utc;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::document::{departments_of, ProcessedDocument, Sheet};
use crate::llm::prompts;
use crate::llm::response::{
    parse_reply, truthy, ComprehensiveReply, DepartmentAnalysisReply, ExtractedDepartmentRisk,
    ExtractionReply, ObjectiveGapReply, OneOrMany, RecommendationReply,
};
use crate::llm::semantic_search::SemanticSearch;
use crate::providers::traits::CompletionProvider;
use crate::rcm::heuristics::{
    baseline_result, category_scores, fallback_department_risk, fallback_recommendation,
    fallback_solution, gap_for, gap_title, overall_fallback_recommendation, overall_from_categories,
    pending_department_risk, risk_score, risk_types_from_controls,
};
use crate::rcm::{
    AnalysisDepth, AnalysisOptions, AssessedControl, Assessment, ControlGap, DepartmentRisk,
    ExtractedRecord, Recommendation, RiskCategory, RiskDistribution, RiskLevel, RiskType,
};

const CONTEXT_RESULTS: usize = 5;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Language model request failed: {0}")]
    Provider(String),
    #[error("Could not read the model's answer: {0}")]
    MalformedResponse(String),
    #[error("No control objectives were found in the document")]
    NoControls,
}

/// Intermediate state shared by the depth-specific passes.
#[derive(Default)]
struct Draft {
    departments: Vec<String>,
    controls: Vec<AssessedControl>,
    department_risks: Vec<DepartmentRisk>,
    model_gaps: Vec<ControlGap>,
    recommendations: Vec<Recommendation>,
}

pub struct AnalysisEngine {
    provider: Arc<dyn CompletionProvider>,
    search: Option<Arc<SemanticSearch>>,
}

impl AnalysisEngine {
    pub fn new(provider: Arc<dyn CompletionProvider>, search: Option<Arc<SemanticSearch>>) -> Self {
        Self { provider, search }
    }

    pub async fn analyze(
        &self,
        document: &ProcessedDocument,
        options: &AnalysisOptions,
    ) -> Result<Assessment, AnalysisError> {
        info!(
            "Analyzing {} ({}, {})",
            document.metadata.file_name,
            document.metadata.format,
            options.depth.label()
        );

        let mut depth = options.depth;
        let mut draft = if let Some(text) = document.text() {
            // text documents get the extraction pass whatever depth was asked for
            depth = AnalysisDepth::Standard;
            self.extract_from_text(text).await?
        } else {
            if document.records.is_empty() {
                return Err(AnalysisError::NoControls);
            }
            let controls: Vec<AssessedControl> = document
                .records
                .iter()
                .map(|record| AssessedControl {
                    result: baseline_result(record),
                    record: record.clone(),
                })
                .collect();
            let departments = if document.departments.is_empty() {
                departments_of(&document.records)
            } else {
                document.departments.clone()
            };

            match options.depth {
                AnalysisDepth::Standard => self.standard(document, departments, controls).await,
                AnalysisDepth::Comprehensive => {
                    match self.comprehensive(document, &departments, &controls).await {
                        Ok(draft) => draft,
                        Err(e) => {
                            warn!("Comprehensive review failed, running standard analysis: {}", e);
                            depth = AnalysisDepth::Standard;
                            self.standard(document, departments, controls).await
                        }
                    }
                }
                AnalysisDepth::ExecutiveSummary => Self::executive(departments, controls),
            }
        };

        for control in draft.controls.iter_mut() {
            if control.result.recommendation.trim().is_empty() {
                control.result.recommendation = fallback_solution(&control.record.what_can_go_wrong).to_string();
            }
        }

        Self::complete_department_risks(&mut draft);
        let gaps = Self::collect_gaps(&draft);

        if options.include_recommendations && draft.recommendations.is_empty() {
            draft.recommendations = if depth == AnalysisDepth::ExecutiveSummary {
                self.overall_recommendations(&gaps, &draft.controls).await
            } else {
                self.department_recommendations(&draft).await
            };
        }

        let distribution = RiskDistribution::from_levels(draft.controls.iter().map(|c| c.result.risk_level));
        let assessment = Assessment {
            document_id: document.id.clone(),
            file_name: document.metadata.file_name.clone(),
            depth,
            departments: draft.departments,
            controls: draft.controls,
            department_risks: draft.department_risks,
            gaps,
            recommendations: draft.recommendations,
            risk_score: risk_score(&distribution),
            distribution,
            generated_at: Utc::now(),
        };
        info!(
            "Analysis complete: {} controls, {} gaps, {} recommendations, risk score {}",
            assessment.controls.len(),
            assessment.gap_count(),
            assessment.recommendations.len(),
            assessment.risk_score_label()
        );
        Ok(assessment)
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, AnalysisError> {
        let reply = self
            .provider
            .complete(prompt)
            .await
            .map_err(|e| AnalysisError::Provider(e.to_string()))?;
        debug!("Model reply: {} chars", reply.len());
        parse_reply(&reply).map_err(|e| AnalysisError::MalformedResponse(e.to_string()))
    }

    async fn context(&self, document_id: &str, query: &str) -> String {
        match &self.search {
            Some(search) => search.context_for(document_id, query, CONTEXT_RESULTS).await,
            None => String::new(),
        }
    }

    async fn standard(
        &self,
        document: &ProcessedDocument,
        departments: Vec<String>,
        mut controls: Vec<AssessedControl>,
    ) -> Draft {
        let mut department_risks = Vec::with_capacity(departments.len());

        for department in &departments {
            let categories = category_scores(department, &controls);
            let context = self
                .context(&document.id, &format!("{} department risks and control gaps", department))
                .await;
            let prompt = {
                let own: Vec<&AssessedControl> =
                    controls.iter().filter(|c| &c.record.department == department).collect();
                prompts::department_analysis(department, &own, &categories, &context)
            };

            let risk = match self.ask::<DepartmentAnalysisReply>(&prompt).await {
                Ok(reply) => {
                    apply_objective_gaps(&mut controls, department, &reply.control_gaps);
                    department_risk_from_reply(department, categories, reply)
                }
                Err(e) => {
                    warn!("Department analysis for {} failed, using keyword profile: {}", department, e);
                    fallback_department_risk(department, categories)
                }
            };
            department_risks.push(risk);
        }

        Draft {
            departments,
            controls,
            department_risks,
            ..Default::default()
        }
    }

    async fn comprehensive(
        &self,
        document: &ProcessedDocument,
        departments: &[String],
        controls: &[AssessedControl],
    ) -> Result<Draft, AnalysisError> {
        let sheets = document
            .sheets()
            .iter()
            .map(Sheet::to_markdown)
            .collect::<Vec<_>>()
            .join("\n");
        let context = self.context(&document.id, "control gaps and high risk areas").await;
        let reply: ComprehensiveReply = self
            .ask(&prompts::comprehensive_review(departments, &sheets, &context))
            .await?;
        if reply.departments.is_empty() {
            return Err(AnalysisError::MalformedResponse("no departments in review".to_string()));
        }

        let mut department_risks = Vec::with_capacity(departments.len());
        let mut model_gaps = Vec::new();
        for department in departments {
            let reviewed = reply
                .departments
                .iter()
                .find(|d| d.name.trim().eq_ignore_ascii_case(department.trim()));
            let Some(reviewed) = reviewed else {
                department_risks.push(pending_department_risk(department));
                continue;
            };

            let risk_types = risk_type_lists(&reviewed.risk_analysis);
            let categories: BTreeMap<RiskCategory, u8> = RiskCategory::ALL
                .into_iter()
                .map(|category| {
                    let value = match category {
                        RiskCategory::Financial => category_from_analysis(&risk_types, RiskType::Financial),
                        RiskCategory::Operational => category_from_analysis(&risk_types, RiskType::Operational),
                        _ => 3,
                    };
                    (category, value)
                })
                .collect();
            let overall = RiskLevel::from_label(&reviewed.overall_risk_level)
                .unwrap_or_else(|| overall_from_categories(&categories));

            for gap in &reviewed.control_gaps {
                if gap.gap_title.trim().is_empty() {
                    continue;
                }
                model_gaps.push(ControlGap {
                    department: department.clone(),
                    control_objective: String::new(),
                    title: gap_title(&gap.gap_title),
                    description: gap.gap_title.clone(),
                    risk_impact: gap.impact.clone(),
                    proposed_solution: gap.recommendation.clone(),
                });
            }

            department_risks.push(DepartmentRisk {
                department: department.clone(),
                overall_risk_level: overall,
                categories,
                key_risks: reviewed.key_risks.clone(),
                risk_types,
                summary: summary_or_default(&reviewed.summary, department, overall),
            });
        }

        let recommendations = convert_recommendations(reply.overall_recommendations, "All Departments");

        Ok(Draft {
            departments: departments.to_vec(),
            controls: controls.to_vec(),
            department_risks,
            model_gaps,
            recommendations,
        })
    }

    fn executive(departments: Vec<String>, controls: Vec<AssessedControl>) -> Draft {
        let department_risks = departments
            .iter()
            .map(|department| fallback_department_risk(department, category_scores(department, &controls)))
            .collect();
        Draft {
            departments,
            controls,
            department_risks,
            ..Default::default()
        }
    }

    /// PDF and DOCX: the model extracts the matrix from free text.
    async fn extract_from_text(&self, text: &str) -> Result<Draft, AnalysisError> {
        let reply: ExtractionReply = self.ask(&prompts::text_extraction(text)).await?;

        let controls: Vec<AssessedControl> = reply
            .control_objectives
            .into_iter()
            .filter(|o| !o.objective.trim().is_empty() || !o.what_can_go_wrong.trim().is_empty())
            .map(|o| {
                let record = ExtractedRecord {
                    department: if o.department.trim().is_empty() {
                        "Unknown".to_string()
                    } else {
                        o.department.trim().to_string()
                    },
                    sub_process: String::new(),
                    control_objective: o.objective,
                    what_can_go_wrong: o.what_can_go_wrong,
                    control_activities: o.control_activities,
                    declared_risk_level: RiskLevel::from_label(&o.risk_level),
                    declared_gap: truthy(&o.is_gap),
                    gap_details: o.gap_details,
                    proposed_control: o.proposed_control,
                };
                AssessedControl {
                    result: baseline_result(&record),
                    record,
                }
            })
            .collect();
        if controls.is_empty() {
            return Err(AnalysisError::NoControls);
        }

        let mut departments: Vec<String> = Vec::new();
        let record_departments = controls.iter().map(|c| c.record.department.clone());
        for department in reply
            .departments
            .into_iter()
            .map(|d| d.trim().to_string())
            .chain(record_departments)
        {
            if !department.is_empty() && !departments.contains(&department) {
                departments.push(department);
            }
        }

        let model_gaps = reply
            .gaps
            .into_iter()
            .filter(|g| !g.gap_title.trim().is_empty() || !g.description.trim().is_empty())
            .map(|g| ControlGap {
                title: if g.gap_title.trim().is_empty() {
                    gap_title(&g.description)
                } else {
                    g.gap_title
                },
                department: g.department,
                control_objective: g.control_objective,
                description: g.description,
                risk_impact: g.risk_impact,
                proposed_solution: g.proposed_solution,
            })
            .collect();

        let department_risks = departments
            .iter()
            .filter_map(|department| {
                reply
                    .department_risks
                    .get(department)
                    .map(|extracted| extracted_department_risk(department, extracted, &controls))
            })
            .collect();

        Ok(Draft {
            departments,
            controls,
            department_risks,
            model_gaps,
            recommendations: Vec::new(),
        })
    }

    async fn department_recommendations(&self, draft: &Draft) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();
        for risk in &draft.department_risks {
            let department = &risk.department;
            let own: Vec<&AssessedControl> =
                draft.controls.iter().filter(|c| &c.record.department == department).collect();
            let prompt = prompts::department_recommendations(department, risk, &own);

            match self.ask::<OneOrMany<RecommendationReply>>(&prompt).await {
                Ok(reply) => {
                    let converted = convert_recommendations(reply.into_vec(), department);
                    if converted.is_empty() {
                        recommendations.push(fallback_recommendation(department, risk.overall_risk_level));
                    } else {
                        recommendations.extend(converted);
                    }
                }
                Err(e) => {
                    warn!("Recommendations for {} failed: {}", department, e);
                    recommendations.push(fallback_recommendation(department, risk.overall_risk_level));
                }
            }
        }
        recommendations
    }

    async fn overall_recommendations(&self, gaps: &[ControlGap], controls: &[AssessedControl]) -> Vec<Recommendation> {
        let Some(prompt) = prompts::overall_recommendations(gaps, controls) else {
            return vec![overall_fallback_recommendation()];
        };
        match self.ask::<OneOrMany<RecommendationReply>>(&prompt).await {
            Ok(reply) => {
                let converted = convert_recommendations(reply.into_vec(), "All Departments");
                if converted.is_empty() {
                    vec![overall_fallback_recommendation()]
                } else {
                    converted
                }
            }
            Err(e) => {
                warn!("Overall recommendations failed: {}", e);
                vec![overall_fallback_recommendation()]
            }
        }
    }

    /// Every department ends up with exactly one profile, in department order.
    fn complete_department_risks(draft: &mut Draft) {
        let mut by_department: HashMap<String, DepartmentRisk> = draft
            .department_risks
            .drain(..)
            .map(|risk| (risk.department.clone(), risk))
            .collect();

        draft.department_risks = draft
            .departments
            .iter()
            .map(|department| {
                by_department.remove(department).unwrap_or_else(|| {
                    fallback_department_risk(department, category_scores(department, &draft.controls))
                })
            })
            .collect();
    }

    /// Model-reported gaps first, then every flagged control not already covered.
    fn collect_gaps(draft: &Draft) -> Vec<ControlGap> {
        let mut gaps = draft.model_gaps.clone();
        for control in draft.controls.iter().filter(|c| c.result.is_gap) {
            let covered = gaps.iter().any(|g| {
                !g.control_objective.is_empty()
                    && g.department == control.record.department
                    && g.control_objective == control.record.control_objective
            });
            if !covered {
                gaps.push(gap_for(control));
            }
        }
        gaps
    }
}

fn objective_matches(record_objective: &str, replied: &str) -> bool {
    let record_objective = record_objective.trim().to_lowercase();
    let replied = replied.trim().to_lowercase();
    if record_objective.is_empty() || replied.is_empty() {
        return false;
    }
    record_objective == replied || record_objective.contains(&replied) || replied.contains(&record_objective)
}

fn apply_objective_gaps(controls: &mut [AssessedControl], department: &str, replies: &[ObjectiveGapReply]) {
    for reply in replies {
        let target = controls
            .iter_mut()
            .filter(|c| c.record.department == department)
            .find(|c| objective_matches(&c.record.control_objective, &reply.objective));
        let Some(control) = target else {
            debug!("No control matches objective '{}'", reply.objective);
            continue;
        };

        if let Some(has_gap) = truthy(&reply.has_gap) {
            control.result.is_gap = has_gap;
            if has_gap && control.result.control_gap.is_empty() {
                control.result.control_gap = control.record.what_can_go_wrong.clone();
            }
        }
        if !reply.proposed_solution.trim().is_empty() {
            control.result.recommendation = reply.proposed_solution.trim().to_string();
        }
    }
}

fn risk_type_lists(replied: &HashMap<String, Vec<String>>) -> BTreeMap<RiskType, Vec<String>> {
    replied
        .iter()
        .filter_map(|(label, risks)| {
            let risk_type = RiskType::from_label(label)?;
            let risks: Vec<String> = risks
                .iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
            (!risks.is_empty()).then_some((risk_type, risks))
        })
        .collect()
}

fn category_from_analysis(risk_types: &BTreeMap<RiskType, Vec<String>>, risk_type: RiskType) -> u8 {
    if risk_types.contains_key(&risk_type) {
        4
    } else {
        2
    }
}

fn summary_or_default(summary: &str, department: &str, level: RiskLevel) -> String {
    if summary.trim().is_empty() {
        format!(
            "The {} department shows a {} overall risk level.",
            department,
            level.as_str().to_lowercase()
        )
    } else {
        summary.trim().to_string()
    }
}

fn department_risk_from_reply(
    department: &str,
    categories: BTreeMap<RiskCategory, u8>,
    reply: DepartmentAnalysisReply,
) -> DepartmentRisk {
    let overall = RiskLevel::from_label(&reply.overall_risk_level)
        .unwrap_or_else(|| overall_from_categories(&categories));
    DepartmentRisk {
        department: department.to_string(),
        overall_risk_level: overall,
        categories,
        key_risks: reply.key_risks,
        risk_types: risk_type_lists(&reply.risk_types),
        summary: summary_or_default(&reply.summary, department, overall),
    }
}

fn category_value(value: &Value) -> Option<u8> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    Some(number.round().clamp(1.0, 5.0) as u8)
}

fn extracted_department_risk(
    department: &str,
    extracted: &ExtractedDepartmentRisk,
    controls: &[AssessedControl],
) -> DepartmentRisk {
    let mut categories = category_scores(department, controls);
    for (label, value) in &extracted.risk_categories {
        let category = RiskCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(label.trim()));
        if let (Some(category), Some(value)) = (category, category_value(value)) {
            categories.insert(category, value);
        }
    }
    let overall = RiskLevel::from_label(&extracted.overall_risk_level)
        .unwrap_or_else(|| overall_from_categories(&categories));

    DepartmentRisk {
        department: department.to_string(),
        overall_risk_level: overall,
        categories,
        key_risks: extracted.key_risks.clone(),
        risk_types: risk_types_from_controls(controls.iter().filter(|c| c.record.department == department)),
        summary: summary_or_default(&extracted.summary, department, overall),
    }
}

fn convert_recommendations(replies: Vec<RecommendationReply>, department: &str) -> Vec<Recommendation> {
    replies
        .into_iter()
        .filter(|r| !r.title.trim().is_empty() || !r.description.trim().is_empty())
        .map(|r| Recommendation {
            department: if r.department.trim().is_empty() {
                department.to_string()
            } else {
                r.department.trim().to_string()
            },
            title: if r.title.trim().is_empty() {
                format!("Recommendation for {}", department)
            } else {
                r.title.trim().to_string()
            },
            priority: RiskLevel::normalize(&r.priority),
            description: r.description,
            impact: r.impact,
            complexity: RiskLevel::normalize(&r.complexity),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryVectorStore;
    use crate::document::process_document;
    use crate::llm::embeddings::HashingEmbedder;
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays canned replies in order and records every prompt.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            match self.replies.lock().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Err(anyhow::anyhow!("no scripted reply left")),
            }
        }

        async fn generate_embedding(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }

        async fn get_model_info(&self) -> Result<String> {
            Ok("scripted".to_string())
        }
    }

    const CSV: &str = "Department,Control Objective,What Can Go Wrong,Risk Level,Control Activities\n\
                       Payroll,Salary accuracy,Incorrect salary paid,High,Monthly payroll review\n\
                       Payroll,Leave tracking,Leave balance overstated,Low,Quarterly reconciliation\n\
                       Treasury,Bank transfer limits,Transfers released late,Medium,Dual approval\n";

    fn options(depth: AnalysisDepth, include_recommendations: bool) -> AnalysisOptions {
        AnalysisOptions {
            depth,
            include_recommendations,
        }
    }

    #[tokio::test]
    async fn test_standard_analysis_applies_model_gaps() {
        let provider = ScriptedProvider::new(vec![
            Ok(r#"```json
{"overall_risk_level": "High", "key_risks": ["Wrong pay"], "risk_types": {"Financial": ["Salary errors"], "Fraud": []},
 "summary": "Payroll is exposed.",
 "control_gaps": [{"objective": "Leave tracking", "has_gap": "Yes", "proposed_solution": "Automate leave accrual checks."}]}
```"#),
            Err("503 Service Unavailable"),
        ]);
        let engine = AnalysisEngine::new(provider.clone(), None);
        let doc = process_document("rcm.csv", CSV.as_bytes()).unwrap();

        let assessment = engine.analyze(&doc, &options(AnalysisDepth::Standard, false)).await.unwrap();

        assert_eq!(assessment.departments, vec!["Payroll", "Treasury"]);
        assert_eq!(assessment.controls.len(), 3);
        let leave = &assessment.controls[1];
        assert!(leave.result.is_gap);
        assert_eq!(leave.result.recommendation, "Automate leave accrual checks.");

        let payroll = assessment.department_risk("Payroll").unwrap();
        assert_eq!(payroll.overall_risk_level, RiskLevel::High);
        assert_eq!(payroll.risk_types.len(), 1);
        assert_eq!(payroll.summary, "Payroll is exposed.");

        // Treasury's call failed and fell back to keyword scoring
        let treasury = assessment.department_risk("Treasury").unwrap();
        assert!(treasury.summary.contains("based on analysis of control objectives"));

        assert_eq!(assessment.distribution, RiskDistribution { high: 1, medium: 1, low: 1 });
        assert_eq!(assessment.risk_score, Some(6.7));
        assert!(assessment.controls.iter().all(|c| !c.result.recommendation.is_empty()));
        assert!(assessment.recommendations.is_empty());
        assert_eq!(provider.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_gaps_cover_flagged_controls() {
        let provider = ScriptedProvider::new(vec![Err("down"), Err("down")]);
        let engine = AnalysisEngine::new(provider, None);
        let doc = process_document("rcm.csv", CSV.as_bytes()).unwrap();

        let assessment = engine.analyze(&doc, &options(AnalysisDepth::Standard, false)).await.unwrap();
        // "Incorrect salary paid" is the only gap keyword hit
        assert_eq!(assessment.gap_count(), 1);
        assert_eq!(assessment.gaps[0].control_objective, "Salary accuracy");
        assert_eq!(assessment.department_risks.len(), 2);
    }

    #[tokio::test]
    async fn test_comprehensive_falls_back_to_standard() {
        let provider = ScriptedProvider::new(vec![
            Ok("Sorry, I cannot help with that."),
            Ok(r#"{"overall_risk_level": "Medium"}"#),
            Ok(r#"{"overall_risk_level": "Low"}"#),
        ]);
        let engine = AnalysisEngine::new(provider.clone(), None);
        let doc = process_document("rcm.csv", CSV.as_bytes()).unwrap();

        let assessment = engine
            .analyze(&doc, &options(AnalysisDepth::Comprehensive, false))
            .await
            .unwrap();
        assert_eq!(assessment.depth, AnalysisDepth::Standard);
        assert_eq!(assessment.department_risk("Treasury").unwrap().overall_risk_level, RiskLevel::Low);
        assert!(provider.prompts()[0].contains("### Sheet: CSV"));
    }

    #[tokio::test]
    async fn test_comprehensive_review() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{
            "departments": [{
                "name": "payroll",
                "overall_risk_level": "High",
                "key_risks": ["Overpayment"],
                "risk_analysis": {"Financial": ["Overpayment"], "Operational": []},
                "control_gaps": [{"gap_title": "No segregation between payroll preparer and approver", "impact": "Fraud", "recommendation": "Separate duties"}],
                "summary": ""
            }],
            "overall_recommendations": [{"title": "Segregate payroll duties", "priority": "high", "description": "Split roles", "impact": "Less fraud"}]
        }"#)]);
        let engine = AnalysisEngine::new(provider, None);
        let doc = process_document("rcm.csv", CSV.as_bytes()).unwrap();

        let assessment = engine
            .analyze(&doc, &options(AnalysisDepth::Comprehensive, true))
            .await
            .unwrap();
        assert_eq!(assessment.depth, AnalysisDepth::Comprehensive);

        let payroll = assessment.department_risk("Payroll").unwrap();
        assert_eq!(payroll.category(RiskCategory::Financial), 4);
        assert_eq!(payroll.category(RiskCategory::Operational), 2);
        assert_eq!(payroll.category(RiskCategory::Compliance), 3);

        let treasury = assessment.department_risk("Treasury").unwrap();
        assert_eq!(treasury.summary, "Additional analysis required for Treasury department");

        // the model gap plus the keyword-flagged salary control
        assert_eq!(assessment.gap_count(), 2);
        assert_eq!(assessment.recommendations.len(), 1);
        assert_eq!(assessment.recommendations[0].department, "All Departments");
        assert_eq!(assessment.recommendations[0].priority, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_executive_summary_uses_one_call() {
        let provider = ScriptedProvider::new(vec![Ok(
            r#"[{"title": "Automate payroll checks", "priority": "Medium", "description": "Add validation", "impact": "Fewer errors", "complexity": "Low"}]"#,
        )]);
        let engine = AnalysisEngine::new(provider.clone(), None);
        let doc = process_document("rcm.csv", CSV.as_bytes()).unwrap();

        let assessment = engine
            .analyze(&doc, &options(AnalysisDepth::ExecutiveSummary, true))
            .await
            .unwrap();
        assert_eq!(provider.prompts().len(), 1);
        assert_eq!(assessment.department_risks.len(), 2);
        assert_eq!(assessment.recommendations[0].complexity, RiskLevel::Low);
    }

    #[tokio::test]
    async fn test_recommendation_failures_fall_back() {
        let provider = ScriptedProvider::new(vec![
            Err("down"),
            Err("down"),
            Ok(r#"{"title": "Tighten payroll approvals", "priority": "High", "description": "Two approvers"}"#),
            Err("timeout"),
        ]);
        let engine = AnalysisEngine::new(provider, None);
        let doc = process_document("rcm.csv", CSV.as_bytes()).unwrap();

        let assessment = engine.analyze(&doc, &options(AnalysisDepth::Standard, true)).await.unwrap();
        assert_eq!(assessment.recommendations.len(), 2);
        assert_eq!(assessment.recommendations[0].title, "Tighten payroll approvals");
        assert_eq!(assessment.recommendations[0].department, "Payroll");
        assert_eq!(assessment.recommendations[1].title, "Review Control Framework for Treasury");
    }

    #[tokio::test]
    async fn test_text_extraction() {
        let provider = ScriptedProvider::new(vec![
            Ok(r#"```json
{
  "departments": ["Procurement"],
  "control_objectives": [
    {"department": "Procurement", "objective": "Vendor onboarding", "what_can_go_wrong": "Fictitious vendors created",
     "risk_level": "High", "control_activities": "Vendor review", "is_gap": true, "gap_details": "No independent check", "proposed_control": ""},
    {"department": "Logistics", "objective": "Stock counts", "what_can_go_wrong": "Stock loss", "risk_level": "Low", "is_gap": false}
  ],
  "gaps": [{"department": "Procurement", "control_objective": "Vendor onboarding", "gap_title": "No independent vendor check",
            "description": "Vendors created without review", "risk_impact": "Fraud", "proposed_solution": "Independent review"}],
  "department_risks": {"Procurement": {"overall_risk_level": "High", "risk_categories": {"Financial": 5, "compliance": "3"}, "key_risks": ["Fake vendors"], "summary": "Exposed"}}
}
```"#),
            Err("down"),
            Err("down"),
        ]);
        let engine = AnalysisEngine::new(provider.clone(), None);
        let doc = process_document("rcm.docx", &docx_bytes("Procurement policy and vendor controls")).unwrap();

        let assessment = engine.analyze(&doc, &options(AnalysisDepth::Standard, true)).await.unwrap();
        assert_eq!(assessment.departments, vec!["Procurement", "Logistics"]);
        assert_eq!(assessment.controls.len(), 2);
        // the model's gap covers the flagged control
        assert_eq!(assessment.gap_count(), 1);

        let procurement = assessment.department_risk("Procurement").unwrap();
        assert_eq!(procurement.category(RiskCategory::Financial), 5);
        assert_eq!(procurement.category(RiskCategory::Compliance), 3);
        assert!(procurement.risk_types.contains_key(&RiskType::OperationalFraud));
        assert!(assessment.department_risk("Logistics").is_some());
        assert_eq!(assessment.recommendations.len(), 2);
        assert!(provider.prompts()[0].contains("Procurement policy and vendor controls"));
    }

    #[tokio::test]
    async fn test_text_documents_record_the_depth_that_ran() {
        let provider = ScriptedProvider::new(vec![
            Ok(r#"{"departments": ["Procurement"], "control_objectives": [
                {"department": "Procurement", "objective": "Vendor onboarding", "what_can_go_wrong": "Fictitious vendors", "risk_level": "High"}
            ]}"#),
            Err("down"),
        ]);
        let engine = AnalysisEngine::new(provider.clone(), None);
        let doc = process_document("rcm.docx", &docx_bytes("Vendor controls")).unwrap();

        let assessment = engine
            .analyze(&doc, &options(AnalysisDepth::Comprehensive, true))
            .await
            .unwrap();
        assert_eq!(assessment.depth, AnalysisDepth::Standard);
        // extraction, then one recommendation call per department
        assert_eq!(provider.prompts().len(), 2);
        assert_eq!(assessment.recommendations[0].title, "Review Control Framework for Procurement");
    }

    #[tokio::test]
    async fn test_text_extraction_errors_propagate() {
        let doc = process_document("rcm.docx", &docx_bytes("Some text")).unwrap();

        let engine = AnalysisEngine::new(ScriptedProvider::new(vec![Err("401 Unauthorized")]), None);
        let err = engine.analyze(&doc, &AnalysisOptions::default()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Provider(_)));

        let engine = AnalysisEngine::new(ScriptedProvider::new(vec![Ok("not json at all")]), None);
        let err = engine.analyze(&doc, &AnalysisOptions::default()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_retrieved_context_reaches_prompt() {
        let search = Arc::new(SemanticSearch::new(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(HashingEmbedder::default()),
        ));
        let doc = process_document("rcm.csv", CSV.as_bytes()).unwrap();
        search.index_document(&doc).await.unwrap();

        let provider = ScriptedProvider::new(vec![Err("down"), Err("down")]);
        let engine = AnalysisEngine::new(provider.clone(), Some(search));
        engine.analyze(&doc, &options(AnalysisDepth::Standard, false)).await.unwrap();
        assert!(provider.prompts()[0].contains("(Source: rcm.csv)"));
    }

    fn docx_bytes(paragraph: &str) -> Vec<u8> {
        use std::io::Write;
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>"#,
            paragraph
        );
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }
}
