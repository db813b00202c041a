//! Shapes of the JSON the model is asked to return. Every field is optional
//! on the wire; missing values fall back to their defaults.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// The first fenced block of a reply (```` ```json ```` preferred), or the whole reply.
pub fn extract_json_block(text: &str) -> &str {
    let fenced = |marker: &str| {
        text.find(marker).map(|start| {
            let body = &text[start + marker.len()..];
            let end = body.find("```").unwrap_or(body.len());
            body[..end].trim()
        })
    };
    fenced("```json")
        .or_else(|| fenced("```"))
        .unwrap_or_else(|| text.trim())
}

pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json_block(text))
}

/// Reads "Yes"/"No", booleans and 0/1 as a flag.
pub fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Some(true),
            "no" | "n" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ObjectiveGapReply {
    pub objective: String,
    pub has_gap: Value,
    pub proposed_solution: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DepartmentAnalysisReply {
    pub overall_risk_level: String,
    pub key_risks: Vec<String>,
    pub risk_types: HashMap<String, Vec<String>>,
    pub summary: String,
    pub control_gaps: Vec<ObjectiveGapReply>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RecommendationReply {
    pub department: String,
    pub title: String,
    pub priority: String,
    pub description: String,
    pub impact: String,
    pub complexity: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DepartmentGapReply {
    pub gap_title: String,
    pub impact: String,
    pub recommendation: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReviewedDepartment {
    pub name: String,
    pub overall_risk_level: String,
    pub key_risks: Vec<String>,
    pub risk_analysis: HashMap<String, Vec<String>>,
    pub control_gaps: Vec<DepartmentGapReply>,
    pub summary: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ComprehensiveReply {
    pub departments: Vec<ReviewedDepartment>,
    pub overall_recommendations: Vec<RecommendationReply>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExtractedObjective {
    pub department: String,
    pub objective: String,
    pub what_can_go_wrong: String,
    pub risk_level: String,
    pub control_activities: String,
    pub is_gap: Value,
    pub gap_details: String,
    pub proposed_control: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExtractedGap {
    pub department: String,
    pub control_objective: String,
    pub gap_title: String,
    pub description: String,
    pub risk_impact: String,
    pub proposed_solution: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExtractedDepartmentRisk {
    pub overall_risk_level: String,
    pub risk_categories: HashMap<String, Value>,
    pub key_risks: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionReply {
    pub departments: Vec<String>,
    pub control_objectives: Vec<ExtractedObjective>,
    pub gaps: Vec<ExtractedGap>,
    pub department_risks: HashMap<String, ExtractedDepartmentRisk>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_block() {
        assert_eq!(extract_json_block("```json\n{\"a\": 1}\n```\nThanks"), "{\"a\": 1}");
        assert_eq!(extract_json_block("Here:\n```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(extract_json_block("  {\"a\": 1}  "), "{\"a\": 1}");
        assert_eq!(extract_json_block("```json\n{\"open\": true}"), "{\"open\": true}");
    }

    #[test]
    fn test_truthy() {
        assert_eq!(truthy(&json!("Yes")), Some(true));
        assert_eq!(truthy(&json!("no")), Some(false));
        assert_eq!(truthy(&json!(true)), Some(true));
        assert_eq!(truthy(&json!(0)), Some(false));
        assert_eq!(truthy(&json!("maybe")), None);
        assert_eq!(truthy(&Value::Null), None);
    }

    #[test]
    fn test_one_or_many() {
        let one: OneOrMany<RecommendationReply> = parse_reply(r#"{"title": "Single"}"#).unwrap();
        assert_eq!(one.into_vec().len(), 1);
        let many: OneOrMany<RecommendationReply> =
            parse_reply(r#"```json
[{"title": "A"}, {"title": "B", "priority": "High"}]
```"#)
            .unwrap();
        let many = many.into_vec();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].priority, "High");
    }

    #[test]
    fn test_department_reply_tolerates_missing_fields() {
        let reply: DepartmentAnalysisReply = parse_reply(
            r#"{"overall_risk_level": "High", "control_gaps": [{"objective": "Salary accuracy", "has_gap": "Yes"}]}"#,
        )
        .unwrap();
        assert_eq!(reply.overall_risk_level, "High");
        assert!(reply.key_risks.is_empty());
        assert_eq!(truthy(&reply.control_gaps[0].has_gap), Some(true));
        assert!(reply.control_gaps[0].proposed_solution.is_empty());
    }

    #[test]
    fn test_malformed_reply_is_an_error() {
        assert!(parse_reply::<ComprehensiveReply>("I could not analyze this file.").is_err());
    }
}
