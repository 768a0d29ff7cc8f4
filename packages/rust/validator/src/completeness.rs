//! Per-template field completeness and data quality scoring.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

/// Template identifiers with their own requirement tables.
pub const KNOWN_TEMPLATES: &[&str] = &["draft-audit-report", "recipient-information-request"];

const COMMON_CRITICAL: &[&str] = &[
    "project.region_number",
    "project.review_type",
    "project.recipient_name",
    "project.recipient_acronym",
    "project.recipient_city_state",
    "project.report_date",
    "contractor.contractor_name",
    "fta_program_manager.name",
    "assessments",
    "metadata.has_deficiencies",
];

const COMMON_OPTIONAL: &[&str] = &[
    "project.recipient_website",
    "project.site_visit_dates",
    "project.exit_conference_format",
    "fta_program_manager.title",
    "fta_program_manager.email",
];

const DRAFT_AUDIT_CRITICAL: &[&str] = &["project.exit_conference_format", "metadata.deficiency_count"];
const DRAFT_AUDIT_OPTIONAL: &[&str] = &["contractor.team_members"];

/// Field requirements for one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRequirements {
    pub critical: Vec<&'static str>,
    pub optional: Vec<&'static str>,
}

impl TemplateRequirements {
    /// Requirements for `template_id`; unknown ids get the common set.
    pub fn for_template(template_id: &str) -> Self {
        let (extra_critical, extra_optional): (&[&str], &[&str]) = match template_id {
            "draft-audit-report" => (DRAFT_AUDIT_CRITICAL, DRAFT_AUDIT_OPTIONAL),
            "recipient-information-request" => (&[], &[]),
            other => {
                warn!(template_id = other, "unknown template, using common requirements");
                (&[], &[])
            }
        };

        let critical: Vec<&'static str> = COMMON_CRITICAL
            .iter()
            .chain(extra_critical)
            .copied()
            .collect();
        // A path promoted to critical is only counted once.
        let optional = COMMON_OPTIONAL
            .iter()
            .chain(extra_optional)
            .copied()
            .filter(|path| !critical.contains(path))
            .collect();

        Self { critical, optional }
    }

    pub fn total(&self) -> usize {
        self.critical.len() + self.optional.len()
    }
}

/// Result of checking a document against a template's field requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
    pub template_id: String,
    pub missing_critical_fields: Vec<String>,
    pub missing_optional_fields: Vec<String>,
    /// `floor(100 * present / checked)`.
    pub data_quality_score: u8,
    /// True when no critical field is missing.
    pub can_generate: bool,
}

/// Check which template fields are present and non-empty in `data`.
#[instrument(skip_all, fields(template_id = %template_id))]
pub fn check_completeness(data: &Value, template_id: &str) -> CompletenessReport {
    let requirements = TemplateRequirements::for_template(template_id);

    let missing_critical_fields = missing_fields(data, &requirements.critical);
    let missing_optional_fields = missing_fields(data, &requirements.optional);

    let total = requirements.total();
    let absent = missing_critical_fields.len() + missing_optional_fields.len();
    let data_quality_score = if total == 0 {
        100
    } else {
        (100 * (total - absent) / total) as u8
    };
    let can_generate = missing_critical_fields.is_empty();

    info!(
        data_quality_score,
        can_generate,
        missing_critical = missing_critical_fields.len(),
        missing_optional = missing_optional_fields.len(),
        "completeness check complete"
    );

    CompletenessReport {
        template_id: template_id.to_string(),
        missing_critical_fields,
        missing_optional_fields,
        data_quality_score,
        can_generate,
    }
}

/// Walk a dotted path through nested objects.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(data, |current, segment| current.as_object()?.get(segment))
}

fn missing_fields(data: &Value, paths: &[&str]) -> Vec<String> {
    paths
        .iter()
        .filter(|path| !field_present(data, path))
        .map(|path| path.to_string())
        .collect()
}

fn field_present(data: &Value, path: &str) -> bool {
    match lookup(data, path) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete() -> Value {
        json!({
            "project": {
                "region_number": 4,
                "review_type": "Triennial Review",
                "recipient_name": "Metro Transit Authority",
                "recipient_acronym": "MTA",
                "recipient_city_state": "Springfield, IL",
                "report_date": "2026-03-31",
                "recipient_website": "https://mta.example.gov",
                "site_visit_dates": "March 3-5, 2026",
                "exit_conference_format": "virtual",
            },
            "contractor": {
                "contractor_name": "Review Partners",
                "team_members": ["A. Reviewer"],
            },
            "fta_program_manager": {
                "name": "Sam Ortiz",
                "title": "General Engineer",
                "email": "sam@example.gov",
            },
            "assessments": [{ "review_area": "Legal", "finding": "ND" }],
            "metadata": { "has_deficiencies": false, "deficiency_count": 0 },
        })
    }

    #[test]
    fn complete_document_scores_100() {
        for template in KNOWN_TEMPLATES {
            let report = check_completeness(&complete(), template);
            assert_eq!(report.data_quality_score, 100, "{template}");
            assert!(report.can_generate);
            assert!(report.missing_critical_fields.is_empty());
            assert!(report.missing_optional_fields.is_empty());
        }
    }

    #[test]
    fn false_and_zero_count_as_present() {
        let report = check_completeness(&complete(), "draft-audit-report");
        assert!(!report.missing_critical_fields.contains(&"metadata.has_deficiencies".to_string()));
        assert!(!report.missing_critical_fields.contains(&"metadata.deficiency_count".to_string()));
    }

    #[test]
    fn missing_fields_lower_score_and_block_generation() {
        let mut doc = complete();
        doc["project"]["recipient_acronym"] = json!("");
        doc["project"]["recipient_website"] = Value::Null;
        doc["contractor"]["team_members"] = json!([]);

        // 12 critical + 5 optional (exit_conference_format moved to critical).
        let requirements = TemplateRequirements::for_template("draft-audit-report");
        assert_eq!(requirements.total(), 17);

        let report = check_completeness(&doc, "draft-audit-report");
        assert_eq!(report.missing_critical_fields, vec!["project.recipient_acronym"]);
        assert_eq!(
            report.missing_optional_fields,
            vec!["project.recipient_website", "contractor.team_members"]
        );
        assert_eq!(report.data_quality_score, (100 * 14 / 17) as u8);
        assert!(!report.can_generate);
    }

    #[test]
    fn optional_gaps_still_generate() {
        let mut doc = complete();
        doc["fta_program_manager"]["title"] = json!("   ");
        let report = check_completeness(&doc, "recipient-information-request");
        assert!(report.can_generate);
        assert_eq!(report.missing_optional_fields, vec!["fta_program_manager.title"]);
        assert_eq!(report.data_quality_score, (100 * 14 / 15) as u8);
    }

    #[test]
    fn unknown_template_uses_common_set() {
        let report = check_completeness(&complete(), "no-such-template");
        assert_eq!(report.template_id, "no-such-template");
        assert!(report.can_generate);
        assert_eq!(
            TemplateRequirements::for_template("no-such-template").total(),
            COMMON_CRITICAL.len() + COMMON_OPTIONAL.len()
        );
    }

    #[test]
    fn missing_section_marks_every_nested_path() {
        let mut doc = complete();
        doc.as_object_mut().unwrap().remove("project");
        let report = check_completeness(&doc, "recipient-information-request");
        assert_eq!(report.missing_critical_fields.len(), 6);
        assert_eq!(report.missing_optional_fields.len(), 3);
        assert!(!report.can_generate);
    }

    #[test]
    fn lookup_walks_objects_only() {
        let doc = json!({ "a": { "b": [1, 2] } });
        assert_eq!(lookup(&doc, "a.b"), Some(&json!([1, 2])));
        assert_eq!(lookup(&doc, "a.b.0"), None);
        assert_eq!(lookup(&doc, "a.c"), None);
    }
}
