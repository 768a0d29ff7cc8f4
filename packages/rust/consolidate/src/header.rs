//! Header block resolution: project, contractor, and program-manager fields.
//!
//! Each flat field is resolved from the first source that has it:
//! caller overrides, the first record's project metadata, configured defaults,
//! then built-in defaults.

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use cortap_shared::{ContractorHeader, CortapError, ProgramManagerHeader, ProjectHeader, Result};

/// Review types the report templates know how to render.
pub const KNOWN_REVIEW_TYPES: [&str; 3] = [
    "Triennial Review",
    "State Management Review",
    "Combined Triennial and State Management Review",
];

/// Fully resolved header block.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderBlock {
    pub project: ProjectHeader,
    pub contractor: ContractorHeader,
    pub fta_program_manager: ProgramManagerHeader,
}

/// Built-in defaults, lowest precedence.
fn builtin_defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("review_type".into(), json!("Triennial Review"));
    map.insert("site_visit_dates".into(), json!("TBD"));
    map.insert("exit_conference_format".into(), json!("virtual"));
    for key in [
        "recipient_acronym",
        "recipient_website",
        "site_visit_start_date",
        "site_visit_end_date",
        "report_date",
    ] {
        map.insert(key.into(), json!(""));
    }
    map
}

/// Flat header fields found in a record's nested project metadata.
fn from_record_project(project: &Map<String, Value>) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(id) = project.get("id").filter(|v| !v.is_null()) {
        map.insert("recipient_id".into(), id.clone());
    }
    if let Some(name) = project.get("name").filter(|v| !v.is_null()) {
        map.insert("recipient_name".into(), name.clone());
    }
    // Deployments that enrich project metadata use the flat field names directly.
    for (key, value) in project {
        if key != "id" && key != "name" && !value.is_null() {
            map.insert(key.clone(), value.clone());
        }
    }
    map
}

/// Merge the four sources into one flat field map, highest precedence last.
pub fn merge_sources(
    overrides: &Map<String, Value>,
    defaults: &Map<String, Value>,
    record_project: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut merged = builtin_defaults();
    let record = record_project.map(from_record_project).unwrap_or_default();
    for layer in [defaults, &record, overrides] {
        for (key, value) in layer {
            if !value.is_null() {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Resolve the header block, failing with a typed error naming the first missing field.
pub fn resolve_header(
    overrides: &Map<String, Value>,
    defaults: &Map<String, Value>,
    record_project: Option<&Map<String, Value>>,
) -> Result<HeaderBlock> {
    let fields = Fields(merge_sources(overrides, defaults, record_project));
    debug!(fields = fields.0.len(), "resolved header sources");

    let project = ProjectHeader {
        region_number: fields.region_number()?,
        review_type: fields.required("review_type", "MISSING_PROJECT_FIELD")?,
        recipient_name: fields.required("recipient_name", "MISSING_PROJECT_FIELD")?,
        recipient_city_state: fields.required("recipient_city_state", "MISSING_PROJECT_FIELD")?,
        recipient_id: fields.required("recipient_id", "MISSING_PROJECT_FIELD")?,
        recipient_acronym: fields.optional("recipient_acronym"),
        recipient_website: fields.optional("recipient_website"),
        site_visit_dates: fields.optional("site_visit_dates"),
        site_visit_start_date: fields.optional("site_visit_start_date"),
        site_visit_end_date: fields.optional("site_visit_end_date"),
        exit_conference_format: fields.optional("exit_conference_format"),
        report_date: fields.optional("report_date"),
    };

    if !KNOWN_REVIEW_TYPES.contains(&project.review_type.as_str()) {
        warn!(review_type = %project.review_type, "unrecognized review type");
    }

    let contractor = ContractorHeader {
        lead_reviewer_name: fields.required("lead_reviewer_name", "MISSING_CONTRACTOR_FIELD")?,
        contractor_name: fields.required("contractor_name", "MISSING_CONTRACTOR_FIELD")?,
        lead_reviewer_phone: fields.required("lead_reviewer_phone", "MISSING_CONTRACTOR_FIELD")?,
        lead_reviewer_email: fields.required("lead_reviewer_email", "MISSING_CONTRACTOR_FIELD")?,
        team_members: fields.list("team_members"),
    };

    let pm = "MISSING_PROGRAM_MANAGER_FIELD";
    let fta_program_manager = ProgramManagerHeader {
        name: fields.required("fta_program_manager_name", pm)?,
        title: fields.required("fta_program_manager_title", pm)?,
        phone: fields.required("fta_program_manager_phone", pm)?,
        email: fields.required("fta_program_manager_email", pm)?,
    };

    Ok(HeaderBlock {
        project,
        contractor,
        fta_program_manager,
    })
}

struct Fields(Map<String, Value>);

impl Fields {
    fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn required(&self, key: &str, code: &str) -> Result<String> {
        self.text(key).ok_or_else(|| {
            CortapError::validation_with(
                code,
                format!("missing required header field: {key}"),
                json!({ "missing_field": key }),
            )
        })
    }

    fn optional(&self, key: &str) -> String {
        self.text(key).unwrap_or_default()
    }

    fn list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn region_number(&self) -> Result<u32> {
        let invalid = |raw: &Value| {
            CortapError::validation_with(
                "INVALID_PROJECT_FIELD",
                format!("region_number must be a positive integer, got {raw}"),
                json!({ "field": "region_number", "value": raw }),
            )
        };
        let Some(raw) = self.0.get("region_number").filter(|v| !v.is_null()) else {
            return Err(CortapError::validation_with(
                "MISSING_PROJECT_FIELD",
                "missing required header field: region_number",
                json!({ "missing_field": "region_number" }),
            ));
        };
        match raw {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| invalid(raw)),
            Value::String(s) => s.trim().parse().map_err(|_| invalid(raw)),
            _ => Err(invalid(raw)),
        }
    }
}
