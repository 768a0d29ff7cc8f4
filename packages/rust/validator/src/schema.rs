//! Structural validation of the canonical document's JSON form.
//!
//! Hard errors make the document unusable downstream. Warnings are data
//! quality signals and never flip `valid`.

use std::collections::HashSet;

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use cortap_shared::{CanonicalDocument, Finding, ValidationConfig};

/// Outcome of schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Required top-level sections and the JSON kind each must have.
const SECTIONS: &[(&str, Kind)] = &[
    ("project_id", Kind::String),
    ("generated_at", Kind::String),
    ("data_version", Kind::String),
    ("project", Kind::Object),
    ("contractor", Kind::Object),
    ("fta_program_manager", Kind::Object),
    ("assessments", Kind::Array),
    ("metadata", Kind::Object),
];

#[derive(Debug, Clone, Copy)]
enum Kind {
    String,
    Object,
    Array,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Object => value.is_object(),
            Kind::Array => value.is_array(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Object => "object",
            Kind::Array => "array",
        }
    }
}

/// Validates canonical documents against the structural schema.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    config: ValidationConfig,
}

impl SchemaValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate a typed document through its serialized form.
    pub fn validate_document(&self, document: &CanonicalDocument) -> ValidationResult {
        match serde_json::to_value(document) {
            Ok(value) => self.validate(&value),
            Err(e) => ValidationResult {
                valid: false,
                errors: vec![format!("root: document is not serializable: {e}")],
                warnings: Vec::new(),
            },
        }
    }

    /// Validate an arbitrary JSON value.
    #[instrument(skip_all)]
    pub fn validate(&self, data: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !data.is_object() {
            errors.push("root: document must be a JSON object".to_string());
            return finish(errors, warnings);
        }

        for (section, kind) in SECTIONS {
            match data.get(section) {
                None | Some(Value::Null) => errors.push(format!("{section}: required section is missing")),
                Some(value) if !kind.matches(value) => {
                    errors.push(format!("{section}: expected {}", kind.name()))
                }
                Some(_) => {}
            }
        }

        if let Some(generated_at) = data.get("generated_at").and_then(Value::as_str) {
            if DateTime::parse_from_rfc3339(generated_at).is_err() {
                errors.push(format!(
                    "generated_at: '{generated_at}' is not an RFC 3339 timestamp"
                ));
            }
        }

        if let Some(project) = data.get("project").filter(|p| p.is_object()) {
            match project.get("region_number") {
                Some(Value::Number(n)) if n.as_u64().is_some_and(|n| n >= 1) => {}
                Some(other) => errors.push(format!(
                    "project.region_number: expected a positive integer, got {other}"
                )),
                None => errors.push("project.region_number: required field is missing".into()),
            }
        }

        if let Some(areas) = data.get("assessments").and_then(Value::as_array) {
            self.check_areas(areas, &mut errors, &mut warnings);
            if let Some(metadata) = data.get("metadata").filter(|m| m.is_object()) {
                self.check_metadata(metadata, areas, &mut warnings);
            }
        }

        finish(errors, warnings)
    }

    fn check_areas(&self, areas: &[Value], errors: &mut Vec<String>, warnings: &mut Vec<String>) {
        if areas.is_empty() {
            errors.push("assessments: array is empty, no review areas defined".into());
            return;
        }
        if areas.len() < self.config.min_review_areas {
            errors.push(format!(
                "assessments: only {} review areas (expected at least {})",
                areas.len(),
                self.config.min_review_areas
            ));
        }

        let mut seen = HashSet::new();
        for (index, area) in areas.iter().enumerate() {
            let name = area
                .get("review_area")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty());
            match name {
                Some(name) => {
                    if !seen.insert(name) {
                        warnings.push(format!("assessments: duplicate review area '{name}'"));
                    }
                }
                None => errors.push(format!("assessments.{index}.review_area: missing or empty")),
            }

            match area.get("finding").and_then(Value::as_str) {
                Some(code) if Finding::from_code(code).is_some() => {}
                Some(code) => errors.push(format!(
                    "assessments.{index}.finding: '{code}' is not one of D, ND, NA"
                )),
                None => errors.push(format!("assessments.{index}.finding: missing")),
            }
        }
    }

    fn check_metadata(&self, metadata: &Value, areas: &[Value], warnings: &mut Vec<String>) {
        let deficient = areas
            .iter()
            .filter(|a| a.get("finding").and_then(Value::as_str) == Some("D"))
            .count();

        match metadata.get("has_deficiencies").and_then(Value::as_bool) {
            None => warnings.push("metadata.has_deficiencies: missing deficiency detection flag".into()),
            Some(flag) if flag != (deficient > 0) => warnings.push(format!(
                "metadata.has_deficiencies: {flag} but {deficient} areas are deficient"
            )),
            Some(_) => {}
        }

        if let Some(count) = metadata.get("deficiency_count").and_then(Value::as_u64) {
            let count = count as usize;
            if count > self.config.deficiency_warning_threshold {
                warnings.push(format!(
                    "metadata.deficiency_count: high deficiency count ({count}), verify accuracy"
                ));
            }
            if count != deficient {
                warnings.push(format!(
                    "metadata.deficiency_count: {count} does not match {deficient} deficient areas"
                ));
            }
        }

        if let Some(total) = metadata.get("total_review_areas").and_then(Value::as_u64) {
            if total as usize != areas.len() {
                warnings.push(format!(
                    "metadata.total_review_areas: {total} does not match {} areas",
                    areas.len()
                ));
            }
        }
    }
}

fn finish(errors: Vec<String>, warnings: Vec<String>) -> ValidationResult {
    let valid = errors.is_empty();
    for error in &errors {
        warn!(%error, "schema validation error");
    }
    info!(
        valid,
        error_count = errors.len(),
        warning_count = warnings.len(),
        "schema validation complete"
    );
    ValidationResult {
        valid,
        errors,
        warnings,
    }
}
