//! Normalized raw records from the remote review-management API.
//!
//! The remote system returns two payload shapes: assessment details (with the
//! control nested under `project_control`) and project controls (with the
//! assessment nested under `assessment`). Both collapse into [`RawRecord`].

use serde_json::{Map, Value};

/// Remediation fields carried by a record, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Remediation {
    pub deficiency_code: Option<String>,
    pub corrective_action: Option<String>,
    pub due_date: Option<String>,
    pub date_closed: Option<String>,
}

impl Remediation {
    fn from_value(value: &Value) -> Self {
        Self {
            deficiency_code: text_field(value, "deficiency_code"),
            corrective_action: text_field(value, "corrective_action"),
            due_date: text_field(value, "due_date"),
            date_closed: text_field(value, "date_closed"),
        }
    }

    /// Whether any remediation field is set.
    pub fn is_empty(&self) -> bool {
        self.deficiency_code.is_none()
            && self.corrective_action.is_none()
            && self.due_date.is_none()
            && self.date_closed.is_none()
    }
}

/// One remote item (a control + assessment pair), consumed only by consolidation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    /// Remote identifier of the item.
    pub id: String,
    pub control_id: Option<String>,
    /// Free-text category label, e.g. `LEGAL : L2`.
    pub control_name: String,
    /// Coarse workflow status (`Complete`, `Not Started`, ...).
    pub status: Option<String>,
    /// Reviewer verdict text from the first assessment instance.
    pub review_status: Option<String>,
    pub comments: Option<String>,
    pub description: Option<String>,
    pub remediation: Remediation,
    /// Nested project metadata, when the payload embeds it.
    pub project: Option<Map<String, Value>>,
}

impl RawRecord {
    /// Parse an assessment-detail payload (`GET /assessments/{id}`).
    pub fn from_assessment(value: &Value) -> Result<Self, String> {
        let id = id_field(value).ok_or_else(|| "assessment payload has no id".to_string())?;
        let project_control = value.get("project_control").unwrap_or(&Value::Null);
        let control = project_control.get("control").unwrap_or(&Value::Null);

        let control_name = text_field(control, "name")
            .or_else(|| text_field(value, "control_name"))
            .or_else(|| text_field(value, "name"))
            .unwrap_or_default();

        Ok(Self {
            id,
            control_id: id_field(control),
            control_name,
            status: text_field(value, "status"),
            review_status: first_instance_review_status(value),
            comments: text_field(value, "comments"),
            description: text_field(value, "description"),
            remediation: Remediation::from_value(value),
            project: object_field(project_control, "project").or_else(|| object_field(value, "project")),
        })
    }

    /// Parse a project-control payload (`GET /projects/project_controls/{id}` item).
    pub fn from_project_control(value: &Value) -> Result<Self, String> {
        let id = id_field(value).ok_or_else(|| "project control payload has no id".to_string())?;
        let control = value.get("control").unwrap_or(&Value::Null);
        let assessment = value.get("assessment").unwrap_or(&Value::Null);

        Ok(Self {
            id,
            control_id: id_field(control),
            control_name: text_field(control, "name").unwrap_or_default(),
            status: text_field(assessment, "status").or_else(|| text_field(value, "control_status")),
            review_status: first_instance_review_status(assessment),
            comments: text_field(assessment, "comments"),
            description: text_field(assessment, "description")
                .or_else(|| text_field(control, "description")),
            remediation: Remediation::from_value(assessment),
            project: object_field(value, "project"),
        })
    }

    /// Free text scanned for finding keywords: review verdict then comments.
    pub fn finding_text(&self) -> Option<String> {
        let parts: Vec<&str> = [self.review_status.as_deref(), self.comments.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// Extract an item identifier from a list entry. Accepts numeric or string ids.
pub fn id_field(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A non-empty string (or number rendered as string) under `key`.
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn object_field(value: &Value, key: &str) -> Option<Map<String, Value>> {
    value.get(key)?.as_object().filter(|m| !m.is_empty()).cloned()
}

fn first_instance_review_status(value: &Value) -> Option<String> {
    value
        .get("instances")?
        .as_array()?
        .first()
        .and_then(|instance| text_field(instance, "review_status"))
}
