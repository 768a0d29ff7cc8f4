//! Document generation: completeness gate, render, archive.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use cortap_shared::{CanonicalDocument, CortapError, Finding, Result};
use cortap_storage::ArchivedDocument;
use cortap_validator::{CompletenessReport, check_completeness};

use crate::pipeline::{DataService, correlation_id as new_correlation_id};

/// Turns a context map into a binary document.
///
/// Implementations report missing context keys and template syntax problems
/// as [`CortapError::Render`].
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, template_id: &str, context: &Map<String, Value>) -> Result<Vec<u8>>;
}

/// A rendered and archived document.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedDocument {
    pub project_id: String,
    pub template_id: String,
    #[serde(flatten)]
    pub archived: ArchivedDocument,
    pub completeness: CompletenessReport,
    pub correlation_id: String,
}

/// Template context: the document's fields plus generation extras.
pub fn build_context(document: &CanonicalDocument, template_id: &str) -> Result<Map<String, Value>> {
    let mut context = match serde_json::to_value(document) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            return Err(CortapError::validation("DATA_TRANSFORMATION_ERROR", e.to_string())
                .with_subject(&document.project_id));
        }
    };

    let deficient: Vec<Value> = document
        .assessments
        .iter()
        .filter(|area| area.finding == Finding::Deficient)
        .map(|area| json!(area))
        .collect();

    context.insert("template_id".into(), json!(template_id));
    context.insert("generated_at".into(), json!(Utc::now().to_rfc3339()));
    context.insert("deficient_areas".into(), Value::Array(deficient));
    Ok(context)
}

impl DataService {
    /// Render `template_id` for a subject and archive the result.
    ///
    /// Fails with `INCOMPLETE_DATA` when a critical template field is missing.
    #[instrument(skip_all, fields(subject_id = %subject_id, template_id = %template_id))]
    pub async fn generate_document(
        &self,
        subject_id: &str,
        template_id: &str,
        renderer: &dyn DocumentRenderer,
        correlation_id: Option<&str>,
    ) -> Result<GeneratedDocument> {
        let correlation_id = new_correlation_id("generate", correlation_id);
        let data = self
            .get_subject_data(subject_id, &Map::new(), false, Some(&correlation_id))
            .await?;

        let context = build_context(&data.document, template_id)?;
        let completeness = check_completeness(&Value::Object(context.clone()), template_id);
        if !completeness.can_generate {
            return Err(CortapError::validation_with(
                "INCOMPLETE_DATA",
                format!(
                    "cannot generate {template_id}: {} critical fields missing",
                    completeness.missing_critical_fields.len()
                ),
                json!({
                    "template_id": template_id,
                    "missing_critical_fields": completeness.missing_critical_fields,
                    "correlation_id": correlation_id,
                }),
            )
            .with_subject(subject_id));
        }

        let bytes = renderer.render(template_id, &context).await?;
        let archived = self.archive().store(subject_id, template_id, bytes).await?;

        info!(
            %correlation_id,
            key = %archived.key,
            size_bytes = archived.size_bytes,
            data_quality_score = completeness.data_quality_score,
            "document generated"
        );
        Ok(GeneratedDocument {
            project_id: subject_id.to_string(),
            template_id: template_id.to_string(),
            archived,
            completeness,
            correlation_id,
        })
    }
}
