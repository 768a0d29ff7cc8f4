//! Many-to-few consolidation of raw records into the canonical document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use cortap_fetcher::RawRecord;
use cortap_shared::{
    CURRENT_SCHEMA_VERSION, CanonicalDocument, CortapError, DocumentMetadata, Finding, Result,
    ReviewArea,
};

use crate::catalog::{AreaCatalog, label_prefix};
use crate::classify::{classify, resolve};
use crate::header::resolve_header;

/// Description used when no deficient record carries comment or description text.
pub const FALLBACK_DEFICIENCY_TEXT: &str = "Deficiency found in one or more controls";

/// Why a record was left out of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// The category label has no `PREFIX :` part.
    MissingPrefix,
    /// The prefix is not in the catalog.
    UnknownPrefix,
}

/// A record excluded from consolidation because its label could not be mapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingGap {
    pub record_id: String,
    pub label: String,
    pub kind: GapKind,
}

/// Output of one consolidation run.
#[derive(Debug, Clone)]
pub struct Consolidation {
    pub document: CanonicalDocument,
    /// Records excluded for unmappable labels. Non-fatal.
    pub gaps: Vec<MappingGap>,
}

/// Consolidation engine bound to one catalog and one set of header defaults.
#[derive(Debug, Clone)]
pub struct Consolidator {
    catalog: AreaCatalog,
    header_defaults: Map<String, Value>,
}

impl Consolidator {
    pub fn new(catalog: AreaCatalog) -> Self {
        Self {
            catalog,
            header_defaults: Map::new(),
        }
    }

    /// Configured header defaults (the `[header]` table), below caller overrides.
    pub fn with_header_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.header_defaults = defaults;
        self
    }

    pub fn catalog(&self) -> &AreaCatalog {
        &self.catalog
    }

    /// Consolidate `records` into a canonical document stamped with the current time.
    pub fn consolidate(
        &self,
        subject_id: &str,
        records: &[RawRecord],
        overrides: &Map<String, Value>,
    ) -> Result<Consolidation> {
        self.consolidate_at(subject_id, records, overrides, Utc::now())
    }

    /// Consolidate with an explicit generation timestamp.
    #[instrument(skip_all, fields(subject_id = %subject_id, records = records.len()))]
    pub fn consolidate_at(
        &self,
        subject_id: &str,
        records: &[RawRecord],
        overrides: &Map<String, Value>,
        generated_at: DateTime<Utc>,
    ) -> Result<Consolidation> {
        let header_source = records.iter().find_map(|r| r.project.as_ref());
        let header = resolve_header(overrides, &self.header_defaults, header_source)
            .map_err(|e| e.with_subject(subject_id))?;

        let (groups, gaps) = self.group(records);
        let observed = groups.len();

        let mut assessments: Vec<ReviewArea> = groups
            .iter()
            .map(|(&position, group)| build_area(&self.catalog.areas()[position], group))
            .collect();

        let missing: Vec<&String> = self
            .catalog
            .areas()
            .iter()
            .enumerate()
            .filter(|(position, _)| !groups.contains_key(position))
            .map(|(_, area)| area)
            .collect();
        if !missing.is_empty() {
            debug!(synthesized = missing.len(), "synthesizing unobserved review areas");
        }
        assessments.extend(missing.into_iter().map(|area| ReviewArea::not_applicable(area)));

        if assessments.len() != self.catalog.len() {
            return Err(CortapError::validation_with(
                "DATA_TRANSFORMATION_ERROR",
                format!(
                    "consolidation produced {} review areas, catalog '{}' has {}",
                    assessments.len(),
                    self.catalog.version(),
                    self.catalog.len()
                ),
                json!({ "project_id": subject_id }),
            ));
        }

        let metadata = DocumentMetadata::from_areas(&assessments);

        info!(
            observed_areas = observed,
            review_areas = assessments.len(),
            deficiency_count = metadata.deficiency_count,
            gaps = gaps.len(),
            catalog = %self.catalog.version(),
            "consolidation completed"
        );

        let document = CanonicalDocument {
            project_id: subject_id.to_string(),
            generated_at,
            data_version: CURRENT_SCHEMA_VERSION.to_string(),
            catalog_version: self.catalog.version().to_string(),
            project: header.project,
            contractor: header.contractor,
            fta_program_manager: header.fta_program_manager,
            assessments,
            metadata,
        };

        Ok(Consolidation { document, gaps })
    }

    /// Group mapped records by catalog position; collect the unmapped ones.
    fn group<'a>(
        &self,
        records: &'a [RawRecord],
    ) -> (BTreeMap<usize, Vec<(&'a RawRecord, Finding)>>, Vec<MappingGap>) {
        let mut groups: BTreeMap<usize, Vec<(&RawRecord, Finding)>> = BTreeMap::new();
        let mut gaps = Vec::new();

        for record in records {
            let Some(prefix) = label_prefix(&record.control_name) else {
                warn!(record_id = %record.id, label = %record.control_name, "category label has no prefix, record excluded");
                gaps.push(MappingGap {
                    record_id: record.id.clone(),
                    label: record.control_name.clone(),
                    kind: GapKind::MissingPrefix,
                });
                continue;
            };

            let Some(position) = self
                .catalog
                .area_for_prefix(prefix)
                .and_then(|area| self.catalog.position(area))
            else {
                warn!(record_id = %record.id, %prefix, "unmapped category prefix, record excluded");
                gaps.push(MappingGap {
                    record_id: record.id.clone(),
                    label: record.control_name.clone(),
                    kind: GapKind::UnknownPrefix,
                });
                continue;
            };

            let finding = classify(record.status.as_deref(), record.finding_text().as_deref());
            groups.entry(position).or_default().push((record, finding));
        }

        (groups, gaps)
    }
}

/// Resolve one area from its group of classified records.
fn build_area(name: &str, group: &[(&RawRecord, Finding)]) -> ReviewArea {
    let finding = resolve(group.iter().map(|(_, f)| *f));
    debug!(area = name, records = group.len(), %finding, "resolved review area");

    if finding != Finding::Deficient {
        return ReviewArea {
            finding,
            ..ReviewArea::not_applicable(name)
        };
    }

    let deficient: Vec<&RawRecord> = group
        .iter()
        .filter(|(_, f)| *f == Finding::Deficient)
        .map(|(record, _)| *record)
        .collect();

    let lines: Vec<String> = deficient
        .iter()
        .filter_map(|record| {
            let text = record.comments.as_deref().or(record.description.as_deref())?;
            Some(format!("{}: {text}", record.control_name))
        })
        .collect();
    let description = if lines.is_empty() {
        FALLBACK_DEFICIENCY_TEXT.to_string()
    } else {
        lines.join("\n")
    };

    let remediation = deficient
        .iter()
        .map(|record| &record.remediation)
        .find(|remediation| !remediation.is_empty())
        .cloned()
        .unwrap_or_default();

    ReviewArea {
        review_area: name.to_string(),
        finding,
        deficiency_code: remediation.deficiency_code,
        description: Some(description),
        corrective_action: remediation.corrective_action,
        due_date: remediation.due_date,
        date_closed: remediation.date_closed,
    }
}
