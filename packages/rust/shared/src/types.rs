//! Canonical data model shared by every stage of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for the canonical document format.
pub const CURRENT_SCHEMA_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// Tri-state compliance outcome for a review area or a single raw record.
///
/// Variant order is the resolution order: `NotApplicable < NonDeficient < Deficient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Finding {
    #[serde(rename = "NA")]
    NotApplicable,
    #[serde(rename = "ND")]
    NonDeficient,
    #[serde(rename = "D")]
    Deficient,
}

impl Finding {
    /// Short code used in documents and templates.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Deficient => "D",
            Self::NonDeficient => "ND",
            Self::NotApplicable => "NA",
        }
    }

    /// Parse a short code (`D`, `ND`, `NA`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "D" => Some(Self::Deficient),
            "ND" => Some(Self::NonDeficient),
            "NA" => Some(Self::NotApplicable),
            _ => None,
        }
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// ReviewArea
// ---------------------------------------------------------------------------

/// One canonical review area with its resolved finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewArea {
    /// Canonical area name (one of the catalog's area set).
    pub review_area: String,
    /// Resolved finding for the whole area.
    pub finding: Finding,
    /// Deficiency code, when the remote system supplied one.
    #[serde(default)]
    pub deficiency_code: Option<String>,
    /// Aggregated deficiency text; present only when `finding` is `D`.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub corrective_action: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub date_closed: Option<String>,
}

impl ReviewArea {
    /// A synthesized area for which no records were observed.
    pub fn not_applicable(name: impl Into<String>) -> Self {
        Self {
            review_area: name.into(),
            finding: Finding::NotApplicable,
            deficiency_code: None,
            description: None,
            corrective_action: None,
            due_date: None,
            date_closed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Header block
// ---------------------------------------------------------------------------

/// Subject (recipient) metadata and review configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectHeader {
    pub region_number: u32,
    pub review_type: String,
    pub recipient_name: String,
    pub recipient_city_state: String,
    pub recipient_id: String,
    #[serde(default)]
    pub recipient_acronym: String,
    #[serde(default)]
    pub recipient_website: String,
    #[serde(default)]
    pub site_visit_dates: String,
    #[serde(default)]
    pub site_visit_start_date: String,
    #[serde(default)]
    pub site_visit_end_date: String,
    #[serde(default)]
    pub exit_conference_format: String,
    #[serde(default)]
    pub report_date: String,
}

/// Contractor / lead reviewer metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractorHeader {
    pub lead_reviewer_name: String,
    pub contractor_name: String,
    pub lead_reviewer_phone: String,
    pub lead_reviewer_email: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub team_members: Vec<String>,
}

/// Program manager assigned to the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramManagerHeader {
    pub name: String,
    pub title: String,
    pub phone: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// CanonicalDocument
// ---------------------------------------------------------------------------

/// Derived summary over the final review-area collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub has_deficiencies: bool,
    pub deficiency_count: usize,
    /// Deficient area names, in document order.
    pub deficiency_areas: Vec<String>,
    pub total_review_areas: usize,
}

impl DocumentMetadata {
    /// Compute the metadata block from a set of review areas.
    pub fn from_areas(areas: &[ReviewArea]) -> Self {
        let deficiency_areas: Vec<String> = areas
            .iter()
            .filter(|a| a.finding == Finding::Deficient)
            .map(|a| a.review_area.clone())
            .collect();

        Self {
            has_deficiencies: !deficiency_areas.is_empty(),
            deficiency_count: deficiency_areas.len(),
            deficiency_areas,
            total_review_areas: areas.len(),
        }
    }
}

/// The fixed-shape consolidated output of the pipeline.
///
/// Immutable once produced; a later fetch-and-consolidate cycle supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Subject (project) identifier in the remote system.
    pub project_id: String,
    pub generated_at: DateTime<Utc>,
    /// Canonical document schema version.
    pub data_version: String,
    /// Version of the area catalog used to consolidate.
    pub catalog_version: String,
    pub project: ProjectHeader,
    pub contractor: ContractorHeader,
    pub fta_program_manager: ProgramManagerHeader,
    /// Exactly one entry per catalog area.
    pub assessments: Vec<ReviewArea>,
    pub metadata: DocumentMetadata,
}

impl CanonicalDocument {
    /// Look up a review area by canonical name.
    pub fn area(&self, name: &str) -> Option<&ReviewArea> {
        self.assessments.iter().find(|a| a.review_area == name)
    }
}
