//! Schema and completeness validation for canonical documents.
//!
//! - [`SchemaValidator`] checks structure and flags data quality warnings
//! - [`check_completeness`] scores a document against a template's field table

pub mod completeness;
pub mod schema;

pub use completeness::{
    CompletenessReport, KNOWN_TEMPLATES, TemplateRequirements, check_completeness, lookup,
};
pub use schema::{SchemaValidator, ValidationResult};
