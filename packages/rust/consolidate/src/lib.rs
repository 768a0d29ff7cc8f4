//! Consolidation of raw records into the fixed-shape canonical document.
//!
//! This crate provides:
//! - [`AreaCatalog`]: versioned canonical area set and label-prefix table
//! - [`classify`] / [`resolve`]: per-record and per-area finding rules
//! - [`Consolidator`]: grouping, synthesis, header resolution, and metadata

pub mod catalog;
pub mod classify;
pub mod engine;
pub mod header;

pub use catalog::{AreaCatalog, label_prefix, normalize_key};
pub use classify::{classify, resolve};
pub use engine::{Consolidation, Consolidator, FALLBACK_DEFICIENCY_TEXT, GapKind, MappingGap};
pub use header::{HeaderBlock, KNOWN_REVIEW_TYPES, resolve_header};
