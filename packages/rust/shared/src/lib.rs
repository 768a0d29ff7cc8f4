//! Shared types, error model, and configuration for the compliance data service.
//!
//! This crate is the foundation depended on by all other crates.
//! It provides:
//! - [`CortapError`]: the unified error type
//! - The canonical data model ([`CanonicalDocument`], [`ReviewArea`], [`Finding`])
//! - Configuration ([`AppConfig`], [`RemoteConfig`], [`CacheConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheBackendKind, CacheConfig, CacheSection, CatalogSection, RecordSourceKind,
    RemoteConfig, RemoteSection, ServerSection, ValidationConfig, ValidationSection, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, resolve_secret,
};
pub use error::{CortapError, Result};
pub use types::{
    CURRENT_SCHEMA_VERSION, CanonicalDocument, ContractorHeader, DocumentMetadata, Finding,
    ProgramManagerHeader, ProjectHeader, ReviewArea,
};
