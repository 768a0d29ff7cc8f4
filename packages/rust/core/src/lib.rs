//! Pipeline orchestration for the compliance data service.
//!
//! [`DataService`] ties the fetcher, consolidation engine, cache, and
//! validators into the cache-aside workflows behind the CLI and HTTP surface.

pub mod generate;
pub mod pipeline;

pub use generate::{DocumentRenderer, GeneratedDocument, build_context};
pub use pipeline::{
    CacheStatus, DataService, MISS_FORCE_REFRESH, MISS_NOT_CACHED, ProgressReporter,
    RefreshOutcome, SilentProgress, SubjectData, ValidationSummary, correlation_id,
};
