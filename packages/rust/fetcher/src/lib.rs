//! Remote record fetching for the compliance data service.
//!
//! This crate provides:
//! - [`RemoteClient`]: authenticated, retrying client for the review-management API
//! - [`RecordSource`]: the seam the pipeline fetches through
//! - [`RawRecord`]: one normalized control + assessment pair

pub mod client;
pub mod record;

pub use client::{CORRELATION_HEADER, FetchSummary, RecordSource, RemoteClient};
pub use record::{RawRecord, Remediation};
