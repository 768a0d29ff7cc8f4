//! Cache-aside orchestration: cache → fetch → consolidate → cache.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use cortap_consolidate::{Consolidator, MappingGap};
use cortap_fetcher::{FetchSummary, RecordSource};
use cortap_shared::{CanonicalDocument, CortapError, Result};
use cortap_storage::{CacheStore, DocumentArchive};
use cortap_validator::{
    CompletenessReport, SchemaValidator, ValidationResult, check_completeness,
};

/// Miss reason when the caller bypassed the cache.
pub const MISS_FORCE_REFRESH: &str = "force_refresh";
/// Miss reason when nothing live was cached.
pub const MISS_NOT_CACHED: &str = "cache_miss_or_expired";

/// Correlation id for an operation: the caller's, or `{op}-{uuid}`.
pub fn correlation_id(operation: &str, supplied: Option<&str>) -> String {
    match supplied.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => format!("{operation}-{}", Uuid::now_v7()),
    }
}

/// How the returned document relates to the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miss_reason: Option<&'static str>,
}

/// A subject's canonical document plus cache metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectData {
    pub document: CanonicalDocument,
    pub cache: CacheStatus,
    pub correlation_id: String,
}

/// Result of an invalidate-then-refetch cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub document: CanonicalDocument,
    /// Whether a cached entry existed before the refresh.
    pub invalidated: bool,
    pub records_fetched: usize,
    /// Records left out because their category label could not be mapped.
    pub unmapped_records: usize,
    pub review_areas: usize,
    pub correlation_id: String,
}

/// Schema and completeness results for one subject and template.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub project_id: String,
    pub schema: ValidationResult,
    pub completeness: CompletenessReport,
    pub correlation_id: String,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the remote fetch finishes.
    fn fetched(&self, summary: &FetchSummary);
    /// Called when a document is ready, fresh or cached.
    fn done(&self, document: &CanonicalDocument, cached: bool);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn fetched(&self, _summary: &FetchSummary) {}
    fn done(&self, _document: &CanonicalDocument, _cached: bool) {}
}

/// A freshly built document with what went into it.
struct Rebuilt {
    document: CanonicalDocument,
    summary: FetchSummary,
    gaps: Vec<MappingGap>,
}

/// The orchestrator. Construct once and share; every collaborator is injected.
#[derive(Clone)]
pub struct DataService {
    source: Arc<dyn RecordSource>,
    consolidator: Consolidator,
    cache: CacheStore,
    validator: SchemaValidator,
    archive: DocumentArchive,
    progress: Arc<dyn ProgressReporter>,
}

impl DataService {
    pub fn new(
        source: Arc<dyn RecordSource>,
        consolidator: Consolidator,
        cache: CacheStore,
        validator: SchemaValidator,
    ) -> Self {
        let archive = DocumentArchive::new(cache.blob_store(), cache.config().presign_ttl);
        Self {
            source,
            consolidator,
            cache,
            validator,
            archive,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn consolidator(&self) -> &Consolidator {
        &self.consolidator
    }

    pub(crate) fn archive(&self) -> &DocumentArchive {
        &self.archive
    }

    /// Return the subject's document from cache, or fetch and consolidate it.
    ///
    /// `overrides` only shape freshly built documents; a cache hit is returned as stored.
    #[instrument(skip_all, fields(subject_id = %subject_id, force_refresh, correlation_id = tracing::field::Empty))]
    pub async fn get_subject_data(
        &self,
        subject_id: &str,
        overrides: &Map<String, Value>,
        force_refresh: bool,
        correlation_id: Option<&str>,
    ) -> Result<SubjectData> {
        let correlation_id = correlation_id_for("get", correlation_id);

        if !force_refresh {
            self.progress.phase("Checking cache");
            if let Some(hit) = self.cache.get(subject_id).await {
                info!(
                    %correlation_id,
                    cache_age_seconds = hit.cache_age_seconds,
                    "returning cached document"
                );
                self.progress.done(&hit.document, true);
                return Ok(SubjectData {
                    document: hit.document,
                    cache: CacheStatus {
                        cached: true,
                        cache_age_seconds: Some(hit.cache_age_seconds),
                        expires_at: Some(hit.expires_at),
                        miss_reason: None,
                    },
                    correlation_id,
                });
            }
        }

        let rebuilt = self.rebuild(subject_id, overrides, &correlation_id).await?;
        let expires_at = self.store(subject_id, &rebuilt.document, &correlation_id).await;
        self.progress.done(&rebuilt.document, false);

        Ok(SubjectData {
            document: rebuilt.document,
            cache: CacheStatus {
                cached: false,
                cache_age_seconds: None,
                expires_at,
                miss_reason: Some(if force_refresh {
                    MISS_FORCE_REFRESH
                } else {
                    MISS_NOT_CACHED
                }),
            },
            correlation_id,
        })
    }

    /// Drop any cached entry, then fetch and consolidate from scratch.
    #[instrument(skip_all, fields(subject_id = %subject_id, correlation_id = tracing::field::Empty))]
    pub async fn refresh(
        &self,
        subject_id: &str,
        correlation_id: Option<&str>,
    ) -> Result<RefreshOutcome> {
        let correlation_id = correlation_id_for("refresh", correlation_id);

        self.progress.phase("Invalidating cache");
        let invalidated = self.cache.invalidate(subject_id).await;

        let rebuilt = self.rebuild(subject_id, &Map::new(), &correlation_id).await?;
        self.store(subject_id, &rebuilt.document, &correlation_id).await;
        self.progress.done(&rebuilt.document, false);

        info!(
            %correlation_id,
            invalidated,
            records_fetched = rebuilt.summary.fetched,
            "subject refreshed"
        );
        Ok(RefreshOutcome {
            records_fetched: rebuilt.summary.fetched,
            unmapped_records: rebuilt.gaps.len(),
            review_areas: rebuilt.document.assessments.len(),
            document: rebuilt.document,
            invalidated,
            correlation_id,
        })
    }

    /// Delete the cached entry. Returns whether one existed.
    #[instrument(skip_all, fields(subject_id = %subject_id, correlation_id = tracing::field::Empty))]
    pub async fn invalidate(&self, subject_id: &str, correlation_id: Option<&str>) -> bool {
        let correlation_id = correlation_id_for("invalidate", correlation_id);
        let deleted = self.cache.invalidate(subject_id).await;
        info!(%correlation_id, deleted, "cache invalidation requested");
        deleted
    }

    /// Validate the subject's document and score it against `template_id`.
    #[instrument(skip_all, fields(
        subject_id = %subject_id,
        template_id = %template_id,
        correlation_id = tracing::field::Empty,
    ))]
    pub async fn check(
        &self,
        subject_id: &str,
        template_id: &str,
        correlation_id: Option<&str>,
    ) -> Result<ValidationSummary> {
        let correlation_id = correlation_id_for("validate", correlation_id);
        let data = self
            .get_subject_data(subject_id, &Map::new(), false, Some(&correlation_id))
            .await?;

        self.progress.phase("Validating");
        let value = serde_json::to_value(&data.document).map_err(|e| {
            CortapError::validation("DATA_TRANSFORMATION_ERROR", e.to_string())
                .with_subject(subject_id)
        })?;
        let schema = self.validator.validate(&value);
        let completeness = check_completeness(&value, template_id);

        Ok(ValidationSummary {
            project_id: subject_id.to_string(),
            schema,
            completeness,
            correlation_id,
        })
    }

    /// Fetch and consolidate. Fetch and consolidation errors are terminal.
    async fn rebuild(
        &self,
        subject_id: &str,
        overrides: &Map<String, Value>,
        correlation_id: &str,
    ) -> Result<Rebuilt> {
        let start = Instant::now();

        self.progress.phase("Fetching records");
        let (summary, records) = self
            .source
            .fetch_all(subject_id, correlation_id)
            .await
            .map_err(|e| e.with_subject(subject_id))?;
        self.progress.fetched(&summary);
        for (item_id, reason) in &summary.failures {
            warn!(%correlation_id, %item_id, %reason, "record skipped after fetch failure");
        }

        self.progress.phase("Consolidating");
        let consolidation = self
            .consolidator
            .consolidate(subject_id, &records, overrides)?;

        let document = consolidation.document;
        info!(
            %correlation_id,
            records = records.len(),
            gaps = consolidation.gaps.len(),
            review_areas = document.assessments.len(),
            deficiencies = document.metadata.deficiency_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "document rebuilt"
        );

        Ok(Rebuilt {
            document,
            summary,
            gaps: consolidation.gaps,
        })
    }

    /// Write through to the cache; failures are logged, never returned.
    async fn store(
        &self,
        subject_id: &str,
        document: &CanonicalDocument,
        correlation_id: &str,
    ) -> Option<DateTime<Utc>> {
        self.progress.phase("Caching document");
        match self.cache.put(subject_id, document).await {
            Ok(entry) => Some(entry.expires_at),
            Err(e) => {
                warn!(%correlation_id, error = %e, "failed to cache document, continuing");
                None
            }
        }
    }
}

fn correlation_id_for(operation: &str, supplied: Option<&str>) -> String {
    let id = correlation_id(operation, supplied);
    tracing::Span::current().record("correlation_id", id.as_str());
    id
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use cortap_consolidate::AreaCatalog;
    use cortap_fetcher::RawRecord;
    use cortap_shared::{CacheConfig, Finding, ValidationConfig};
    use cortap_storage::{BlobStore, MemoryBlobStore};
    use serde_json::json;

    /// Record source serving a fixed record set and counting calls.
    pub(crate) struct FakeSource {
        records: Mutex<Vec<RawRecord>>,
        fail: bool,
        pub(crate) calls: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn new(records: Vec<RawRecord>) -> Self {
            Self {
                records: Mutex::new(records),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Vec::new())
            }
        }

        fn replace(&self, records: Vec<RawRecord>) {
            *self.records.lock().unwrap() = records;
        }
    }

    #[async_trait]
    impl RecordSource for FakeSource {
        async fn fetch_all(
            &self,
            _subject_id: &str,
            _correlation_id: &str,
        ) -> Result<(FetchSummary, Vec<RawRecord>)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CortapError::remote(
                    "REMOTE_CONNECTION_ERROR",
                    "connection refused",
                    json!({}),
                ));
            }
            let records = self.records.lock().unwrap().clone();
            let summary = FetchSummary {
                listed: records.len(),
                fetched: records.len(),
                ..FetchSummary::default()
            };
            Ok((summary, records))
        }
    }

    fn project() -> Map<String, Value> {
        json!({
            "id": "33",
            "name": "Metro Transit Authority",
            "region_number": 4,
            "recipient_city_state": "Springfield, IL",
            "recipient_acronym": "MTA",
            "report_date": "2026-03-31",
            "lead_reviewer_name": "Jordan Lee",
            "contractor_name": "Review Partners",
            "lead_reviewer_phone": "555-0100",
            "lead_reviewer_email": "jordan@example.com",
            "fta_program_manager_name": "Sam Ortiz",
            "fta_program_manager_title": "General Engineer",
            "fta_program_manager_phone": "555-0199",
            "fta_program_manager_email": "sam@example.gov",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    pub(crate) fn record(id: &str, label: &str, comments: &str) -> RawRecord {
        RawRecord {
            id: id.into(),
            control_name: label.into(),
            status: Some("Complete".into()),
            comments: Some(comments.into()),
            project: Some(project()),
            ..RawRecord::default()
        }
    }

    pub(crate) fn catalog() -> AreaCatalog {
        AreaCatalog::new(
            "test",
            vec!["Legal".into(), "Procurement".into(), "Title VI".into()],
            [("LEGAL", "Legal"), ("PROCUREMENT", "Procurement"), ("TITLE VI", "Title VI")],
        )
        .unwrap()
    }

    pub(crate) fn service_with(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn BlobStore>,
    ) -> DataService {
        let cache = CacheStore::new(
            store,
            CacheConfig {
                ttl: Duration::from_secs(3600),
                namespace: "data".into(),
                presign_ttl: Duration::from_secs(60),
            },
        );
        DataService::new(
            source,
            Consolidator::new(catalog()),
            cache,
            SchemaValidator::new(ValidationConfig {
                min_review_areas: 3,
                deficiency_warning_threshold: 10,
            }),
        )
    }

    fn clean_records() -> Vec<RawRecord> {
        vec![
            record("1", "LEGAL : L1", "All good"),
            record("2", "LEGAL : L2", "Reviewed"),
            record("3", "PROCUREMENT : P1", "Policy in place"),
        ]
    }

    #[test]
    fn correlation_ids() {
        assert_eq!(correlation_id("get", Some("abc")), "abc");
        assert!(correlation_id("get", Some("  ")).starts_with("get-"));
        assert!(correlation_id("refresh", None).starts_with("refresh-"));
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let source = Arc::new(FakeSource::new(clean_records()));
        let service = service_with(source.clone(), Arc::new(MemoryBlobStore::default()));

        let first = service
            .get_subject_data("33", &Map::new(), false, Some("req-1"))
            .await
            .unwrap();
        assert!(!first.cache.cached);
        assert_eq!(first.cache.miss_reason, Some(MISS_NOT_CACHED));
        assert!(first.cache.expires_at.is_some());
        assert_eq!(first.correlation_id, "req-1");
        assert_eq!(first.document.area("Legal").unwrap().finding, Finding::NonDeficient);
        assert_eq!(first.document.area("Title VI").unwrap().finding, Finding::NotApplicable);
        assert_eq!(first.document.metadata.deficiency_count, 0);

        let second = service
            .get_subject_data("33", &Map::new(), false, None)
            .await
            .unwrap();
        assert!(second.cache.cached);
        assert!(second.cache.cache_age_seconds.is_some());
        assert_eq!(second.document, first.document);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let source = Arc::new(FakeSource::new(clean_records()));
        let service = service_with(source.clone(), Arc::new(MemoryBlobStore::default()));

        service.get_subject_data("33", &Map::new(), false, None).await.unwrap();
        source.replace(vec![record("4", "LEGAL : L3", "Failed compliance check")]);

        let data = service
            .get_subject_data("33", &Map::new(), true, None)
            .await
            .unwrap();
        assert_eq!(data.cache.miss_reason, Some(MISS_FORCE_REFRESH));
        assert_eq!(data.document.area("Legal").unwrap().finding, Finding::Deficient);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let cached = service
            .get_subject_data("33", &Map::new(), false, None)
            .await
            .unwrap();
        assert!(cached.cache.cached);
        assert_eq!(cached.document.metadata.deficiency_count, 1);
    }

    #[tokio::test]
    async fn refresh_reports_counts() {
        let source = Arc::new(FakeSource::new(clean_records()));
        let service = service_with(source.clone(), Arc::new(MemoryBlobStore::default()));

        let cold = service.refresh("33", None).await.unwrap();
        assert!(!cold.invalidated);
        assert_eq!(cold.records_fetched, 3);
        assert_eq!(cold.review_areas, 3);
        assert!(cold.correlation_id.starts_with("refresh-"));

        let warm = service.refresh("33", None).await.unwrap();
        assert!(warm.invalidated);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_reports_presence() {
        let source = Arc::new(FakeSource::new(clean_records()));
        let service = service_with(source, Arc::new(MemoryBlobStore::default()));

        assert!(!service.invalidate("33", None).await);
        service.get_subject_data("33", &Map::new(), false, None).await.unwrap();
        assert!(service.invalidate("33", None).await);
        assert!(!service.invalidate("33", None).await);
    }

    #[tokio::test]
    async fn fetch_failure_is_terminal_and_caches_nothing() {
        let store = Arc::new(MemoryBlobStore::default());
        let service = service_with(Arc::new(FakeSource::failing()), store.clone());

        let err = service
            .get_subject_data("33", &Map::new(), false, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "REMOTE_CONNECTION_ERROR");
        assert_eq!(err.details()["project_id"], "33");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn missing_header_field_is_validation_error() {
        let mut bare = record("1", "LEGAL : L1", "ok");
        bare.project = None;
        let service = service_with(
            Arc::new(FakeSource::new(vec![bare])),
            Arc::new(MemoryBlobStore::default()),
        );

        let err = service
            .get_subject_data("33", &Map::new(), false, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "MISSING_PROJECT_FIELD");
    }

    #[tokio::test]
    async fn overrides_shape_fresh_documents() {
        let service = service_with(
            Arc::new(FakeSource::new(clean_records())),
            Arc::new(MemoryBlobStore::default()),
        );
        let overrides = json!({ "recipient_name": "Renamed Authority" })
            .as_object()
            .cloned()
            .unwrap();

        let data = service
            .get_subject_data("33", &overrides, true, None)
            .await
            .unwrap();
        assert_eq!(data.document.project.recipient_name, "Renamed Authority");
    }

    #[tokio::test]
    async fn check_scores_document() {
        let service = service_with(
            Arc::new(FakeSource::new(clean_records())),
            Arc::new(MemoryBlobStore::default()),
        );

        let summary = service.check("33", "recipient-information-request", None).await.unwrap();
        assert!(summary.schema.valid, "{:?}", summary.schema.errors);
        assert!(summary.completeness.can_generate);
        assert_eq!(
            summary.completeness.missing_optional_fields,
            vec!["project.recipient_website"]
        );
    }
}
