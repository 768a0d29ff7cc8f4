//! HTTP surface over the data service.
//!
//! Routes live under `/api/v1`. Errors render as
//! `{ "error": { code, message, details, correlation_id } }`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info};

use cortap_core::{DataService, correlation_id};
use cortap_fetcher::CORRELATION_HEADER;
use cortap_shared::CortapError;

/// Template checked when the caller names none.
const DEFAULT_TEMPLATE: &str = "draft-audit-report";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    details: Value,
    correlation_id: String,
}

/// A failed request, tagged with the correlation id it ran under.
#[derive(Debug)]
pub(crate) enum ApiError {
    Service {
        source: CortapError,
        correlation_id: String,
    },
    NotCached {
        subject_id: String,
        correlation_id: String,
    },
}

impl ApiError {
    fn service(correlation_id: &str) -> impl FnOnce(CortapError) -> Self + '_ {
        move |source| Self::Service {
            source,
            correlation_id: correlation_id.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Service {
                source,
                correlation_id,
            } => {
                let status = match &source {
                    CortapError::RemoteApi { .. } => StatusCode::BAD_GATEWAY,
                    CortapError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
                    error!(%correlation_id, error = %source, "request failed");
                }
                (
                    status,
                    ErrorDetail {
                        code: source.error_code().to_string(),
                        message: source.message(),
                        details: source.details(),
                        correlation_id,
                    },
                )
            }
            ApiError::NotCached {
                subject_id,
                correlation_id,
            } => (
                StatusCode::NOT_FOUND,
                ErrorDetail {
                    code: "NOT_CACHED".into(),
                    message: format!("no cached data for project {subject_id}"),
                    details: json!({ "project_id": subject_id }),
                    correlation_id,
                },
            ),
        };

        (status, Json(ErrorBody { error: detail })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    service: Arc<DataService>,
}

#[derive(Debug, Default, Deserialize)]
struct DataQuery {
    force_refresh: Option<String>,
    correlation_id: Option<String>,
}

impl DataQuery {
    /// A bare `?force_refresh` counts as set.
    fn force_refresh(&self) -> bool {
        self.force_refresh.as_deref().is_some_and(|v| {
            let v = v.trim();
            v.is_empty() || v == "1" || v.eq_ignore_ascii_case("true")
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct CorrelationQuery {
    correlation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ValidationQuery {
    template_id: Option<String>,
    correlation_id: Option<String>,
}

/// Build the API router.
pub(crate) fn router(service: Arc<DataService>) -> Router {
    // NOTE: Path params use `:param` syntax (axum 0.7).
    let api = Router::new()
        .route("/subjects/:id/data", get(get_data).delete(delete_data))
        .route("/subjects/:id/data/refresh", post(refresh_data))
        .route("/subjects/:id/validation", get(validation));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(AppState { service })
}

/// Serve the router on `bind` until ctrl-c.
pub(crate) async fn serve(service: Arc<DataService>, bind: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}

/// Query parameter first, then the correlation header, else a fresh id.
fn request_correlation(operation: &str, query: Option<&str>, headers: &HeaderMap) -> String {
    let header = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok());
    correlation_id(operation, query.or(header))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn get_data(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Query(query): Query<DataQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = request_correlation("get", query.correlation_id.as_deref(), &headers);
    let data = state
        .service
        .get_subject_data(&subject_id, &Map::new(), query.force_refresh(), Some(&correlation_id))
        .await
        .map_err(ApiError::service(&correlation_id))?;
    Ok(Json(data).into_response())
}

async fn refresh_data(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Query(query): Query<CorrelationQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id =
        request_correlation("refresh", query.correlation_id.as_deref(), &headers);
    let outcome = state
        .service
        .refresh(&subject_id, Some(&correlation_id))
        .await
        .map_err(ApiError::service(&correlation_id))?;
    Ok(Json(outcome).into_response())
}

async fn delete_data(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Query(query): Query<CorrelationQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id =
        request_correlation("invalidate", query.correlation_id.as_deref(), &headers);
    if !state
        .service
        .invalidate(&subject_id, Some(&correlation_id))
        .await
    {
        return Err(ApiError::NotCached {
            subject_id,
            correlation_id,
        });
    }
    Ok(Json(json!({
        "project_id": subject_id,
        "invalidated": true,
        "correlation_id": correlation_id,
    }))
    .into_response())
}

async fn validation(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Query(query): Query<ValidationQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id =
        request_correlation("validate", query.correlation_id.as_deref(), &headers);
    let template_id = query.template_id.as_deref().unwrap_or(DEFAULT_TEMPLATE);
    let summary = state
        .service
        .check(&subject_id, template_id, Some(&correlation_id))
        .await
        .map_err(ApiError::service(&correlation_id))?;
    Ok(Json(summary).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use cortap_consolidate::{AreaCatalog, Consolidator};
    use cortap_fetcher::{FetchSummary, RawRecord, RecordSource};
    use cortap_shared::{CacheConfig, Result, ValidationConfig};
    use cortap_storage::{CacheStore, MemoryBlobStore};
    use cortap_validator::SchemaValidator;

    enum Mode {
        Records,
        Unreachable,
        MissingHeader,
    }

    struct StubSource(Mode);

    #[async_trait]
    impl RecordSource for StubSource {
        async fn fetch_all(
            &self,
            _subject_id: &str,
            _correlation_id: &str,
        ) -> Result<(FetchSummary, Vec<RawRecord>)> {
            let project = json!({
                "id": "33",
                "name": "Metro Transit Authority",
                "region_number": 4,
                "recipient_city_state": "Springfield, IL",
                "lead_reviewer_name": "Jordan Lee",
                "contractor_name": "Review Partners",
                "lead_reviewer_phone": "555-0100",
                "lead_reviewer_email": "jordan@example.com",
                "fta_program_manager_name": "Sam Ortiz",
                "fta_program_manager_title": "General Engineer",
                "fta_program_manager_phone": "555-0199",
                "fta_program_manager_email": "sam@example.gov",
            });
            let record = RawRecord {
                id: "1".into(),
                control_name: "LEGAL : L1".into(),
                status: Some("Complete".into()),
                comments: Some("Failed compliance check".into()),
                project: match self.0 {
                    Mode::MissingHeader => None,
                    _ => project.as_object().cloned(),
                },
                ..RawRecord::default()
            };
            match self.0 {
                Mode::Unreachable => Err(CortapError::remote(
                    "REMOTE_TIMEOUT",
                    "remote API timed out",
                    json!({}),
                )),
                _ => Ok((
                    FetchSummary {
                        listed: 1,
                        fetched: 1,
                        ..FetchSummary::default()
                    },
                    vec![record],
                )),
            }
        }
    }

    fn app(mode: Mode) -> Router {
        let catalog = AreaCatalog::new(
            "test",
            vec!["Legal".into(), "Procurement".into()],
            [("LEGAL", "Legal"), ("PROCUREMENT", "Procurement")],
        )
        .unwrap();
        let cache = CacheStore::new(
            Arc::new(MemoryBlobStore::default()),
            CacheConfig {
                ttl: Duration::from_secs(3600),
                namespace: "data".into(),
                presign_ttl: Duration::from_secs(60),
            },
        );
        let service = DataService::new(
            Arc::new(StubSource(mode)),
            Consolidator::new(catalog),
            cache,
            SchemaValidator::new(ValidationConfig {
                min_review_areas: 2,
                deficiency_warning_threshold: 10,
            }),
        );
        router(Arc::new(service))
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = call(&app(Mode::Records), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn get_data_then_cached() {
        let app = app(Mode::Records);

        let (status, body) = call(&app, "GET", "/api/v1/subjects/33/data?correlation_id=abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["correlation_id"], "abc");
        assert_eq!(body["cache"]["cached"], false);
        assert_eq!(body["document"]["metadata"]["deficiency_count"], 1);
        assert_eq!(body["document"]["assessments"].as_array().unwrap().len(), 2);

        let (_, body) = call(&app, "GET", "/api/v1/subjects/33/data").await;
        assert_eq!(body["cache"]["cached"], true);

        let (_, body) = call(&app, "GET", "/api/v1/subjects/33/data?force_refresh=true").await;
        assert_eq!(body["cache"]["cached"], false);
        assert_eq!(body["cache"]["miss_reason"], "force_refresh");
    }

    #[tokio::test]
    async fn bare_force_refresh_flag() {
        let app = app(Mode::Records);
        call(&app, "GET", "/api/v1/subjects/33/data").await;

        let (status, body) = call(&app, "GET", "/api/v1/subjects/33/data?force_refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cache"]["cached"], false);
        assert_eq!(body["cache"]["miss_reason"], "force_refresh");

        let (_, body) = call(&app, "GET", "/api/v1/subjects/33/data?force_refresh=false").await;
        assert_eq!(body["cache"]["cached"], true);
    }

    #[tokio::test]
    async fn delete_reports_404_when_nothing_cached() {
        let app = app(Mode::Records);

        let (status, body) = call(&app, "DELETE", "/api/v1/subjects/33/data").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_CACHED");
        assert!(body["error"]["correlation_id"].as_str().unwrap().starts_with("invalidate-"));

        call(&app, "GET", "/api/v1/subjects/33/data").await;
        let (status, body) = call(&app, "DELETE", "/api/v1/subjects/33/data").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["invalidated"], true);
    }

    #[tokio::test]
    async fn refresh_returns_counts() {
        let app = app(Mode::Records);
        let (status, body) = call(&app, "POST", "/api/v1/subjects/33/data/refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records_fetched"], 1);
        assert_eq!(body["review_areas"], 2);
        assert_eq!(body["invalidated"], false);
    }

    #[tokio::test]
    async fn remote_failure_maps_to_502() {
        let app = app(Mode::Unreachable);
        let (status, body) =
            call(&app, "GET", "/api/v1/subjects/33/data?correlation_id=req-9").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "REMOTE_TIMEOUT");
        assert_eq!(body["error"]["correlation_id"], "req-9");
        assert_eq!(body["error"]["details"]["project_id"], "33");
    }

    #[tokio::test]
    async fn validation_failure_maps_to_422() {
        let app = app(Mode::MissingHeader);
        let (status, body) = call(&app, "GET", "/api/v1/subjects/33/data").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "MISSING_PROJECT_FIELD");
    }

    #[tokio::test]
    async fn validation_endpoint_scores_template() {
        let app = app(Mode::Records);
        let (status, body) = call(
            &app,
            "GET",
            "/api/v1/subjects/33/validation?template_id=recipient-information-request",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schema"]["valid"], true);
        assert_eq!(body["completeness"]["template_id"], "recipient-information-request");
        // recipient_acronym and report_date default to empty.
        assert_eq!(body["completeness"]["can_generate"], false);
    }

    #[tokio::test]
    async fn correlation_header_is_honored() {
        let app = app(Mode::Unreachable);
        let request = Request::builder()
            .uri("/api/v1/subjects/33/data")
            .header(CORRELATION_HEADER, "from-header")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["correlation_id"], "from-header");
    }
}
