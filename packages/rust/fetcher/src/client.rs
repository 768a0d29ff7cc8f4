//! Authenticated, retrying client for the remote review-management API.
//!
//! Detail fetches fan out in batches of `concurrency`: each batch is spawned,
//! then fully awaited before the next batch starts.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use cortap_shared::{CortapError, RecordSourceKind, RemoteConfig, Result};

use crate::record::{RawRecord, id_field};

/// User-Agent string for remote API requests.
const USER_AGENT: &str = concat!("cortap/", env!("CARGO_PKG_VERSION"));

/// Header carrying the per-operation correlation identifier.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Maximum number of body characters kept in a client-error excerpt.
const BODY_EXCERPT_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// FetchSummary
// ---------------------------------------------------------------------------

/// Summary of a completed fetch operation.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    /// Number of items the list call reported.
    pub listed: usize,
    /// Number of records successfully fetched and parsed.
    pub fetched: usize,
    /// Per-item failures (item id, error message).
    pub failures: Vec<(String, String)>,
    /// Total duration of the fetch.
    pub duration: Duration,
}

/// Something that can produce the raw records for a subject.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch every raw record belonging to `subject_id`.
    async fn fetch_all(
        &self,
        subject_id: &str,
        correlation_id: &str,
    ) -> Result<(FetchSummary, Vec<RawRecord>)>;
}

// ---------------------------------------------------------------------------
// RemoteClient
// ---------------------------------------------------------------------------

/// Client for the remote API. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct RemoteClient {
    config: RemoteConfig,
    client: Client,
    token: String,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.config.base_url)
            .field("source", &self.config.source)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    /// Create a new client with the given configuration and bearer token.
    pub fn new(config: RemoteConfig, token: impl Into<String>) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            CortapError::config(format!("invalid remote base_url '{}': {e}", config.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                CortapError::config(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            client,
            token: token.into(),
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// List the assessment ids belonging to a subject.
    #[instrument(skip_all, fields(subject_id = %subject_id))]
    pub async fn list_assessment_ids(
        &self,
        subject_id: &str,
        correlation_id: &str,
    ) -> Result<Vec<String>> {
        let body = self
            .get_json(
                "assessments/",
                &[("project_id", subject_id.to_string())],
                correlation_id,
            )
            .await?;

        let items = list_items(&body).ok_or_else(|| {
            CortapError::remote(
                "REMOTE_INVALID_JSON",
                "assessment list response is not a list",
                json!({ "subject_id": subject_id }),
            )
        })?;

        let ids: Vec<String> = items.iter().filter_map(id_field).collect();
        if ids.len() < items.len() {
            warn!(
                skipped = items.len() - ids.len(),
                "assessment list entries without an id"
            );
        }
        Ok(ids)
    }

    /// Fetch one assessment detail payload.
    pub async fn get_assessment(&self, assessment_id: &str, correlation_id: &str) -> Result<Value> {
        self.get_json(&format!("assessments/{assessment_id}"), &[], correlation_id)
            .await
    }

    /// List the subject's assessments, then fetch every detail in batches.
    #[instrument(skip_all, fields(subject_id = %subject_id))]
    pub async fn fetch_assessments(
        &self,
        subject_id: &str,
        correlation_id: &str,
    ) -> Result<(FetchSummary, Vec<RawRecord>)> {
        let start_time = Instant::now();
        let ids = self.list_assessment_ids(subject_id, correlation_id).await?;
        let concurrency = self.config.concurrency.max(1);

        info!(listed = ids.len(), concurrency, "fetching assessment details");

        let mut records: Vec<RawRecord> = Vec::with_capacity(ids.len());
        let mut failures: Vec<(String, String)> = Vec::new();

        for (batch_index, batch) in ids.chunks(concurrency).enumerate() {
            let mut handles = Vec::with_capacity(batch.len());

            for id in batch {
                let client = self.clone();
                let id = id.clone();
                let correlation_id = correlation_id.to_string();
                handles.push((
                    id.clone(),
                    tokio::spawn(async move { client.get_assessment(&id, &correlation_id).await }),
                ));
            }

            for (id, handle) in handles {
                match handle.await {
                    Ok(Ok(body)) => match RawRecord::from_assessment(&body) {
                        Ok(record) => records.push(record),
                        Err(reason) => {
                            warn!(assessment_id = %id, %reason, "unusable assessment payload");
                            failures.push((id, reason));
                        }
                    },
                    Ok(Err(e)) => {
                        error!(assessment_id = %id, error = %e, "assessment fetch failed");
                        failures.push((id, e.to_string()));
                    }
                    Err(e) => {
                        error!(assessment_id = %id, error = %e, "assessment task failed");
                        failures.push((id, format!("task failed: {e}")));
                    }
                }
            }

            debug!(batch = batch_index + 1, fetched = records.len(), "batch complete");
        }

        let summary = FetchSummary {
            listed: ids.len(),
            fetched: records.len(),
            failures,
            duration: start_time.elapsed(),
        };
        finish(subject_id, summary, records)
    }

    /// Page through the subject's project controls.
    #[instrument(skip_all, fields(subject_id = %subject_id))]
    pub async fn fetch_project_controls(
        &self,
        subject_id: &str,
        correlation_id: &str,
    ) -> Result<(FetchSummary, Vec<RawRecord>)> {
        let start_time = Instant::now();
        let page_size = self.config.page_size.max(1) as usize;
        let path = format!("projects/project_controls/{subject_id}");

        let mut records: Vec<RawRecord> = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();
        let mut listed = 0usize;
        let mut offset = 0usize;

        loop {
            let body = self
                .get_json(
                    &path,
                    &[
                        ("limit", page_size.to_string()),
                        ("offset", offset.to_string()),
                    ],
                    correlation_id,
                )
                .await?;

            let items = list_items(&body).ok_or_else(|| {
                CortapError::remote(
                    "REMOTE_INVALID_JSON",
                    "project control response has no item list",
                    json!({ "subject_id": subject_id, "offset": offset }),
                )
            })?;
            let total = body.get("total").and_then(Value::as_u64).map(|t| t as usize);
            let page_len = items.len();

            for item in items {
                match RawRecord::from_project_control(item) {
                    Ok(record) => records.push(record),
                    Err(reason) => {
                        let id = id_field(item).unwrap_or_else(|| format!("offset-{offset}"));
                        warn!(item = %id, %reason, "unusable project control payload");
                        failures.push((id, reason));
                    }
                }
            }

            listed += page_len;
            offset += page_len;
            debug!(offset, ?total, "page complete");

            if page_len < page_size || total.is_some_and(|t| offset >= t) {
                break;
            }
        }

        let summary = FetchSummary {
            listed,
            fetched: records.len(),
            failures,
            duration: start_time.elapsed(),
        };
        finish(subject_id, summary, records)
    }

    /// GET a JSON body with retry, backoff, and rate-limit handling.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        correlation_id: &str,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.config.base_url, path.trim_start_matches('/'));
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(%url, attempt, max_attempts, correlation_id, "remote request");

            let sent = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .header(ACCEPT, "application/json")
                .header(CORRELATION_HEADER, correlation_id)
                .query(query)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    let code = if e.is_timeout() {
                        "REMOTE_TIMEOUT"
                    } else {
                        "REMOTE_CONNECTION_ERROR"
                    };
                    if attempt < max_attempts {
                        let delay = self.backoff(attempt);
                        warn!(%url, attempt, code, error = %e, delay_ms = delay.as_millis() as u64, "retrying remote request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(CortapError::remote(
                        code,
                        format!("request to {url} failed after {attempt} attempts: {e}"),
                        json!({ "url": url, "attempts": attempt }),
                    ));
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < max_attempts {
                    let delay = retry_after(response.headers())
                        .unwrap_or_else(|| self.backoff(attempt));
                    warn!(%url, attempt, delay_ms = delay.as_millis() as u64, "rate limited by remote API");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(CortapError::RemoteApi {
                    code: "REMOTE_RATE_LIMITED".into(),
                    message: format!("rate limited by remote API after {attempt} attempts"),
                    status: Some(status.as_u16()),
                    details: json!({ "url": url, "attempts": attempt }),
                });
            }

            if status.is_server_error() {
                if attempt < max_attempts {
                    let delay = self.backoff(attempt);
                    warn!(%url, attempt, %status, delay_ms = delay.as_millis() as u64, "retrying after server error");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(CortapError::RemoteApi {
                    code: "REMOTE_SERVER_ERROR".into(),
                    message: format!("remote API returned {status} after {attempt} attempts"),
                    status: Some(status.as_u16()),
                    details: json!({ "url": url, "attempts": attempt }),
                });
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                    .unwrap_or_else(|| format!("remote API returned {status}"));
                return Err(CortapError::remote_status(
                    status.as_u16(),
                    message,
                    json!({ "url": url, "body": excerpt(&body) }),
                ));
            }

            let bytes = response.bytes().await.map_err(|e| {
                CortapError::remote(
                    "REMOTE_CONNECTION_ERROR",
                    format!("{url}: body read failed: {e}"),
                    json!({ "url": url }),
                )
            })?;

            return serde_json::from_slice(&bytes).map_err(|e| {
                CortapError::remote(
                    "REMOTE_INVALID_JSON",
                    format!("{url}: response is not valid JSON: {e}"),
                    json!({ "url": url, "body": excerpt(&String::from_utf8_lossy(&bytes)) }),
                )
            });
        }
    }

    /// Backoff before retry number `attempt`: `base × 2^(attempt-1)`.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.config.base_backoff.saturating_mul(1u32 << exponent)
    }
}

#[async_trait]
impl RecordSource for RemoteClient {
    async fn fetch_all(
        &self,
        subject_id: &str,
        correlation_id: &str,
    ) -> Result<(FetchSummary, Vec<RawRecord>)> {
        match self.config.source {
            RecordSourceKind::Assessments => {
                self.fetch_assessments(subject_id, correlation_id).await
            }
            RecordSourceKind::ProjectControls => {
                self.fetch_project_controls(subject_id, correlation_id).await
            }
        }
    }
}

/// Log the summary and reject total failure: items were listed but none arrived.
fn finish(
    subject_id: &str,
    summary: FetchSummary,
    records: Vec<RawRecord>,
) -> Result<(FetchSummary, Vec<RawRecord>)> {
    info!(
        listed = summary.listed,
        fetched = summary.fetched,
        failures = summary.failures.len(),
        duration_ms = summary.duration.as_millis() as u64,
        "fetch completed"
    );

    if summary.listed > 0 && records.is_empty() {
        let first = summary
            .failures
            .first()
            .map(|(_, reason)| reason.clone())
            .unwrap_or_default();
        return Err(CortapError::remote(
            "REMOTE_FETCH_FAILED",
            format!("all {} item fetches failed for subject {subject_id}", summary.listed),
            json!({ "failures": summary.failures.len(), "first_failure": first }),
        ));
    }

    Ok((summary, records))
}

/// Items from a list response: a bare array, or wrapped under a common key.
fn list_items(body: &Value) -> Option<&Vec<Value>> {
    if let Some(items) = body.as_array() {
        return Some(items);
    }
    ["items", "assessments", "data", "results"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_array))
}

/// Parse a `Retry-After` header given as seconds or an HTTP date.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (when - Utc::now()).to_std().ok()
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}
