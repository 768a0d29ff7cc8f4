//! S3-style HTTP object store backend.
//!
//! Objects are addressed as `{base_url}/{key}`: `GET` reads, `PUT` writes,
//! `DELETE` removes. Requests carry a bearer token and retry transient failures.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use cortap_shared::{CortapError, Result};

use crate::blob::{BlobStore, UrlSigner};

const USER_AGENT: &str = concat!("cortap/", env!("CARGO_PKG_VERSION"));

/// Blob store speaking plain HTTP verbs against an object-store endpoint.
#[derive(Clone)]
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    token: String,
    signer: UrlSigner,
    max_attempts: u32,
    base_backoff: Duration,
}

impl std::fmt::Debug for HttpBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBlobStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBlobStore {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        presign_secret: impl Into<String>,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(CortapError::config("cache.http_base_url is not set"));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CortapError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            signer: UrlSigner::new(base_url.clone(), presign_secret),
            base_url,
            token: token.into(),
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
        })
    }

    /// Override the retry policy (attempt count and first backoff delay).
    pub fn with_retry(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_backoff = base_backoff;
        self
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    /// Send a request built by `build`, retrying connection errors and 5xx responses.
    async fn send<F>(&self, method: Method, key: &str, build: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(key);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let request = build(
                self.client
                    .request(method.clone(), &url)
                    .bearer_auth(&self.token),
            );

            let retryable = match request.send().await {
                Ok(response) if !response.status().is_server_error() => return Ok(response),
                Ok(response) => format!("HTTP {}", response.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_attempts {
                return Err(CortapError::Storage(format!(
                    "{method} {url} failed after {attempt} attempts: {retryable}"
                )));
            }

            let delay = self.base_backoff.saturating_mul(1u32 << (attempt - 1).min(16));
            warn!(%method, %url, attempt, error = %retryable, "retrying blob request");
            tokio::time::sleep(delay).await;
        }
    }
}

fn unexpected(method: &str, key: &str, status: StatusCode) -> CortapError {
    CortapError::Storage(format!("{method} {key}: unexpected status {status}"))
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self.send(Method::GET, key, |r| r).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| CortapError::Storage(format!("GET {key}: {e}")))?;
                debug!(key, size = bytes.len(), "blob read");
                Ok(Some(bytes.to_vec()))
            }
            status => Err(unexpected("GET", key, status)),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let response = self
            .send(Method::PUT, key, |r| {
                r.header(CONTENT_TYPE, content_type).body(body.clone())
            })
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(unexpected("PUT", key, status)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let response = self.send(Method::DELETE, key, |r| r).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(unexpected("DELETE", key, status)),
        }
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.signer.sign(key, ttl, Utc::now())
    }

    fn backend(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> HttpBlobStore {
        HttpBlobStore::new(server.uri(), "store-token", "secret")
            .unwrap()
            .with_retry(3, Duration::from_millis(1))
    }

    #[test]
    fn rejects_empty_base_url() {
        assert!(HttpBlobStore::new("", "t", "s").is_err());
    }

    #[tokio::test]
    async fn get_found_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/33.json"))
            .and(header("Authorization", "Bearer store-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/34.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store(&server);
        assert_eq!(store.get("data/33.json").await.unwrap().as_deref(), Some(&b"{}"[..]));
        assert!(store.get("data/34.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_sends_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/data/33.json"))
            .and(header("Content-Type", "application/json"))
            .and(body_bytes(b"{\"a\":1}".to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .put("data/33.json", b"{\"a\":1}".to_vec(), "application/json")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_reports_whether_something_was_removed() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/data/33.json"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/data/34.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store(&server);
        assert!(store.delete("data/33.json").await.unwrap());
        assert!(!store.delete("data/34.json").await.unwrap());
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/33.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/33.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        assert_eq!(
            store(&server).get("data/33.json").await.unwrap().as_deref(),
            Some(&b"ok"[..])
        );
    }

    #[tokio::test]
    async fn persistent_server_error_is_storage_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/data/33.json"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = store(&server)
            .put("data/33.json", b"x".to_vec(), "application/json")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
    }

    #[tokio::test]
    async fn forbidden_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/33.json"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = store(&server).get("data/33.json").await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn presigned_url_uses_base() {
        let server = MockServer::start().await;
        let url = store(&server)
            .presigned_url("documents/33/a.docx", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with(&format!("{}/documents/33/a.docx?expires=", server.uri())));
    }
}
