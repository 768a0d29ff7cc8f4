//! Cache-aside store for canonical documents.
//!
//! Entries are JSON blobs at `{namespace}/{subject_id}.json` carrying their own
//! `generated_at` / `expires_at`. Expired entries read as absent but stay in
//! the store until invalidated or overwritten.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use cortap_shared::{CacheConfig, CanonicalDocument, CortapError, Result};

use crate::blob::BlobStore;

/// Persisted cache entry layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub subject_id: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub document: CanonicalDocument,
}

/// A cache hit, with age metadata for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDocument {
    pub document: CanonicalDocument,
    pub cache_age_seconds: i64,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// TTL-bearing document cache over any [`BlobStore`].
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn BlobStore>,
    config: CacheConfig,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.store.backend())
            .field("namespace", &self.config.namespace)
            .field("ttl", &self.config.ttl)
            .finish()
    }
}

impl CacheStore {
    pub fn new(store: Arc<dyn BlobStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Underlying blob store, shared with the document archive.
    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.store)
    }

    /// Blob key for a subject.
    pub fn key(&self, subject_id: &str) -> String {
        format!("{}/{subject_id}.json", self.config.namespace)
    }

    /// Read a live entry. Read failures and corrupt entries degrade to a miss.
    pub async fn get(&self, subject_id: &str) -> Option<CachedDocument> {
        self.get_at(subject_id, Utc::now()).await
    }

    /// [`get`](Self::get) evaluated at an explicit instant.
    #[instrument(skip_all, fields(subject_id = %subject_id))]
    pub async fn get_at(&self, subject_id: &str, now: DateTime<Utc>) -> Option<CachedDocument> {
        let key = self.key(subject_id);
        let body = match self.store.get(&key).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!(%key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&body) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, error = %e, "corrupt cache entry, treating as miss");
                return None;
            }
        };

        if now >= entry.expires_at {
            debug!(%key, expires_at = %entry.expires_at, "cache entry expired");
            return None;
        }

        let cache_age_seconds = (now - entry.generated_at).num_seconds().max(0);
        debug!(%key, cache_age_seconds, "cache hit");
        Some(CachedDocument {
            document: entry.document,
            cache_age_seconds,
            generated_at: entry.generated_at,
            expires_at: entry.expires_at,
        })
    }

    /// Write an entry that expires after the configured TTL.
    pub async fn put(&self, subject_id: &str, document: &CanonicalDocument) -> Result<CacheEntry> {
        self.put_at(subject_id, document, Utc::now()).await
    }

    /// [`put`](Self::put) with an explicit generation instant.
    #[instrument(skip_all, fields(subject_id = %subject_id))]
    pub async fn put_at(
        &self,
        subject_id: &str,
        document: &CanonicalDocument,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .map_err(|e| CortapError::Storage(format!("invalid cache ttl: {e}")))?;
        let entry = CacheEntry {
            subject_id: subject_id.to_string(),
            generated_at: now,
            expires_at: now + ttl,
            document: document.clone(),
        };

        let body = serde_json::to_vec(&entry)
            .map_err(|e| CortapError::Storage(format!("cache entry serialization: {e}")))?;
        let key = self.key(subject_id);
        self.store.put(&key, body, "application/json").await?;

        info!(%key, expires_at = %entry.expires_at, "cached document");
        Ok(entry)
    }

    /// Delete the entry. Returns whether anything was cached; failures read as `false`.
    #[instrument(skip_all, fields(subject_id = %subject_id))]
    pub async fn invalidate(&self, subject_id: &str) -> bool {
        let key = self.key(subject_id);
        match self.store.delete(&key).await {
            Ok(deleted) => {
                info!(%key, deleted, "cache invalidated");
                deleted
            }
            Err(e) => {
                warn!(%key, error = %e, "cache invalidation failed");
                false
            }
        }
    }
}
