//! Blob storage seam: opaque key/value payloads plus time-boxed download URLs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::RwLock;

use cortap_shared::{CortapError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Key/value blob store used for cache entries and generated documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob, `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a blob, replacing any prior value at `key`.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Delete a blob. Returns whether something was actually deleted.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// A URL granting read access to `key` until `ttl` elapses.
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// URL signing
// ---------------------------------------------------------------------------

/// Signs and verifies time-boxed download URLs with a shared secret.
///
/// The signature is the hex HMAC-SHA256 of `key \n expires`, keyed by the secret.
#[derive(Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    /// Sign `key` for access until `now + ttl`.
    pub fn sign(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CortapError::Storage(format!("invalid presign ttl: {e}")))?;
        let expires = (now + ttl).timestamp();
        let signature: String = self
            .mac(key, expires)?
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Ok(format!(
            "{}/{}?expires={expires}&signature={signature}",
            self.base_url,
            key.trim_start_matches('/')
        ))
    }

    /// Check a signature for `key` and `expires` (unix seconds) at time `now`.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() >= expires {
            return false;
        }
        let (Some(expected), Ok(mac)) = (decode_hex(signature), self.mac(key, expires)) else {
            return false;
        };
        mac.verify_slice(&expected).is_ok()
    }

    fn mac(&self, key: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| CortapError::Storage(format!("invalid presign secret: {e}")))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 || !raw.is_ascii() {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-process blob store. Contents are lost when the process exits.
#[derive(Debug)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    signer: UrlSigner,
}

impl MemoryBlobStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            signer,
        }
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(UrlSigner::new("memory://blobs", "memory"))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.signer.sign(key, ttl, Utc::now())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
