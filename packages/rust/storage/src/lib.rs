//! Blob storage backends and the cache-aside document store.
//!
//! This crate provides:
//! - [`BlobStore`]: key/value blob seam with presigned URLs
//! - [`LibsqlBlobStore`], [`HttpBlobStore`], [`MemoryBlobStore`]: backends
//! - [`CacheStore`]: TTL-bearing cache of canonical documents
//! - [`DocumentArchive`]: generated document binaries with download links

mod migrations;

pub mod archive;
pub mod blob;
pub mod cache;
pub mod http;
pub mod local;

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use cortap_shared::{AppConfig, CacheBackendKind, Result, expand_home, resolve_secret};

pub use archive::{ArchivedDocument, DocumentArchive};
pub use blob::{BlobStore, MemoryBlobStore, UrlSigner};
pub use cache::{CacheEntry, CacheStore, CachedDocument};
pub use http::HttpBlobStore;
pub use local::LibsqlBlobStore;

/// Base URL for links signed by the local and in-memory backends.
const LOCAL_URL_BASE: &str = "cortap://blobs";

/// Construct the blob store selected by `[cache] backend`.
pub async fn open_blob_store(config: &AppConfig) -> Result<Arc<dyn BlobStore>> {
    let cache = &config.cache;
    let store: Arc<dyn BlobStore> = match cache.backend {
        CacheBackendKind::Http => {
            let token = resolve_secret(&cache.http_token_env, "Blob store token")?;
            let secret = resolve_secret(&cache.presign_secret_env, "Presign secret")?;
            Arc::new(HttpBlobStore::new(&cache.http_base_url, token, secret)?)
        }
        CacheBackendKind::Local => {
            let path = expand_home(&cache.local_path);
            let signer = UrlSigner::new(LOCAL_URL_BASE, local_secret(&cache.presign_secret_env));
            Arc::new(LibsqlBlobStore::open(&path, signer).await?)
        }
        CacheBackendKind::Memory => Arc::new(MemoryBlobStore::new(UrlSigner::new(
            LOCAL_URL_BASE,
            local_secret(&cache.presign_secret_env),
        ))),
    };
    debug!(backend = store.backend(), "blob store ready");
    Ok(store)
}

/// Presign secret for in-process backends; a per-process random secret when unset.
fn local_secret(var_name: &str) -> String {
    resolve_secret(var_name, "Presign secret").unwrap_or_else(|_| {
        warn!(var = var_name, "presign secret not set, links are valid for this process only");
        Uuid::now_v7().to_string()
    })
}
