//! Archive of generated document binaries with time-boxed download links.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use cortap_shared::{CortapError, Result};

use crate::blob::BlobStore;

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Where an archived document lives and how to download it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedDocument {
    pub key: String,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
    pub size_bytes: usize,
}

/// Stores generated documents under `documents/{subject}/{template}_{timestamp}.docx`.
#[derive(Clone)]
pub struct DocumentArchive {
    store: Arc<dyn BlobStore>,
    url_ttl: Duration,
}

impl DocumentArchive {
    pub fn new(store: Arc<dyn BlobStore>, url_ttl: Duration) -> Self {
        Self { store, url_ttl }
    }

    /// Key for a document generated at `at`.
    pub fn key(subject_id: &str, template_id: &str, at: DateTime<Utc>) -> String {
        format!(
            "documents/{subject_id}/{template_id}_{}.docx",
            at.format("%Y%m%dT%H%M%SZ")
        )
    }

    /// Store `bytes` and return a presigned download link.
    pub async fn store(
        &self,
        subject_id: &str,
        template_id: &str,
        bytes: Vec<u8>,
    ) -> Result<ArchivedDocument> {
        let now = Utc::now();
        let key = Self::key(subject_id, template_id, now);
        let size_bytes = bytes.len();

        self.store.put(&key, bytes, DOCX_CONTENT_TYPE).await?;
        let download_url = self.store.presigned_url(&key, self.url_ttl).await?;
        let ttl = chrono::Duration::from_std(self.url_ttl)
            .map_err(|e| CortapError::Storage(format!("invalid presign ttl: {e}")))?;

        info!(%key, size_bytes, "archived generated document");
        Ok(ArchivedDocument {
            key,
            download_url,
            expires_at: now + ttl,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::blob::MemoryBlobStore;

    #[test]
    fn key_layout() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 9).unwrap();
        assert_eq!(
            DocumentArchive::key("33", "draft-audit-report", at),
            "documents/33/draft-audit-report_20260301T140509Z.docx"
        );
    }

    #[tokio::test]
    async fn stores_bytes_and_presigns() {
        let store = Arc::new(MemoryBlobStore::default());
        let archive = DocumentArchive::new(store.clone(), Duration::from_secs(3600));

        let archived = archive
            .store("33", "draft-audit-report", b"PK\x03\x04".to_vec())
            .await
            .unwrap();

        assert!(archived.key.starts_with("documents/33/draft-audit-report_"));
        assert!(archived.download_url.contains(&archived.key));
        assert_eq!(archived.size_bytes, 4);
        assert_eq!(
            store.get(&archived.key).await.unwrap().as_deref(),
            Some(&b"PK\x03\x04"[..])
        );
    }
}
