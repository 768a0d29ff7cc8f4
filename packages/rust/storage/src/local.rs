//! Turso Embedded / libSQL blob backend (offline mode).
//!
//! Blobs live in a single `blobs` table keyed by the full blob key.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::{debug, info};

use cortap_shared::{CortapError, Result};

use crate::blob::{BlobStore, UrlSigner};
use crate::migrations;

fn storage_err(e: impl std::fmt::Display) -> CortapError {
    CortapError::Storage(e.to_string())
}

/// Blob store backed by a local libSQL database file.
pub struct LibsqlBlobStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    signer: UrlSigner,
}

impl LibsqlBlobStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path, signer: UrlSigner) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CortapError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let store = Self {
            db,
            conn,
            signer,
        };
        store.run_migrations().await?;
        debug!(path = %path.display(), "opened local blob store");
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CortapError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            // Table doesn't exist yet
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl BlobStore for LibsqlBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut rows = self
            .conn
            .query("SELECT body FROM blobs WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<Vec<u8>>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let size = body.len() as i64;
        self.conn
            .execute(
                "INSERT INTO blobs (key, body, content_type, size, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                   body = excluded.body,
                   content_type = excluded.content_type,
                   size = excluded.size,
                   updated_at = excluded.updated_at",
                params![key, body, content_type, size, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM blobs WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.signer.sign(key, ttl, Utc::now())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn signer() -> UrlSigner {
        UrlSigner::new("cortap://local", "test")
    }

    async fn test_store() -> LibsqlBlobStore {
        let tmp = std::env::temp_dir().join(format!("cortap_test_{}.db", Uuid::now_v7()));
        LibsqlBlobStore::open(&tmp, signer()).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("cortap_test_{}.db", Uuid::now_v7()));
        let first = LibsqlBlobStore::open(&tmp, signer()).await.expect("first open");
        drop(first);
        let second = LibsqlBlobStore::open(&tmp, signer()).await.expect("second open");
        assert_eq!(second.schema_version().await, 1);
    }

    #[tokio::test]
    async fn put_get_overwrite_delete() {
        let store = test_store().await;
        assert!(store.get("data/33.json").await.unwrap().is_none());

        store
            .put("data/33.json", br#"{"v":1}"#.to_vec(), "application/json")
            .await
            .expect("put");
        assert_eq!(
            store.get("data/33.json").await.unwrap().as_deref(),
            Some(&br#"{"v":1}"#[..])
        );

        store
            .put("data/33.json", br#"{"v":2}"#.to_vec(), "application/json")
            .await
            .expect("overwrite");
        assert_eq!(
            store.get("data/33.json").await.unwrap().as_deref(),
            Some(&br#"{"v":2}"#[..])
        );

        assert!(store.delete("data/33.json").await.unwrap());
        assert!(!store.delete("data/33.json").await.unwrap());
        assert!(store.get("data/33.json").await.unwrap().is_none());
    }
}
