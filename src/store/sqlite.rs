//! SQLite implementation of the asset store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

use super::error::StoreError;
use super::schema;
use super::{AssetStore, AssetTransaction};
use crate::asset::{AssetCreateInput, ExistingAssetMetadata};
use crate::dedup::Checksum;

/// Column list shared by every asset read; `has_embedding` is derived here.
const SELECT_ASSET: &str = r#"
SELECT a.id, a.blob_url, a.thumbnail_url, a.pathname, a.mime, a.size_bytes,
       a.width, a.height, a.checksum_sha256, a.favorite, a.created_at,
       EXISTS (SELECT 1 FROM asset_embeddings e WHERE e.asset_id = a.id)
FROM assets a
"#;

/// SQLite-backed asset store.
///
/// A single connection is shared; an open transaction holds it until commit
/// or rollback, so transactions on one store are serialized. Races between
/// processes sharing the database file surface as unique violations.
pub struct SqliteAssetStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteAssetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAssetStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteAssetStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let open_error = |source: rusqlite::Error| StoreError::Open {
                path: path_clone.clone(),
                source,
            };
            let conn = Connection::open(&path_clone).map_err(open_error)?;

            // WAL lets readers proceed while another process writes
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .map_err(open_error)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(open_error)?;
            conn.pragma_update(None, "foreign_keys", "ON")
                .map_err(open_error)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))
                .map_err(open_error)?;

            schema::migrate(&conn)?;

            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let path = PathBuf::from(":memory:");
        let open_error = |source: rusqlite::Error| StoreError::Open {
            path: path.clone(),
            source,
        };
        let conn = Connection::open_in_memory().map_err(open_error)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(open_error)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that the embedding pipeline produced a vector for an asset.
    pub async fn record_embedding(&self, asset_id: &str, model: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO asset_embeddings (asset_id, model, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![asset_id, model, Utc::now().timestamp_millis()],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }

    /// Number of asset rows owned by `owner_id`.
    pub async fn count_assets(&self, owner_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM assets WHERE owner_id = ?1",
                [owner_id],
                |row| row.get(0),
            )
            .map_err(StoreError::query)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl AssetStore for SqliteAssetStore {
    async fn begin(&self) -> Result<Box<dyn AssetTransaction>, StoreError> {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::query)?;
        Ok(Box::new(SqliteTransaction { conn: Some(conn) }))
    }

    async fn find_first(
        &self,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        let conn = self.conn.lock().await;
        query_asset(&conn, owner_id, checksum)
    }
}

struct SqliteTransaction {
    /// `None` once committed or rolled back
    conn: Option<OwnedMutexGuard<Connection>>,
}

impl SqliteTransaction {
    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_deref().ok_or(StoreError::TransactionClosed)
    }
}

#[async_trait]
impl AssetTransaction for SqliteTransaction {
    async fn find_first(
        &mut self,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        query_asset(self.conn()?, owner_id, checksum)
    }

    async fn create(
        &mut self,
        owner_id: &str,
        input: &AssetCreateInput,
    ) -> Result<ExistingAssetMetadata, StoreError> {
        insert_asset(self.conn()?, owner_id, input)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        let conn = this.conn.take().ok_or(StoreError::TransactionClosed)?;
        if let Err(e) = conn.execute_batch("COMMIT") {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                warn!("Rollback after failed commit also failed: {}", rollback_err);
            }
            return Err(classify_write_error(e));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        let conn = this.conn.take().ok_or(StoreError::TransactionClosed)?;
        conn.execute_batch("ROLLBACK").map_err(StoreError::query)
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back abandoned transaction: {}", e);
            }
        }
    }
}

fn query_asset(
    conn: &Connection,
    owner_id: &str,
    checksum: &Checksum,
) -> Result<Option<ExistingAssetMetadata>, StoreError> {
    let sql = format!(
        "{} WHERE a.owner_id = ?1 AND a.checksum_sha256 = ?2 LIMIT 1",
        SELECT_ASSET
    );
    conn.query_row(&sql, [owner_id, checksum.as_str()], row_to_asset)
        .optional()
        .map_err(StoreError::query)
}

fn insert_asset(
    conn: &Connection,
    owner_id: &str,
    input: &AssetCreateInput,
) -> Result<ExistingAssetMetadata, StoreError> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();

    conn.execute(
        r#"
        INSERT INTO assets (id, owner_id, blob_url, thumbnail_url, pathname, mime, size_bytes, width, height, checksum_sha256, favorite, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)
        "#,
        rusqlite::params![
            &id,
            owner_id,
            &input.blob_url,
            &input.thumbnail_url,
            &input.pathname,
            &input.mime,
            input.size as i64,
            input.width,
            input.height,
            input.checksum.as_str(),
            created_at.timestamp_millis(),
        ],
    )
    .map_err(classify_write_error)?;

    // Read back through the shared projection so derived fields stay consistent
    let sql = format!("{} WHERE a.id = ?1", SELECT_ASSET);
    conn.query_row(&sql, [&id], row_to_asset)
        .map_err(StoreError::query)
}

/// Map the dedup-key UNIQUE failure to the race signal; everything else is a
/// genuine failure.
fn classify_write_error(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(err, Some(message)) = &e {
        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            && message.contains("checksum_sha256")
        {
            return StoreError::UniqueViolation {
                constraint: message.clone(),
            };
        }
    }
    StoreError::query(e)
}

fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<ExistingAssetMetadata> {
    let checksum: String = row.get(8)?;
    let checksum = Checksum::parse(&checksum)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let created_at_ms: i64 = row.get(10)?;
    let created_at: DateTime<Utc> = Utc
        .timestamp_millis_opt(created_at_ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(10, created_at_ms))?;

    Ok(ExistingAssetMetadata {
        id: row.get(0)?,
        blob_url: row.get(1)?,
        thumbnail_url: row.get(2)?,
        pathname: row.get(3)?,
        mime: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        width: row.get(6)?,
        height: row.get(7)?,
        checksum_sha256: checksum,
        favorite: row.get(9)?,
        created_at,
        has_embedding: row.get(11)?,
    })
}
