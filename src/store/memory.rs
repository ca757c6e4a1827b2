//! In-memory asset store.
//!
//! Models the visibility rules of a relational store closely enough to
//! exercise race recovery: rows inserted by a transaction are invisible to
//! other readers until commit. An insert that collides with another
//! transaction's uncommitted row waits for that transaction to finish, then
//! fails with a unique violation if it committed or proceeds if it rolled back.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::error::StoreError;
use super::{AssetStore, AssetTransaction};
use crate::asset::{AssetCreateInput, ExistingAssetMetadata};
use crate::dedup::Checksum;

/// Name reported for the dedup-key constraint
pub const OWNER_CHECKSUM_CONSTRAINT: &str = "assets_owner_id_checksum_sha256_key";

#[derive(Debug, Clone)]
struct StoredAsset {
    id: String,
    owner_id: String,
    blob_url: String,
    thumbnail_url: Option<String>,
    pathname: String,
    mime: String,
    size: u64,
    width: Option<u32>,
    height: Option<u32>,
    checksum: Checksum,
    favorite: bool,
    created_at: DateTime<Utc>,
    /// Owning transaction while uncommitted
    txn: Option<u64>,
}

#[derive(Debug, Default)]
struct Table {
    rows: Vec<StoredAsset>,
    /// Asset ids with an embedding row
    embeddings: HashSet<String>,
    next_txn: u64,
}

impl Table {
    fn visible(
        &self,
        owner_id: &str,
        checksum: &Checksum,
        viewer: Option<u64>,
    ) -> Option<&StoredAsset> {
        self.rows.iter().find(|row| {
            row.owner_id == owner_id
                && row.checksum == *checksum
                && (row.txn.is_none() || row.txn == viewer)
        })
    }

    fn metadata(&self, row: &StoredAsset) -> ExistingAssetMetadata {
        ExistingAssetMetadata {
            id: row.id.clone(),
            blob_url: row.blob_url.clone(),
            thumbnail_url: row.thumbnail_url.clone(),
            pathname: row.pathname.clone(),
            mime: row.mime.clone(),
            size: row.size,
            width: row.width,
            height: row.height,
            checksum_sha256: row.checksum.clone(),
            favorite: row.favorite,
            created_at: row.created_at,
            has_embedding: self.embeddings.contains(&row.id),
        }
    }

    fn discard(&mut self, txn: u64) {
        self.rows.retain(|row| row.txn != Some(txn));
    }

    fn key_state(&self, owner_id: &str, checksum: &Checksum, viewer: u64) -> KeyState {
        match self
            .rows
            .iter()
            .find(|row| row.owner_id == owner_id && row.checksum == *checksum)
        {
            None => KeyState::Free,
            Some(row) => match row.txn {
                Some(txn) if txn != viewer => KeyState::Pending(txn),
                _ => KeyState::Taken,
            },
        }
    }
}

fn lock(table: &Mutex<Table>) -> Result<MutexGuard<'_, Table>, StoreError> {
    table.lock().map_err(|e| StoreError::Query(e.to_string()))
}

/// Who holds an `(owner_id, checksum)` key, as seen by one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Free,
    /// Committed, or inserted by the viewing transaction itself
    Taken,
    /// Uncommitted row of another transaction
    Pending(u64),
}

/// Process-local asset store; clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetStore {
    table: Arc<Mutex<Table>>,
    /// Signalled whenever a transaction commits or rolls back
    finished: Arc<Notify>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed asset rows
    pub fn len(&self) -> usize {
        lock(&self.table)
            .map(|t| t.rows.iter().filter(|r| r.txn.is_none()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach an embedding to a committed asset. Returns `false` if the asset
    /// does not exist.
    pub fn record_embedding(&self, asset_id: &str) -> Result<bool, StoreError> {
        let mut table = lock(&self.table)?;
        let exists = table
            .rows
            .iter()
            .any(|r| r.id == asset_id && r.txn.is_none());
        if exists {
            table.embeddings.insert(asset_id.to_string());
        }
        Ok(exists)
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn begin(&self) -> Result<Box<dyn AssetTransaction>, StoreError> {
        let txn = {
            let mut table = lock(&self.table)?;
            table.next_txn += 1;
            table.next_txn
        };
        Ok(Box::new(MemoryTransaction {
            table: Arc::clone(&self.table),
            finished: Arc::clone(&self.finished),
            txn,
            active: true,
        }))
    }

    async fn find_first(
        &self,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        let table = lock(&self.table)?;
        Ok(table
            .visible(owner_id, checksum, None)
            .map(|row| table.metadata(row)))
    }
}

struct MemoryTransaction {
    table: Arc<Mutex<Table>>,
    finished: Arc<Notify>,
    txn: u64,
    active: bool,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> Result<(), StoreError> {
        if self.active {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }
}

#[async_trait]
impl AssetTransaction for MemoryTransaction {
    async fn find_first(
        &mut self,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        self.ensure_active()?;
        let table = lock(&self.table)?;
        Ok(table
            .visible(owner_id, checksum, Some(self.txn))
            .map(|row| table.metadata(row)))
    }

    async fn create(
        &mut self,
        owner_id: &str,
        input: &AssetCreateInput,
    ) -> Result<ExistingAssetMetadata, StoreError> {
        self.ensure_active()?;

        loop {
            let finished = self.finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();

            let state = lock(&self.table)?.key_state(owner_id, &input.checksum, self.txn);
            match state {
                KeyState::Free => break,
                KeyState::Taken => {
                    return Err(StoreError::UniqueViolation {
                        constraint: OWNER_CHECKSUM_CONSTRAINT.to_string(),
                    })
                }
                KeyState::Pending(holder) => {
                    debug!(txn = self.txn, holder, "Insert waiting on uncommitted duplicate");
                    finished.await;
                }
            }
        }

        let mut table = lock(&self.table)?;
        // Re-check under the lock that performs the insert
        if table.key_state(owner_id, &input.checksum, self.txn) != KeyState::Free {
            return Err(StoreError::UniqueViolation {
                constraint: OWNER_CHECKSUM_CONSTRAINT.to_string(),
            });
        }

        let row = StoredAsset {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            blob_url: input.blob_url.clone(),
            thumbnail_url: input.thumbnail_url.clone(),
            pathname: input.pathname.clone(),
            mime: input.mime.clone(),
            size: input.size,
            width: input.width,
            height: input.height,
            checksum: input.checksum.clone(),
            favorite: false,
            created_at: Utc::now(),
            txn: Some(self.txn),
        };
        let metadata = table.metadata(&row);
        table.rows.push(row);
        Ok(metadata)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        this.ensure_active()?;
        {
            let mut table = lock(&this.table)?;
            let txn = Some(this.txn);
            for row in table.rows.iter_mut().filter(|r| r.txn == txn) {
                row.txn = None;
            }
        }
        this.active = false;
        this.finished.notify_waiters();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        this.ensure_active()?;
        lock(&this.table)?.discard(this.txn);
        this.active = false;
        this.finished.notify_waiters();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.active {
            debug!(txn = self.txn, "Rolling back abandoned transaction");
            if let Ok(mut table) = self.table.lock() {
                table.discard(self.txn);
            }
            self.finished.notify_waiters();
        }
    }
}
