//! Asset persistence boundary.
//!
//! The store exposes transaction-scoped lookups and inserts. Uniqueness of
//! `(owner_id, checksum)` is enforced by the storage engine and reported as
//! [`StoreError::UniqueViolation`], which is how concurrent creators learn
//! they lost a race.

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::asset::{AssetCreateInput, ExistingAssetMetadata};
use crate::dedup::Checksum;

pub use error::StoreError;
pub use memory::MemoryAssetStore;
pub use sqlite::SqliteAssetStore;

/// Shared handle to an asset store.
///
/// Object-safe so it can be used as `Arc<dyn AssetStore>` across tasks.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn AssetTransaction>, StoreError>;

    /// Look up an asset on the ambient connection (outside any transaction).
    async fn find_first(
        &self,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError>;
}

/// An open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait AssetTransaction: Send {
    async fn find_first(
        &mut self,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError>;

    async fn create(
        &mut self,
        owner_id: &str,
        input: &AssetCreateInput,
    ) -> Result<ExistingAssetMetadata, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Where a lookup reads from: the ambient connection or an open transaction.
pub enum UnitOfWork<'a> {
    Ambient,
    Transaction(&'a mut dyn AssetTransaction),
}

impl UnitOfWork<'_> {
    pub async fn find_first(
        self,
        store: &dyn AssetStore,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        match self {
            UnitOfWork::Ambient => store.find_first(owner_id, checksum).await,
            UnitOfWork::Transaction(tx) => tx.find_first(owner_id, checksum).await,
        }
    }
}
