//! Duplicate detection by content checksum

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::checksum::Checksum;
use crate::asset::ExistingAssetMetadata;
use crate::store::{AssetStore, UnitOfWork};

/// Result of a duplicate check. The checksum is always present so callers
/// can reuse it for the create step without hashing again.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub checksum: Checksum,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_asset: Option<ExistingAssetMetadata>,
}

/// Hashes content and asks the store whether the owner already has it.
///
/// Lookups are best-effort: store errors are logged and reported as "not a
/// duplicate" so they never block an upload.
#[derive(Clone)]
pub struct DeduplicationService {
    store: Arc<dyn AssetStore>,
}

impl DeduplicationService {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    pub async fn check_duplicate(&self, owner_id: &str, content: &[u8]) -> DuplicateCheck {
        self.check_duplicate_in(owner_id, content, UnitOfWork::Ambient)
            .await
    }

    /// Same as [`check_duplicate`](Self::check_duplicate), reading through
    /// the given unit of work.
    pub async fn check_duplicate_in(
        &self,
        owner_id: &str,
        content: &[u8],
        unit_of_work: UnitOfWork<'_>,
    ) -> DuplicateCheck {
        let checksum = Checksum::of(content);
        self.check_checksum(owner_id, checksum, unit_of_work).await
    }

    /// Duplicate check for a file on disk, hashed without loading it whole.
    pub async fn check_file(&self, owner_id: &str, path: &Path) -> std::io::Result<DuplicateCheck> {
        let checksum = Checksum::of_file(path).await?;
        Ok(self
            .check_checksum(owner_id, checksum, UnitOfWork::Ambient)
            .await)
    }

    async fn check_checksum(
        &self,
        owner_id: &str,
        checksum: Checksum,
        unit_of_work: UnitOfWork<'_>,
    ) -> DuplicateCheck {
        let existing_asset = self
            .find_by_checksum(owner_id, &checksum, unit_of_work)
            .await;
        if let Some(asset) = &existing_asset {
            debug!(owner_id, checksum = %checksum, asset_id = %asset.id, "Duplicate content");
        }
        DuplicateCheck {
            is_duplicate: existing_asset.is_some(),
            checksum,
            existing_asset,
        }
    }

    /// Look up the owner's asset with this checksum; `None` on miss or error.
    pub async fn find_by_checksum(
        &self,
        owner_id: &str,
        checksum: &Checksum,
        unit_of_work: UnitOfWork<'_>,
    ) -> Option<ExistingAssetMetadata> {
        match unit_of_work
            .find_first(self.store.as_ref(), owner_id, checksum)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    owner_id,
                    checksum = %checksum,
                    "Duplicate lookup failed, treating as new content: {}",
                    e
                );
                None
            }
        }
    }

    pub fn compute_checksum_only(content: &[u8]) -> Checksum {
        Checksum::of(content)
    }

    /// Recompute and compare. Malformed `expected` values never match.
    pub fn verify_checksum(content: &[u8], expected: &str) -> bool {
        Checksum::is_valid(expected) && Checksum::of(content).as_str() == expected
    }
}
