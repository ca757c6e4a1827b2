//! Asset row snapshots and create inputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::Checksum;

/// Snapshot of a persisted asset as returned by lookups and creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingAssetMetadata {
    pub id: String,
    pub blob_url: String,
    pub thumbnail_url: Option<String>,
    pub pathname: String,
    pub mime: String,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub checksum_sha256: Checksum,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
    /// Derived from the embedding relation, never stored on the asset row
    pub has_embedding: bool,
}

/// Minimal fields needed to persist a new asset row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetCreateInput {
    pub checksum: Checksum,
    pub blob_url: String,
    pub thumbnail_url: Option<String>,
    pub pathname: String,
    pub mime: String,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}
