//! Upload finalize - validate the client's upload report and register the asset

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::pipeline::{NoopPipeline, ProcessingPipeline};
use crate::asset::{
    AssetCreateInput, AtomicFindOrCreate, ExistingAssetMetadata, FindOrCreateError,
    FindOrCreateOutcome,
};
use crate::dedup::{Checksum, InvalidChecksum};

/// Client report sent after the blob has been written to object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub checksum: String,
    pub blob_url: String,
    pub pathname: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(transparent)]
    Checksum(#[from] InvalidChecksum),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported content type {0:?}: only images are accepted")]
    UnsupportedMimeType(String),
}

impl FinalizeRequest {
    /// Check the request and turn it into a create input.
    ///
    /// The checksum is checked first so malformed keys never reach the store.
    pub fn validate(&self) -> Result<AssetCreateInput, ValidationError> {
        let checksum = Checksum::parse(&self.checksum)?;

        if self.blob_url.trim().is_empty() {
            return Err(ValidationError::MissingField("blobUrl"));
        }
        if self.pathname.trim().is_empty() {
            return Err(ValidationError::MissingField("pathname"));
        }
        if self.filename.trim().is_empty() {
            return Err(ValidationError::MissingField("filename"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(ValidationError::MissingField("mimeType"));
        }
        if !self.mime_type.starts_with("image/") {
            return Err(ValidationError::UnsupportedMimeType(self.mime_type.clone()));
        }

        Ok(AssetCreateInput {
            checksum,
            blob_url: self.blob_url.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            pathname: self.pathname.clone(),
            mime: self.mime_type.clone(),
            size: self.size,
            width: self.width,
            height: self.height,
        })
    }
}

/// Asset as reported back to the uploading client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedAsset {
    pub id: String,
    pub blob_url: String,
    pub pathname: String,
    pub mime_type: String,
    pub size: u64,
    pub checksum: Checksum,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub embedded: bool,
}

impl From<ExistingAssetMetadata> for FinalizedAsset {
    fn from(asset: ExistingAssetMetadata) -> Self {
        Self {
            id: asset.id,
            blob_url: asset.blob_url,
            pathname: asset.pathname,
            mime_type: asset.mime,
            size: asset.size,
            checksum: asset.checksum_sha256,
            created_at: asset.created_at,
            processed: false,
            embedded: asset.has_embedding,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    pub is_duplicate: bool,
    pub asset: FinalizedAsset,
}

#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("Invalid finalize request: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Asset(#[from] FindOrCreateError),
}

impl FinalizeError {
    /// HTTP-equivalent status for the transport layer
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Asset(e) if e.is_transient() => 503,
            Self::Asset(_) => 500,
        }
    }

    /// Validation failures are final; everything else may succeed later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

/// Server-side core of the finalize endpoint
#[derive(Clone)]
pub struct UploadFinalizer {
    find_or_create: AtomicFindOrCreate,
    pipeline: Arc<dyn ProcessingPipeline>,
}

impl UploadFinalizer {
    pub fn new(find_or_create: AtomicFindOrCreate) -> Self {
        Self::with_pipeline(find_or_create, Arc::new(NoopPipeline))
    }

    pub fn with_pipeline(
        find_or_create: AtomicFindOrCreate,
        pipeline: Arc<dyn ProcessingPipeline>,
    ) -> Self {
        Self {
            find_or_create,
            pipeline,
        }
    }

    pub async fn finalize(
        &self,
        owner_id: &str,
        request: &FinalizeRequest,
    ) -> Result<FinalizeResponse, FinalizeError> {
        if owner_id.trim().is_empty() {
            return Err(ValidationError::MissingField("ownerId").into());
        }
        let input = request.validate()?;

        let outcome = self.find_or_create.find_or_create(owner_id, &input).await?;
        let is_duplicate = outcome.is_duplicate();

        if let FindOrCreateOutcome::Created(asset) = &outcome {
            info!(
                owner_id,
                asset_id = %asset.id,
                filename = %request.filename,
                "Asset created"
            );
            if let Err(e) = self.pipeline.submit(owner_id, asset).await {
                warn!(asset_id = %asset.id, "Failed to submit asset for processing: {}", e);
            }
        } else {
            info!(
                owner_id,
                asset_id = %outcome.asset().id,
                filename = %request.filename,
                "Duplicate upload, returning existing asset"
            );
        }

        Ok(FinalizeResponse {
            success: true,
            is_duplicate,
            asset: outcome.into_asset().into(),
        })
    }
}
