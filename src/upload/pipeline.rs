//! Hand-off to downstream processing (thumbnails, embeddings)

use anyhow::Result;
use async_trait::async_trait;

use crate::asset::ExistingAssetMetadata;

/// Receives newly created assets for asynchronous processing.
///
/// Implementations typically push a job onto a worker queue; they should not
/// do the processing inline.
#[async_trait]
pub trait ProcessingPipeline: Send + Sync {
    async fn submit(&self, owner_id: &str, asset: &ExistingAssetMetadata) -> Result<()>;
}

/// Pipeline that drops every submission
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPipeline;

#[async_trait]
impl ProcessingPipeline for NoopPipeline {
    async fn submit(&self, _owner_id: &str, _asset: &ExistingAssetMetadata) -> Result<()> {
        Ok(())
    }
}
