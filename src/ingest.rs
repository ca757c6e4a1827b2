//! Local ingest - push a set of image files through the queue, dedup and finalize

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::asset::AtomicFindOrCreate;
use crate::config::Config;
use crate::dedup::{Checksum, DeduplicationService};
use crate::queue::{QueueConfig, QueueStats, UploadQueue};
use crate::store::AssetStore;
use crate::upload::{
    FinalizeError, FinalizeRequest, NoopPipeline, ProcessingPipeline, UploadFinalizer,
};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Finalize(#[from] FinalizeError),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Finalize(e) => e.is_retryable(),
        }
    }
}

/// One file that ended up as an asset
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedFile {
    pub path: String,
    pub asset_id: String,
    pub checksum: Checksum,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub stats: QueueStats,
    pub created: Vec<IngestedFile>,
    pub duplicates: Vec<IngestedFile>,
    pub failures: Vec<IngestFailure>,
}

enum FileOutcome {
    Created(IngestedFile),
    Duplicate(IngestedFile),
}

/// Ingests files for a single owner
pub struct Ingestor {
    owner_id: String,
    queue: UploadQueue<PathBuf>,
    dedup: DeduplicationService,
    finalizer: UploadFinalizer,
}

impl Ingestor {
    pub fn new(
        owner_id: impl Into<String>,
        queue_config: QueueConfig,
        store: Arc<dyn AssetStore>,
        max_race_retries: u32,
    ) -> Self {
        Self::with_pipeline(
            owner_id,
            queue_config,
            store,
            max_race_retries,
            Arc::new(NoopPipeline),
        )
    }

    pub fn with_pipeline(
        owner_id: impl Into<String>,
        queue_config: QueueConfig,
        store: Arc<dyn AssetStore>,
        max_race_retries: u32,
        pipeline: Arc<dyn ProcessingPipeline>,
    ) -> Self {
        let find_or_create =
            AtomicFindOrCreate::with_max_race_retries(store.clone(), max_race_retries);
        Self {
            owner_id: owner_id.into(),
            queue: UploadQueue::new(queue_config),
            dedup: DeduplicationService::new(store),
            finalizer: UploadFinalizer::with_pipeline(find_or_create, pipeline),
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn AssetStore>) -> Self {
        Self::new(
            config.owner_id.clone(),
            config.queue_config(),
            store,
            config.max_race_retries,
        )
    }

    pub fn queue(&self) -> &UploadQueue<PathBuf> {
        &self.queue
    }

    /// Ingest every path once. Paths already queued are skipped.
    pub async fn ingest_paths<I>(&self, paths: I) -> IngestSummary
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let accepted = self.queue.enqueue_batch(
            paths
                .into_iter()
                .map(|path| (path.to_string_lossy().into_owned(), path)),
        );
        info!(owner_id = %self.owner_id, "Ingesting {} files", accepted);

        let report = self
            .queue
            .process_queue_classified(
                |path| self.ingest_file(path),
                IngestError::is_retryable,
                |stats| {
                    info!(
                        "Progress: {}/{} done ({} failed)",
                        stats.successful + stats.failed,
                        stats.total(),
                        stats.failed
                    );
                },
            )
            .await;

        let mut summary = IngestSummary {
            stats: report.stats,
            created: Vec::new(),
            duplicates: Vec::new(),
            failures: Vec::new(),
        };
        for outcome in report.outcomes {
            match outcome.result {
                Ok(FileOutcome::Created(file)) => summary.created.push(file),
                Ok(FileOutcome::Duplicate(file)) => summary.duplicates.push(file),
                Err(e) => summary.failures.push(IngestFailure {
                    path: outcome.id,
                    error: e.to_string(),
                }),
            }
        }
        summary
    }

    async fn ingest_file(&self, path: PathBuf) -> Result<FileOutcome, IngestError> {
        let display = path.to_string_lossy().into_owned();
        let io_error = |source: std::io::Error| IngestError::Io {
            path: display.clone(),
            source,
        };

        let check = self
            .dedup
            .check_file(&self.owner_id, &path)
            .await
            .map_err(io_error)?;
        if let Some(existing) = check.existing_asset {
            return Ok(FileOutcome::Duplicate(IngestedFile {
                path: display,
                asset_id: existing.id,
                checksum: check.checksum,
            }));
        }

        let metadata = tokio::fs::metadata(&path).await.map_err(io_error)?;
        let absolute = tokio::fs::canonicalize(&path).await.map_err(io_error)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let request = FinalizeRequest {
            checksum: check.checksum.to_string(),
            blob_url: format!("file://{}", absolute.display()),
            pathname: format!("{}/{}", self.owner_id, filename),
            filename,
            size: metadata.len(),
            mime_type: guess_mime(&path),
            width: None,
            height: None,
            thumbnail_url: None,
        };

        let response = self.finalizer.finalize(&self.owner_id, &request).await?;
        let file = IngestedFile {
            path: display,
            asset_id: response.asset.id,
            checksum: response.asset.checksum,
        };
        if response.is_duplicate {
            Ok(FileOutcome::Duplicate(file))
        } else {
            Ok(FileOutcome::Created(file))
        }
    }
}

fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Collect image files under `root`, sorted by path
pub fn discover_images(root: &Path) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Failed to access entry during directory walk: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if guess_mime(entry.path()).starts_with("image/") {
            images.push(entry.into_path());
        }
    }

    images.sort();
    images
}
