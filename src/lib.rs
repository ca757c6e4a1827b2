//! imgdedup library - upload queue, content-hash deduplication and atomic asset registration

pub mod asset;
pub mod config;
pub mod dedup;
pub mod ingest;
pub mod queue;
pub mod store;
pub mod strategy;
pub mod upload;

// Re-export commonly used types
pub use asset::{
    AtomicFindOrCreate, ExistingAssetMetadata, FindOrCreateError, FindOrCreateOutcome,
};
pub use config::{Config, ConfigOptions};
pub use dedup::{Checksum, DeduplicationService, DuplicateCheck};
pub use ingest::{IngestSummary, Ingestor};
pub use queue::{ConcurrencyController, QueueConfig, QueueStats, RetryPolicy, UploadQueue};
pub use store::{AssetStore, MemoryAssetStore, SqliteAssetStore, StoreError};
pub use upload::{FinalizeRequest, FinalizeResponse, UploadFinalizer};
