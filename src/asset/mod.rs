//! Asset model and the find-or-create protocol

mod find_or_create;
mod types;

pub use find_or_create::{
    AtomicFindOrCreate, FindOrCreateError, FindOrCreateOutcome, DEFAULT_MAX_RACE_RETRIES,
};
pub use types::{AssetCreateInput, ExistingAssetMetadata};
