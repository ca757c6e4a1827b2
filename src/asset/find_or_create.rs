//! Atomic find-or-create for assets keyed by `(owner_id, checksum)`

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{AssetCreateInput, ExistingAssetMetadata};
use crate::store::{AssetStore, AssetTransaction, StoreError, UnitOfWork};

/// Default number of extra passes after losing a create race
pub const DEFAULT_MAX_RACE_RETRIES: u32 = 3;

/// Which terminal state a request reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindOrCreateOutcome {
    Existing(ExistingAssetMetadata),
    Created(ExistingAssetMetadata),
}

impl FindOrCreateOutcome {
    pub fn asset(&self) -> &ExistingAssetMetadata {
        match self {
            Self::Existing(asset) | Self::Created(asset) => asset,
        }
    }

    pub fn into_asset(self) -> ExistingAssetMetadata {
        match self {
            Self::Existing(asset) | Self::Created(asset) => asset,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

#[derive(Error, Debug)]
pub enum FindOrCreateError {
    /// Genuine persistence failure, passed through unchanged
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every pass lost a create race; safe for the caller to retry later
    #[error("Asset creation still racing after {attempts} attempts")]
    RaceUnresolved { attempts: u32 },
}

impl FindOrCreateError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RaceUnresolved { .. })
    }
}

enum Pass {
    Done(FindOrCreateOutcome),
    LostRace,
}

/// Returns the owner's existing asset for a checksum, or creates it.
///
/// Concurrent callers with the same key all receive the same row: a caller
/// whose insert hits the uniqueness constraint rolls back and looks again in
/// a fresh transaction.
#[derive(Clone)]
pub struct AtomicFindOrCreate {
    store: Arc<dyn AssetStore>,
    max_race_retries: u32,
}

impl AtomicFindOrCreate {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self::with_max_race_retries(store, DEFAULT_MAX_RACE_RETRIES)
    }

    pub fn with_max_race_retries(store: Arc<dyn AssetStore>, max_race_retries: u32) -> Self {
        Self {
            store,
            max_race_retries,
        }
    }

    pub fn max_race_retries(&self) -> u32 {
        self.max_race_retries
    }

    pub async fn find_or_create(
        &self,
        owner_id: &str,
        input: &AssetCreateInput,
    ) -> Result<FindOrCreateOutcome, FindOrCreateError> {
        let attempts = self.max_race_retries + 1;

        for attempt in 1..=attempts {
            match self.run_pass(owner_id, input).await? {
                Pass::Done(outcome) => {
                    if attempt > 1 {
                        info!(
                            owner_id,
                            checksum = %input.checksum,
                            attempt,
                            "Recovered from concurrent create"
                        );
                    }
                    return Ok(outcome);
                }
                Pass::LostRace => {
                    debug!(
                        owner_id,
                        checksum = %input.checksum,
                        "Lost create race (attempt {}/{}), looking again",
                        attempt,
                        attempts
                    );
                }
            }
        }

        warn!(
            owner_id,
            checksum = %input.checksum,
            "Create race unresolved after {} attempts",
            attempts
        );
        Err(FindOrCreateError::RaceUnresolved { attempts })
    }

    async fn run_pass(
        &self,
        owner_id: &str,
        input: &AssetCreateInput,
    ) -> Result<Pass, StoreError> {
        let mut tx = self.store.begin().await?;

        let lookup = UnitOfWork::Transaction(tx.as_mut())
            .find_first(self.store.as_ref(), owner_id, &input.checksum)
            .await;
        let existing = match lookup {
            Ok(existing) => existing,
            Err(e) => {
                abort(tx).await;
                return Err(e);
            }
        };

        if let Some(asset) = existing {
            tx.commit().await?;
            return Ok(Pass::Done(FindOrCreateOutcome::Existing(asset)));
        }

        match tx.create(owner_id, input).await {
            Ok(asset) => match tx.commit().await {
                Ok(()) => Ok(Pass::Done(FindOrCreateOutcome::Created(asset))),
                Err(e) if e.is_unique_violation() => Ok(Pass::LostRace),
                Err(e) => Err(e),
            },
            Err(e) if e.is_unique_violation() => {
                abort(tx).await;
                Ok(Pass::LostRace)
            }
            Err(e) => {
                abort(tx).await;
                Err(e)
            }
        }
    }
}

/// Best-effort rollback; failures are only logged.
async fn abort(tx: Box<dyn AssetTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}
