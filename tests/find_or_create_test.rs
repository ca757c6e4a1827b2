//! Tests for atomic find-or-create under concurrency

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use imgdedup::asset::{
    AssetCreateInput, AtomicFindOrCreate, ExistingAssetMetadata, FindOrCreateError,
    FindOrCreateOutcome,
};
use imgdedup::dedup::Checksum;
use imgdedup::store::{
    AssetStore, AssetTransaction, MemoryAssetStore, SqliteAssetStore, StoreError,
};
use tokio::sync::Barrier;

fn input(content: &[u8]) -> AssetCreateInput {
    AssetCreateInput {
        checksum: Checksum::of(content),
        blob_url: "https://blob.example.com/u/photo.jpg".to_string(),
        thumbnail_url: None,
        pathname: "u/photo.jpg".to_string(),
        mime: "image/jpeg".to_string(),
        size: content.len() as u64,
        width: None,
        height: None,
    }
}

/// Holds the first two transactions after their lookup until both have
/// looked, so both callers see "not found" and race to insert.
struct RendezvousStore {
    inner: MemoryAssetStore,
    barrier: Arc<Barrier>,
    opened: AtomicUsize,
}

impl RendezvousStore {
    fn new(inner: MemoryAssetStore) -> Self {
        Self {
            inner,
            barrier: Arc::new(Barrier::new(2)),
            opened: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AssetStore for RendezvousStore {
    async fn begin(&self) -> Result<Box<dyn AssetTransaction>, StoreError> {
        let inner = self.inner.begin().await?;
        let gate = (self.opened.fetch_add(1, Ordering::SeqCst) < 2)
            .then(|| Arc::clone(&self.barrier));
        Ok(Box::new(GatedTransaction { inner, gate }))
    }

    async fn find_first(
        &self,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        self.inner.find_first(owner_id, checksum).await
    }
}

struct GatedTransaction {
    inner: Box<dyn AssetTransaction>,
    gate: Option<Arc<Barrier>>,
}

#[async_trait]
impl AssetTransaction for GatedTransaction {
    async fn find_first(
        &mut self,
        owner_id: &str,
        checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        let found = self.inner.find_first(owner_id, checksum).await;
        if let Some(gate) = self.gate.take() {
            gate.wait().await;
        }
        found
    }

    async fn create(
        &mut self,
        owner_id: &str,
        input: &AssetCreateInput,
    ) -> Result<ExistingAssetMetadata, StoreError> {
        self.inner.create(owner_id, input).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

/// Store whose inserts always fail the same way
struct ScriptedStore {
    error: fn() -> StoreError,
    creates: Arc<AtomicUsize>,
}

struct ScriptedTransaction {
    error: fn() -> StoreError,
    creates: Arc<AtomicUsize>,
}

#[async_trait]
impl AssetStore for ScriptedStore {
    async fn begin(&self) -> Result<Box<dyn AssetTransaction>, StoreError> {
        Ok(Box::new(ScriptedTransaction {
            error: self.error,
            creates: self.creates.clone(),
        }))
    }

    async fn find_first(
        &self,
        _owner_id: &str,
        _checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        Ok(None)
    }
}

#[async_trait]
impl AssetTransaction for ScriptedTransaction {
    async fn find_first(
        &mut self,
        _owner_id: &str,
        _checksum: &Checksum,
    ) -> Result<Option<ExistingAssetMetadata>, StoreError> {
        Ok(None)
    }

    async fn create(
        &mut self,
        _owner_id: &str,
        _input: &AssetCreateInput,
    ) -> Result<ExistingAssetMetadata, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn always_conflicts() -> StoreError {
    StoreError::UniqueViolation {
        constraint: "assets_owner_id_checksum_sha256_key".to_string(),
    }
}

fn disk_full() -> StoreError {
    StoreError::Query("disk I/O error".to_string())
}

#[tokio::test]
async fn test_sequential_calls_return_same_asset() {
    let store = MemoryAssetStore::new();
    let service = AtomicFindOrCreate::new(Arc::new(store.clone()));
    let input = input(b"sunset");

    let first = service.find_or_create("alice", &input).await.unwrap();
    let second = service.find_or_create("alice", &input).await.unwrap();

    assert!(matches!(first, FindOrCreateOutcome::Created(_)));
    assert!(second.is_duplicate());
    assert_eq!(first.asset().id, second.asset().id);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_concurrent_race_resolves_to_one_row() {
    let memory = MemoryAssetStore::new();
    let store = Arc::new(RendezvousStore::new(memory.clone()));
    let service = AtomicFindOrCreate::new(store);
    let input = input(b"sunset");

    let (a, b) = tokio::join!(
        service.find_or_create("alice", &input),
        service.find_or_create("alice", &input)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.asset().id, b.asset().id);
    assert_eq!(memory.len(), 1);
    // exactly one caller created the row
    assert_ne!(a.is_duplicate(), b.is_duplicate());
}

#[tokio::test]
async fn test_insert_blocked_by_uncommitted_winner_returns_winner() {
    let store = MemoryAssetStore::new();
    let service = AtomicFindOrCreate::new(Arc::new(store.clone()));
    let input = input(b"sunset");

    let mut winner = store.begin().await.unwrap();
    let winner_id = winner.create("alice", &input).await.unwrap().id;

    let (outcome, _) = tokio::join!(service.find_or_create("alice", &input), async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        winner.commit().await.unwrap();
    });
    let outcome = outcome.unwrap();

    assert!(outcome.is_duplicate());
    assert_eq!(outcome.asset().id, winner_id);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_insert_blocked_by_rolled_back_winner_creates() {
    let store = MemoryAssetStore::new();
    let service = AtomicFindOrCreate::new(Arc::new(store.clone()));
    let input = input(b"sunset");

    let mut winner = store.begin().await.unwrap();
    let winner_id = winner.create("alice", &input).await.unwrap().id;

    let (outcome, _) = tokio::join!(service.find_or_create("alice", &input), async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        winner.rollback().await.unwrap();
    });
    let outcome = outcome.unwrap();

    assert!(matches!(outcome, FindOrCreateOutcome::Created(_)));
    assert_ne!(outcome.asset().id, winner_id);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_many_concurrent_callers_share_one_asset() {
    let store = MemoryAssetStore::new();
    let service = AtomicFindOrCreate::new(Arc::new(store.clone()));
    let input = input(b"sunset");

    let results = join_all((0..8).map(|_| service.find_or_create("alice", &input))).await;
    let ids: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap().into_asset().id)
        .collect();

    assert!(ids.iter().all(|id| id == &ids[0]));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_same_content_different_owners_are_distinct() {
    let store = MemoryAssetStore::new();
    let service = AtomicFindOrCreate::new(Arc::new(store.clone()));
    let input = input(b"sunset");

    let alice = service.find_or_create("alice", &input).await.unwrap();
    let bob = service.find_or_create("bob", &input).await.unwrap();

    assert!(!alice.is_duplicate());
    assert!(!bob.is_duplicate());
    assert_ne!(alice.asset().id, bob.asset().id);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_race_exhaustion_is_transient() {
    let creates = Arc::new(AtomicUsize::new(0));
    let store = ScriptedStore {
        error: always_conflicts,
        creates: creates.clone(),
    };
    let service = AtomicFindOrCreate::new(Arc::new(store));

    let err = service
        .find_or_create("alice", &input(b"sunset"))
        .await
        .unwrap_err();

    assert!(matches!(err, FindOrCreateError::RaceUnresolved { attempts: 4 }));
    assert!(err.is_transient());
    assert_eq!(creates.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_race_retry_bound_is_configurable() {
    let creates = Arc::new(AtomicUsize::new(0));
    let store = ScriptedStore {
        error: always_conflicts,
        creates: creates.clone(),
    };
    let service = AtomicFindOrCreate::with_max_race_retries(Arc::new(store), 0);

    let err = service
        .find_or_create("alice", &input(b"sunset"))
        .await
        .unwrap_err();

    assert!(matches!(err, FindOrCreateError::RaceUnresolved { attempts: 1 }));
    assert_eq!(creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_other_store_errors_propagate_without_retry() {
    let creates = Arc::new(AtomicUsize::new(0));
    let store = ScriptedStore {
        error: disk_full,
        creates: creates.clone(),
    };
    let service = AtomicFindOrCreate::new(Arc::new(store));

    let err = service
        .find_or_create("alice", &input(b"sunset"))
        .await
        .unwrap_err();

    assert!(matches!(err, FindOrCreateError::Store(StoreError::Query(_))));
    assert!(!err.is_transient());
    assert_eq!(creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sqlite_concurrent_callers_share_one_asset() {
    let store = Arc::new(SqliteAssetStore::open_in_memory().unwrap());
    let service = AtomicFindOrCreate::new(store.clone());
    let input = input(b"sunset");

    let results = join_all((0..4).map(|_| service.find_or_create("alice", &input))).await;
    let created = results
        .iter()
        .filter(|r| matches!(r, Ok(FindOrCreateOutcome::Created(_))))
        .count();

    assert_eq!(created, 1);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(store.count_assets("alice").await.unwrap(), 1);
}
