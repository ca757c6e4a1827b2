//! Tests for content checksums and duplicate detection

use std::sync::Arc;

use imgdedup::asset::{AssetCreateInput, AtomicFindOrCreate};
use imgdedup::dedup::{Checksum, DeduplicationService};
use imgdedup::store::{
    AssetStore, AssetTransaction, MemoryAssetStore, SqliteAssetStore, UnitOfWork,
};
use tempfile::TempDir;

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

fn input_for(content: &[u8]) -> AssetCreateInput {
    AssetCreateInput {
        checksum: Checksum::of(content),
        blob_url: "https://blob.example.com/x.png".to_string(),
        thumbnail_url: Some("https://blob.example.com/x_thumb.png".to_string()),
        pathname: "x.png".to_string(),
        mime: "image/png".to_string(),
        size: content.len() as u64,
        width: Some(1),
        height: Some(1),
    }
}

#[test]
fn test_checksum_round_trip() {
    let large = vec![7u8; 100_000];
    let samples: [&[u8]; 4] = [b"", b"a", b"\x00\xff binary \x01", &large];
    for content in samples {
        let checksum = DeduplicationService::compute_checksum_only(content);
        assert!(Checksum::is_valid(checksum.as_str()));
        assert!(DeduplicationService::verify_checksum(content, checksum.as_str()));
    }
}

#[test]
fn test_empty_content_checksum() {
    let checksum = DeduplicationService::compute_checksum_only(b"");
    assert_eq!(checksum.as_str(), EMPTY_SHA256);
}

#[test]
fn test_verify_rejects_mismatch_and_malformed() {
    let checksum = Checksum::of(b"a");
    assert!(!DeduplicationService::verify_checksum(b"b", checksum.as_str()));
    assert!(!DeduplicationService::verify_checksum(
        b"a",
        &checksum.as_str().to_uppercase()
    ));
    assert!(!DeduplicationService::verify_checksum(b"a", ""));
}

#[tokio::test]
async fn test_file_bytes_verify_against_streamed_checksum() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("photo.jpg");
    std::fs::write(&path, b"jpeg bytes").unwrap();

    let streamed = Checksum::of_file(&path).await.unwrap();
    let content = tokio::fs::read(&path).await.unwrap();

    assert_eq!(DeduplicationService::compute_checksum_only(&content), streamed);
    assert!(DeduplicationService::verify_checksum(&content, streamed.as_str()));
    assert!(!DeduplicationService::verify_checksum(
        &content,
        &streamed.as_str().to_uppercase()
    ));
}

#[tokio::test]
async fn test_check_duplicate_false_then_true() {
    let store = MemoryAssetStore::new();
    let shared: Arc<dyn AssetStore> = Arc::new(store.clone());
    let dedup = DeduplicationService::new(shared.clone());
    let content = b"holiday photo";

    let before = dedup.check_duplicate("alice", content).await;
    assert!(!before.is_duplicate);
    assert!(before.existing_asset.is_none());
    assert_eq!(before.checksum, Checksum::of(content));

    let created = AtomicFindOrCreate::new(shared)
        .find_or_create("alice", &input_for(content))
        .await
        .unwrap();

    let after = dedup.check_duplicate("alice", content).await;
    assert!(after.is_duplicate);
    assert_eq!(after.existing_asset.unwrap().id, created.asset().id);

    // other owners are unaffected
    assert!(!dedup.check_duplicate("bob", content).await.is_duplicate);
}

#[tokio::test]
async fn test_lookup_through_open_transaction() {
    let store = MemoryAssetStore::new();
    let dedup = DeduplicationService::new(Arc::new(store.clone()));
    let content = b"draft";

    let mut tx = store.begin().await.unwrap();
    tx.create("alice", &input_for(content)).await.unwrap();

    let inside = dedup
        .check_duplicate_in("alice", content, UnitOfWork::Transaction(tx.as_mut()))
        .await;
    assert!(inside.is_duplicate);

    let outside = dedup.check_duplicate("alice", content).await;
    assert!(!outside.is_duplicate);

    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_check_file_against_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        SqliteAssetStore::open(&dir.path().join("assets.db"))
            .await
            .unwrap(),
    );
    let dedup = DeduplicationService::new(store.clone());

    let image = dir.path().join("cat.png");
    std::fs::write(&image, b"not really a png").unwrap();

    let first = dedup.check_file("alice", &image).await.unwrap();
    assert!(!first.is_duplicate);

    AtomicFindOrCreate::new(store)
        .find_or_create("alice", &input_for(b"not really a png"))
        .await
        .unwrap();

    let second = dedup.check_file("alice", &image).await.unwrap();
    assert!(second.is_duplicate);
    assert_eq!(second.checksum, first.checksum);

    let missing = dedup.check_file("alice", &dir.path().join("gone.png")).await;
    assert!(missing.is_err());
}
