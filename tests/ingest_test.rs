//! Tests for directory ingest

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use imgdedup::config::{Config, ConfigOptions};
use imgdedup::ingest::{discover_images, Ingestor};
use imgdedup::queue::{Backoff, QueueConfig, RetryPolicy};
use imgdedup::store::{AssetStore, SqliteAssetStore};
use tempfile::TempDir;

fn queue_config() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        retry: RetryPolicy::new(1, Backoff::Explicit(vec![Duration::from_millis(1)])),
        adaptive: false,
    }
}

fn write_album(dir: &TempDir) -> PathBuf {
    let album = dir.path().join("album");
    std::fs::create_dir_all(album.join("2024")).unwrap();
    std::fs::write(album.join("beach.jpg"), b"beach pixels").unwrap();
    std::fs::write(album.join("2024").join("beach-copy.png"), b"beach pixels").unwrap();
    std::fs::write(album.join("2024").join("forest.gif"), b"forest pixels").unwrap();
    std::fs::write(album.join("notes.txt"), b"not an image").unwrap();
    album
}

async fn open_store(dir: &TempDir) -> Arc<SqliteAssetStore> {
    Arc::new(
        SqliteAssetStore::open(&dir.path().join("assets.db"))
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_ingest_dedups_identical_files() {
    let dir = TempDir::new().unwrap();
    let album = write_album(&dir);
    let store = open_store(&dir).await;

    let images = discover_images(&album);
    assert_eq!(images.len(), 3);

    let ingestor = Ingestor::new("alice", queue_config(), store.clone(), 3);
    let summary = ingestor.ingest_paths(images).await;

    assert_eq!(summary.created.len(), 2);
    assert_eq!(summary.duplicates.len(), 1);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.stats.successful, 3);
    assert_eq!(summary.stats.pending, 0);
    assert_eq!(store.count_assets("alice").await.unwrap(), 2);

    let duplicate = &summary.duplicates[0];
    assert!(summary
        .created
        .iter()
        .any(|c| c.asset_id == duplicate.asset_id && c.checksum == duplicate.checksum));
}

#[tokio::test]
async fn test_reingest_reports_everything_as_duplicate() {
    let dir = TempDir::new().unwrap();
    let album = write_album(&dir);
    let store = open_store(&dir).await;

    Ingestor::new("alice", queue_config(), store.clone(), 3)
        .ingest_paths(discover_images(&album))
        .await;
    let summary = Ingestor::new("alice", queue_config(), store.clone(), 3)
        .ingest_paths(discover_images(&album))
        .await;

    assert!(summary.created.is_empty());
    assert_eq!(summary.duplicates.len(), 3);
    assert_eq!(store.count_assets("alice").await.unwrap(), 2);
}

#[tokio::test]
async fn test_owners_do_not_share_assets() {
    let dir = TempDir::new().unwrap();
    let album = write_album(&dir);
    let store = open_store(&dir).await;

    for owner in ["alice", "bob"] {
        let summary = Ingestor::new(owner, queue_config(), store.clone(), 3)
            .ingest_paths(discover_images(&album))
            .await;
        assert_eq!(summary.created.len(), 2);
    }
    assert_eq!(store.count_assets("bob").await.unwrap(), 2);
}

#[tokio::test]
async fn test_unreadable_file_is_reported_after_retries() {
    let dir = TempDir::new().unwrap();
    let album = write_album(&dir);
    let store = open_store(&dir).await;

    let mut paths = discover_images(&album);
    paths.push(album.join("vanished.jpg"));

    let summary = Ingestor::new("alice", queue_config(), store, 3)
        .ingest_paths(paths)
        .await;

    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].path.ends_with("vanished.jpg"));
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(summary.stats.successful, 3);
}

#[tokio::test]
async fn test_ingestor_from_config() {
    let dir = TempDir::new().unwrap();
    let album = write_album(&dir);
    let config = Config::new(
        "carol".to_string(),
        dir.path().join("assets.db"),
        ConfigOptions {
            concurrency: Some(1),
            no_adaptive: true,
            ..Default::default()
        },
    )
    .unwrap();
    let store = Arc::new(SqliteAssetStore::open(&config.database_path).await.unwrap());

    let ingestor = Ingestor::from_config(&config, store.clone());
    assert_eq!(ingestor.queue().concurrency(), 1);

    let summary = ingestor.ingest_paths(discover_images(&album)).await;
    assert_eq!(summary.created.len(), 2);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["stats"]["successful"], 3);
    assert!(json["created"][0]["assetId"].is_string());

    let beach = imgdedup::dedup::Checksum::of(b"beach pixels");
    assert!(store.find_first("carol", &beach).await.unwrap().is_some());
}

#[tokio::test]
async fn test_validation_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, b"not an image").unwrap();
    let store = open_store(&dir).await;

    let config = QueueConfig {
        concurrency: 1,
        retry: RetryPolicy::new(3, Backoff::Explicit(vec![Duration::from_millis(150)])),
        adaptive: false,
    };
    let started = std::time::Instant::now();
    let summary = Ingestor::new("alice", config, store.clone(), 3)
        .ingest_paths(vec![notes])
        .await;

    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].error.contains("Unsupported content type"));
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(store.count_assets("alice").await.unwrap(), 0);
}
