mod helpers;

use helpers::*;
use memstore::db;
use memstore::model::{GlobalConfig, Group};
use memstore::store::{ListOptions, SearchOptions, SqliteStore};
use memstore::Store;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.db");
    let group = Group::new("/p", "feature-1", "Feature", "");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.initialize(NS).await.unwrap();
        store
            .add_note(note_at("n1", "/p", "global", "2024-01-01T00:00:00Z"), &axis(0))
            .await
            .unwrap();
        store
            .upsert_global(GlobalConfig::new("/p", "global.project.conventions", json!(["a"])))
            .await
            .unwrap();
        store.add_group(&group).await.unwrap();
        store.close().await.unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    store.initialize(NS).await.unwrap();
    let results = store
        .search(&axis(0), &SearchOptions::new("/p", 5))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_score(results[0].score, 1.0);
    assert_eq!(
        store
            .get_global("/p", "global.project.conventions")
            .await
            .unwrap()
            .unwrap()
            .value,
        json!(["a"])
    );
    assert_eq!(store.get_group(&group.id).await.unwrap(), group);
}

#[tokio::test]
async fn namespaces_share_a_file_without_overlap() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.db");

    let small = SqliteStore::open(&path).unwrap();
    small.initialize("openai:text-embedding-3-small:3").await.unwrap();
    small
        .add_note(note("n1", "/p", "global", "small"), &axis(0))
        .await
        .unwrap();
    small
        .upsert_global(GlobalConfig::new("/p", "global.x", json!("small")))
        .await
        .unwrap();

    let other = SqliteStore::open(&path).unwrap();
    other.initialize("ollama:nomic-embed-text:3").await.unwrap();
    assert!(other.get("n1").await.unwrap_err().is_not_found());
    assert!(other.get_global("/p", "global.x").await.unwrap().is_none());
    assert!(other
        .list_recent(&ListOptions::new("/p", 10))
        .await
        .unwrap()
        .is_empty());

    other
        .upsert_global(GlobalConfig::new("/p", "global.x", json!("other")))
        .await
        .unwrap();
    assert_eq!(
        small.get_global("/p", "global.x").await.unwrap().unwrap().value,
        json!("small")
    );
}

#[tokio::test]
async fn embeddings_are_stored_as_le_f32_blobs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.db");
    let store = SqliteStore::open(&path).unwrap();
    store.initialize(NS).await.unwrap();
    store
        .add_note(note("n1", "/p", "global", "t"), &[1.0, -0.5, 0.25])
        .await
        .unwrap();

    let conn = db::open_database(&path).unwrap();
    let (blob, tags): (Vec<u8>, String) = conn
        .query_row(
            "SELECT embedding, tags FROM notes WHERE namespace = ?1 AND id = 'n1'",
            [NS],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(blob.len(), 12);
    assert_eq!(&blob[4..8], &(-0.5f32).to_le_bytes());
    assert_eq!(tags, "[]");
}

#[tokio::test]
async fn open_store_builds_configured_backend() {
    let dir = TempDir::new().unwrap();
    let mut storage = memstore::config::StorageConfig::default();
    storage.backend = "sqlite".into();
    storage.db_path = dir.path().join("nested").join("memory.db").to_string_lossy().into_owned();

    let store = memstore::open_store(&storage).await.unwrap();
    store.initialize(NS).await.unwrap();
    store
        .add_note(note("n1", "/p", "global", "t"), &axis(0))
        .await
        .unwrap();
    assert!(dir.path().join("nested").join("memory.db").exists());

    storage.backend = "memory".into();
    assert!(memstore::open_store(&storage).await.is_ok());

    storage.backend = "chroma".into();
    let err = memstore::open_store(&storage).await.err().unwrap();
    assert!(matches!(err, memstore::StoreError::InvalidInput(_)));
}
