use postcache_core::{
    FileNamespace, FlatStore, KeyValueNamespace, MemoryNamespace, Post, PostStorage, RawRecord,
    StorageError, StoreConfig, StoreKind, POST_LIST_KEY,
};
use serde_json::json;
use std::sync::Arc;

fn raw(value: serde_json::Value) -> RawRecord {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn saved_posts_read_back_in_order() {
    let store = FlatStore::new(Arc::new(MemoryNamespace::new()));

    store
        .save(vec![
            raw(json!({"id": 2, "title": "second", "body": "b2"})),
            raw(json!({"id": 1, "title": "first", "body": "b1"})),
        ])
        .await
        .unwrap();

    assert_eq!(
        store.fetch().await.unwrap(),
        vec![Post::new(2, "second", "b2"), Post::new(1, "first", "b1")]
    );
}

#[tokio::test]
async fn empty_list_round_trips() {
    let store = FlatStore::new(Arc::new(MemoryNamespace::new()));
    store
        .save(vec![raw(json!({"id": 1, "title": "A", "body": "B"}))])
        .await
        .unwrap();

    store.save(Vec::new()).await.unwrap();

    assert!(store.fetch().await.unwrap().is_empty());
}

#[tokio::test]
async fn never_saved_store_reads_empty() {
    let store = FlatStore::new(Arc::new(MemoryNamespace::new()));
    assert!(store.fetch().await.unwrap().is_empty());
}

#[test]
fn cleared_store_reads_empty() {
    let store = FlatStore::new(Arc::new(MemoryNamespace::new()));
    store
        .save_records(&[raw(json!({"id": 1, "title": "A", "body": "B"}))])
        .unwrap();

    store.clear().unwrap();

    assert!(store.fetch_posts().unwrap().is_empty());
}

#[test]
fn foreign_blob_is_a_decode_error() {
    let namespace = Arc::new(MemoryNamespace::new());
    namespace
        .set(POST_LIST_KEY, br#"{"id": 1, "title": "not a list"}"#)
        .unwrap();
    let store = FlatStore::new(namespace);

    assert!(matches!(store.fetch_posts(), Err(StorageError::Decode(_))));
}

#[test]
fn blob_is_plain_json_under_the_post_list_key() {
    let namespace = Arc::new(MemoryNamespace::new());
    let store = FlatStore::new(namespace.clone());
    store
        .save_records(&[raw(json!({"id": 3, "title": "t", "body": "b"}))])
        .unwrap();

    let encoded = namespace.get(POST_LIST_KEY).unwrap().unwrap();
    let decoded: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
    assert_eq!(decoded, json!([{"id": 3, "title": "t", "body": "b"}]));
}

#[tokio::test]
async fn file_namespace_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new("Model", StoreKind::Sqlite, dir.path()).unwrap();
    let prefs = config.preferences_dir().unwrap();

    let first = FlatStore::new(Arc::new(FileNamespace::open(&prefs).unwrap()));
    first
        .save(vec![raw(json!({"id": 1, "title": "A", "body": "B"}))])
        .await
        .unwrap();

    let second = FlatStore::new(Arc::new(FileNamespace::open(&prefs).unwrap()));
    assert_eq!(second.fetch().await.unwrap(), vec![Post::new(1, "A", "B")]);
    assert!(prefs.join(POST_LIST_KEY).exists());
}
