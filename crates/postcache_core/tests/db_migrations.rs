use postcache_core::db::migrations::latest_version;
use postcache_core::db::DbError;
use postcache_core::{
    Entity, FetchRequest, PostEntity, StoreConfig, StoreCoordinator, StoreError, StoreKind,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

fn open_sqlite(dir: &Path) -> Arc<StoreCoordinator> {
    let config = StoreConfig::new("Model", StoreKind::Sqlite, dir).unwrap();
    StoreCoordinator::open(config).unwrap()
}

#[test]
fn saved_post_lands_in_the_migrated_posts_table() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = open_sqlite(dir.path());
    let view = coordinator.view_scope().clone();
    let mut entity = coordinator.new_entity::<PostEntity>(None);
    entity.id = 42;
    entity.title = "stored title".to_string();
    entity.body = "stored body".to_string();
    view.stage(&entity).unwrap();
    assert!(coordinator.save(None).is_saved());
    drop(view);
    drop(coordinator);

    let conn = Connection::open(dir.path().join("Model.sqlite")).unwrap();
    let version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, latest_version());

    let (object_id, id, title, body): (String, i64, String, String) = conn
        .query_row(
            "SELECT object_id, id, title, body FROM posts;",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(object_id, entity.object_id().to_string());
    assert_eq!(id, 42);
    assert_eq!(title, "stored title");
    assert_eq!(body, "stored body");
}

#[test]
fn reopening_a_migrated_store_keeps_its_posts() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = open_sqlite(dir.path());
    let scope = coordinator.coordinator_scope(None, false);
    let mut entity = coordinator.new_entity::<PostEntity>(Some(&scope));
    entity.id = 3;
    scope.stage(&entity).unwrap();
    assert!(coordinator.save(Some(&scope)).is_saved());
    drop(scope);
    drop(coordinator);

    let reopened = open_sqlite(dir.path());
    let fetched = reopened.fetch::<PostEntity>(&FetchRequest::all(), None);
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].id, 3);
    assert_eq!(fetched[0].object_id(), entity.object_id());
}

#[test]
fn store_written_by_a_newer_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::open(dir.path().join("Model.sqlite")).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let config = StoreConfig::new("Model", StoreKind::Sqlite, dir.path()).unwrap();
    match StoreCoordinator::open(config) {
        Err(StoreError::Db(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        })) => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("store with a newer schema opened"),
    }
}
