//! Post storage backends used by the presenter.
//!
//! # Responsibility
//! - Define the `PostStorage` contract shared by the entity and flat paths.
//! - Persist fetched posts through the storage engine in a private scope.
//!
//! # Invariants
//! - Engine saves reporting `Saved` or `HasNoChanges` are successes; an
//!   `Error` becomes `StorageError::SaveFailure` with the entity name.
//! - Saving never deduplicates by post id unless replace mode is on.

use crate::flat::namespace::NamespaceError;
use crate::model::entity::Entity;
use crate::model::post::{Post, PostEntity, RawRecord};
use crate::store::{
    FetchRequest, MergePolicy, Predicate, SaveStatus, Scope, StoreCoordinator, StoreError,
};
use async_trait::async_trait;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Storage error surfaced to the presenter.
#[derive(Debug)]
pub enum StorageError {
    /// Reading entities back from the store failed.
    Fetch(StoreError),
    /// Committing the named entity failed.
    SaveFailure(&'static str),
    Encode(serde_json::Error),
    Decode(serde_json::Error),
    /// Engine failure outside fetch and save.
    Store(StoreError),
    Namespace(NamespaceError),
    /// Blocking storage task did not run to completion.
    Task(String),
}

impl StorageError {
    /// Maps an engine save outcome: `Error` fails with the entity name.
    pub fn from_save(status: SaveStatus, entity: &'static str) -> Result<(), StorageError> {
        match status {
            SaveStatus::Saved | SaveStatus::HasNoChanges => Ok(()),
            SaveStatus::Error(err) => {
                error!(
                    "event=storage_save module=service status=error entity={} error={}",
                    entity, err
                );
                Err(Self::SaveFailure(entity))
            }
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "fetch failed: {err}"),
            Self::SaveFailure(entity) => write!(f, "failed to save {entity}"),
            Self::Encode(err) => write!(f, "encode failed: {err}"),
            Self::Decode(err) => write!(f, "decode failed: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Namespace(err) => write!(f, "{err}"),
            Self::Task(message) => write!(f, "storage task failed: {message}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) | Self::Store(err) => Some(err),
            Self::Encode(err) | Self::Decode(err) => Some(err),
            Self::Namespace(err) => Some(err),
            Self::SaveFailure(_) | Self::Task(_) => None,
        }
    }
}

impl From<NamespaceError> for StorageError {
    fn from(value: NamespaceError) -> Self {
        Self::Namespace(value)
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Task(value.to_string())
    }
}

/// Persistence path for the post list.
#[async_trait]
pub trait PostStorage: Send + Sync {
    /// Persists every raw record as a post.
    async fn save(&self, records: Vec<RawRecord>) -> Result<(), StorageError>;

    /// Reads back every persisted post.
    async fn fetch(&self) -> Result<Vec<Post>, StorageError>;
}

/// Storage engine backend working in its own store-parented scope.
pub struct EntityStorage {
    coordinator: Arc<StoreCoordinator>,
    scope: Arc<Scope>,
    replace: bool,
}

impl EntityStorage {
    /// Opens a private scope with `MergeByPropertyObjectTrump`.
    pub fn new(coordinator: Arc<StoreCoordinator>) -> Self {
        let scope =
            coordinator.coordinator_scope(Some(MergePolicy::MergeByPropertyObjectTrump), false);
        Self {
            coordinator,
            scope,
            replace: false,
        }
    }

    /// Cleans every stored post before each save, so a save replaces the
    /// list instead of appending to it.
    pub fn replacing(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    fn save_blocking(
        coordinator: &StoreCoordinator,
        scope: &Arc<Scope>,
        records: &[RawRecord],
        replace: bool,
    ) -> Result<(), StorageError> {
        if replace {
            let view = Arc::clone(coordinator.view_scope());
            coordinator
                .clean::<PostEntity>(&Predicate::True, Some(scope), &[view])
                .into_store_result()
                .map_err(StorageError::Store)?;
        }

        for data in records {
            let mut entity = coordinator.new_entity::<PostEntity>(Some(scope));
            entity.fill(data);
            scope.stage(&entity).map_err(StorageError::Store)?;
        }

        let status = coordinator.save(Some(scope));
        StorageError::from_save(status, PostEntity::SCHEMA.name)?;
        info!(
            "event=storage_save module=service status=ok backend=entity posts={} replace={}",
            records.len(),
            replace
        );
        Ok(())
    }
}

#[async_trait]
impl PostStorage for EntityStorage {
    async fn save(&self, records: Vec<RawRecord>) -> Result<(), StorageError> {
        let coordinator = Arc::clone(&self.coordinator);
        let scope = Arc::clone(&self.scope);
        let replace = self.replace;
        tokio::task::spawn_blocking(move || {
            Self::save_blocking(&coordinator, &scope, &records, replace)
        })
        .await?
    }

    async fn fetch(&self) -> Result<Vec<Post>, StorageError> {
        let entities = self
            .coordinator
            .try_fetch_async::<PostEntity>(FetchRequest::all(), Some(Arc::clone(&self.scope)))
            .await
            .map_err(StorageError::Fetch)?;
        Ok(entities.into_iter().map(Post::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityStorage, PostStorage, StorageError};
    use crate::config::StoreConfig;
    use crate::model::post::{Post, RawRecord};
    use crate::store::{SaveStatus, StoreCoordinator, StoreError};
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn from_save_only_fails_on_error() {
        assert!(StorageError::from_save(SaveStatus::Saved, "Post").is_ok());
        assert!(StorageError::from_save(SaveStatus::HasNoChanges, "Post").is_ok());
        let err = StorageError::from_save(
            SaveStatus::Error(StoreError::Task("boom".into())),
            "Post",
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::SaveFailure("Post")));
        assert_eq!(err.to_string(), "failed to save Post");
    }

    #[tokio::test]
    async fn replace_mode_keeps_only_the_latest_batch() {
        let coordinator = StoreCoordinator::open(StoreConfig::in_memory("Model").unwrap()).unwrap();
        let storage = EntityStorage::new(coordinator).replacing(true);

        storage
            .save(vec![raw(json!({"id": 1, "title": "old", "body": ""}))])
            .await
            .unwrap();
        storage
            .save(vec![raw(json!({"id": 1, "title": "new", "body": ""}))])
            .await
            .unwrap();

        assert_eq!(storage.fetch().await.unwrap(), vec![Post::new(1, "new", "")]);
    }
}
