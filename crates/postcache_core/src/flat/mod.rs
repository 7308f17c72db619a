//! Flat store: the whole post list as one JSON blob under a fixed key.
//!
//! # Responsibility
//! - Encode fetched raw records as `Post` values and replace the stored blob.
//! - Decode the blob back into posts.
//!
//! # Invariants
//! - Every save replaces the previous blob; there is no incremental merge.
//! - Reading an absent key yields an empty list, not an error.

pub mod namespace;

use crate::model::post::{Post, RawRecord};
use crate::service::storage::{PostStorage, StorageError};
use async_trait::async_trait;
use log::{debug, info};
use namespace::KeyValueNamespace;
use std::sync::Arc;

/// Namespace key holding the encoded post list.
pub const POST_LIST_KEY: &str = "post_list";

/// Post list persisted as a single value in a key-value namespace.
#[derive(Clone)]
pub struct FlatStore {
    namespace: Arc<dyn KeyValueNamespace>,
    key: &'static str,
}

impl FlatStore {
    pub fn new(namespace: Arc<dyn KeyValueNamespace>) -> Self {
        Self {
            namespace,
            key: POST_LIST_KEY,
        }
    }

    /// Maps raw records to posts and replaces the stored list.
    pub fn save_records(&self, records: &[RawRecord]) -> Result<(), StorageError> {
        let posts = records.iter().map(Post::from_raw).collect::<Vec<_>>();
        let encoded = serde_json::to_vec(&posts).map_err(StorageError::Encode)?;
        self.namespace.set(self.key, &encoded)?;
        info!(
            "event=flat_save module=flat status=ok key={} posts={} bytes={}",
            self.key,
            posts.len(),
            encoded.len()
        );
        Ok(())
    }

    /// Stored posts; empty when nothing was saved yet.
    pub fn fetch_posts(&self) -> Result<Vec<Post>, StorageError> {
        let Some(encoded) = self.namespace.get(self.key)? else {
            debug!(
                "event=flat_fetch module=flat status=ok key={} posts=0 reason=absent",
                self.key
            );
            return Ok(Vec::new());
        };
        let posts: Vec<Post> = serde_json::from_slice(&encoded).map_err(StorageError::Decode)?;
        debug!(
            "event=flat_fetch module=flat status=ok key={} posts={}",
            self.key,
            posts.len()
        );
        Ok(posts)
    }

    /// Removes the stored list.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.namespace.remove(self.key)?;
        Ok(())
    }
}

#[async_trait]
impl PostStorage for FlatStore {
    async fn save(&self, records: Vec<RawRecord>) -> Result<(), StorageError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_records(&records)).await?
    }

    async fn fetch(&self) -> Result<Vec<Post>, StorageError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.fetch_posts()).await?
    }
}

#[cfg(test)]
mod tests {
    use super::namespace::{KeyValueNamespace, MemoryNamespace};
    use super::{FlatStore, POST_LIST_KEY};
    use crate::model::post::{Post, RawRecord};
    use crate::service::storage::StorageError;
    use serde_json::json;
    use std::sync::Arc;

    fn raw(value: serde_json::Value) -> RawRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn save_replaces_the_previous_list() {
        let store = FlatStore::new(Arc::new(MemoryNamespace::new()));
        store
            .save_records(&[raw(json!({"id": 1, "title": "A", "body": "B"}))])
            .unwrap();
        store
            .save_records(&[raw(json!({"id": 2})), raw(json!({"title": "t"}))])
            .unwrap();

        assert_eq!(
            store.fetch_posts().unwrap(),
            vec![Post::new(2, "", ""), Post::new(0, "t", "")]
        );
    }

    #[test]
    fn corrupt_blob_is_a_decode_error() {
        let namespace = Arc::new(MemoryNamespace::new());
        namespace.set(POST_LIST_KEY, b"{not json").unwrap();
        let store = FlatStore::new(namespace);
        assert!(matches!(store.fetch_posts(), Err(StorageError::Decode(_))));
    }
}
