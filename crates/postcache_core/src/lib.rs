//! Core of the post list cache.
//! Storage engine, flat store, fetch client and presenter live here; the CLI
//! only wires them together.

pub mod api;
pub mod config;
pub mod db;
pub mod flat;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;

pub use api::{FetchClient, FetchError, StubApi};
pub use config::{ConfigError, StoreConfig, DEFAULT_MODEL};
pub use flat::namespace::{FileNamespace, KeyValueNamespace, MemoryNamespace, NamespaceError};
pub use flat::{FlatStore, POST_LIST_KEY};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, ObjectId, Value};
pub use model::post::{Post, PostEntity, RawRecord};
pub use service::presenter::{PostListPresenter, PostListView, PresenterError, PresenterState};
pub use service::storage::{EntityStorage, PostStorage, StorageError};
pub use store::{
    FetchRequest, MergePolicy, Predicate, SaveStatus, Scope, SortDescriptor, StoreCoordinator,
    StoreError, StoreKind, StoreResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
