//! Storage engine: scoped units of work over a persistent store.
//!
//! # Responsibility
//! - Provide generic create/fetch/update/delete/clean over entity tables.
//! - Own the scope hierarchy, merge policies and change propagation.
//! - Hide store-kind differences behind the `StoreBackend` capability.
//!
//! # Invariants
//! - Plain `fetch` never fails; errors degrade to an empty result and a log.
//! - Write paths report one of `Saved`, `HasNoChanges` or `Error`.
//! - Locks are taken child scope before parent scope before backend.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::entity::{FieldKind, ObjectId, Value, ValueError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod backend;
pub mod coordinator;
pub mod merge;
pub mod query;
pub mod scope;
mod sql;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage engine error.
#[derive(Debug)]
pub enum StoreError {
    Config(ConfigError),
    Db(DbError),
    UnknownField {
        entity: &'static str,
        field: String,
    },
    TypeMismatch {
        entity: &'static str,
        field: &'static str,
        expected: FieldKind,
        found: Value,
    },
    MissingEntityTable(&'static str),
    MissingEntityColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Concurrent changes collided under the `Error` merge policy.
    MergeConflict {
        entity: &'static str,
        object_ids: Vec<ObjectId>,
    },
    /// The entity was not created or fetched in the scope it was used with.
    ObjectNotInScope(ObjectId),
    InvalidData(ValueError),
    /// Blocking store task did not run to completion.
    Task(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::UnknownField { entity, field } => {
                write!(f, "unknown field `{field}` on entity {entity}")
            }
            Self::TypeMismatch {
                entity,
                field,
                expected,
                found,
            } => write!(
                f,
                "field {entity}.{field} expects {} but got {found:?}",
                expected.as_str()
            ),
            Self::MissingEntityTable(table) => write!(f, "missing entity table `{table}`"),
            Self::MissingEntityColumn { table, column } => {
                write!(f, "missing column `{column}` in entity table `{table}`")
            }
            Self::MergeConflict { entity, object_ids } => write!(
                f,
                "merge conflict on {} {entity} object(s)",
                object_ids.len()
            ),
            Self::ObjectNotInScope(id) => write!(f, "object {id} is not registered in scope"),
            Self::InvalidData(err) => write!(f, "invalid persisted data: {err}"),
            Self::Task(message) => write!(f, "store task failed: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ValueError> for StoreError {
    fn from(value: ValueError) -> Self {
        Self::InvalidData(value)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Task(value.to_string())
    }
}

/// Outcome of every write-path operation.
#[derive(Debug)]
pub enum SaveStatus {
    /// The scope had changes and they were committed.
    Saved,
    /// The scope had nothing to commit.
    HasNoChanges,
    /// The commit failed; nothing from the scope was applied.
    Error(StoreError),
}

impl SaveStatus {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Collapses the status into a result, keeping the store error.
    pub fn into_store_result(self) -> StoreResult<()> {
        match self {
            Self::Saved | Self::HasNoChanges => Ok(()),
            Self::Error(err) => Err(err),
        }
    }
}

impl From<StoreResult<SaveStatus>> for SaveStatus {
    fn from(value: StoreResult<SaveStatus>) -> Self {
        value.unwrap_or_else(Self::Error)
    }
}

pub use backend::{BulkDelete, StoreBackend, StoreKind};
pub use coordinator::StoreCoordinator;
pub use merge::MergePolicy;
pub use query::{CompareOp, FetchRequest, Predicate, SortDescriptor};
pub use scope::{Scope, ScopeId};
