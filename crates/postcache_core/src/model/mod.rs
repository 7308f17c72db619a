//! Domain records and persisted entity definitions.
//!
//! # Responsibility
//! - Define the `Post` record and its durable `PostEntity` counterpart.
//! - Define the schema contract the storage engine is generic over.
//!
//! # Invariants
//! - Every entity listed in `MODEL_SCHEMAS` has a table created by migrations.

pub mod entity;
pub mod post;

use entity::EntitySchema;

/// Entities making up the persisted model, verified when a store opens.
pub const MODEL_SCHEMAS: &[&EntitySchema] = &[&post::POST_SCHEMA];
