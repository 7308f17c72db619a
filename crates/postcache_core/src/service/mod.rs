//! Use-case layer between the fetch client, storage backends and the view.
//!
//! # Responsibility
//! - Define the `PostStorage` contract and its storage-engine backend.
//! - Drive the post list update cycle.

pub mod presenter;
pub mod storage;
