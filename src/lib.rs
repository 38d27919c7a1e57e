//! # DynamoDB Model Sessions
//!
//! A typed object-document mapper over a single DynamoDB table with support for:
//! - Lifecycle metadata (`ID`, `Type`, `CreatedAt`, `UpdatedAt`, `DeletedAt`)
//! - Soft deletion
//! - Chained multi-field, multi-value queries
//! - Nested field paths (`Owner.Address.City`)
//! - Per-field envelope encryption with AWS KMS
//!
//! ## Features
//!
//! - **Type-safe**: records are plain `serde` structs embedding [`Model`]
//! - **Async-first**: built on `tokio` and `aws-sdk-dynamodb`
//! - **One query per chain**: accumulating `where_in` chains run a single combined query
//! - **In-memory narrowing**: `where_narrow` chains filter earlier results without new queries
//! - **Pluggable stores**: [`DynamoStore`] in production, [`MemoryStore`] in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dynamo_model::{Error, MemoryStore, Model, Session, impl_record};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Dog {
//!     #[serde(rename = "Name")]
//!     name: String,
//!     #[serde(rename = "Breed")]
//!     breed: String,
//!     #[serde(flatten)]
//!     model: Model,
//! }
//!
//! impl_record!(Dog, model);
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut session = Session::new(Arc::new(MemoryStore::new()), "models");
//!
//!     let mut dog = Dog {
//!         name: "Rex".to_string(),
//!         breed: "Beagle".to_string(),
//!         ..Dog::default()
//!     };
//!     session.create(&mut dog).await.result()?;
//!
//!     let mut found = Dog::default();
//!     session.find(&mut found, &dog.model.id).await.result()?;
//!
//!     let mut beagles: Vec<Dog> = Vec::new();
//!     session
//!         .where_in(false, &mut beagles, "Breed", "Beagle")
//!         .await
//!         .result()?;
//!
//!     Ok(())
//! }
//! ```
#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_import_braces,
    unused_results,
    deprecated,
    unknown_lints,
    unreachable_code,
    unused_mut
)]

mod error;
pub use error::{BoxError, Error};

/// Lifecycle metadata and the record capability
pub mod model;

pub mod chain;
pub mod codec;
pub mod filter;
pub mod identity;
pub mod kms;
pub mod predicate;
pub mod schema;

/// Session configuration
pub mod config;

/// Table setup utilities
pub mod setup;

pub mod session;
pub mod store;

// Re-export main types for convenience
pub use codec::{KeyManagement, RecordCodec};
pub use config::{SessionConfig, aws_config_defaults};
pub use identity::{Clock, IdGenerator, SystemClock, UuidGenerator};
pub use kms::KmsKeyManagement;
pub use model::{Model, Record};
pub use session::Session;
pub use store::{DocumentStore, DynamoStore, MemoryStore, StoreError};

// Re-export aws-config types for configuration
pub use aws_config::{
    BehaviorVersion, Region, SdkConfig,
    retry::{RetryConfig, RetryMode},
    timeout::TimeoutConfig,
};
