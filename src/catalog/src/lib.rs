//! Durable catalog of filters and counters.
//!
//! The repository persists descriptors and embedded snapshots in SQLite; the
//! service turns create/get requests into live sketch handles, one per
//! catalog identity.

pub mod config;
pub mod error;
mod registry;
pub mod repository;
pub mod service;

pub use config::{CatalogConfig, ParameterPolicy};
pub use error::{CatalogError, Result};
pub use repository::{CardinalRecord, CatalogRepository, FilterRecord};
pub use service::Catalog;
