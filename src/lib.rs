//! Catalog Sync Library
//!
//! Mirrors an upstream metal catalog (bands, albums, tracks and upcoming
//! releases) into local SQLite stores. This library exposes the internal
//! modules for testing and potential reuse.

pub mod background_jobs;
pub mod catalog_store;
pub mod config;
pub mod extractor;
pub mod fetch;
pub mod genres;
pub mod governor;
pub mod server;
pub mod server_store;
pub mod sqlite_persistence;
pub mod sync;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use server::{run_server, RequestsLoggingLevel};
pub use server_store::{ServerStore, SqliteServerStore};
