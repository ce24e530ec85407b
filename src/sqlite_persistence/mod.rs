//! Shared SQLite plumbing: declarative table definitions and versioned
//! schema creation, validation and migration.

mod versioned_schema;

pub use versioned_schema::*;
