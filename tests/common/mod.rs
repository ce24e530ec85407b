//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestServer;
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_health() {
//!     let server = TestServer::spawn().await;
//!
//!     let response = server.get("/health").await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

mod fixtures;
mod server;
mod upstream;

pub use fixtures::*;
pub use server::TestServer;
pub use upstream::FakeUpstream;
