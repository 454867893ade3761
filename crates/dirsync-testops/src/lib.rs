//! TestOps REST gateway.
//!
//! Implements [`dirsync_core::TestOpsGateway`] against the TestOps HTTP API
//! (versioned under `/api/v2`), translating HTTP failures into the engine's
//! error taxonomy.

pub mod auth;
pub mod client;
pub mod config;
pub mod models;

pub use auth::TestOpsAuth;
pub use client::TestOpsClient;
pub use config::TestOpsConfig;
