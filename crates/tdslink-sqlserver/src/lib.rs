//! SQL Server connector.
//!
//! Sessions are opened with login credentials and pinned to the configured
//! catalog and schema before use; renames use `sp_rename`.

pub mod client;
pub mod config;

pub use client::SqlServerClient;
pub use config::SqlServerConfig;
