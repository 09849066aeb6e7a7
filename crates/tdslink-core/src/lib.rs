//! tdslink core - connection plumbing shared by the connectors
//!
//! This crate provides:
//! - `Connection` / `Driver` / `ConnectionFactory` traits and a TDS driver
//! - `JdbcClient`, the client extension points with their base behaviour
//! - Identity and per-call credential resolution
//! - Catalog properties and connection URL parsing

pub mod client;
pub mod connection;
pub mod connection_url;
pub mod dialect;
pub mod error;
pub mod factory;
pub mod identity;
pub mod properties;
pub mod tds;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{JdbcClient, JdbcColumnHandle, JdbcSplit, JdbcTableHandle, INFORMATION_SCHEMA};
pub use connection::{
    close_after, pin_context, ConnectParams, Connection, ConnectionFactory, Credential, Driver,
    RemoteTable, ResultSet, SchemaTableName, SqlParam, Statement,
};
pub use connection_url::ConnectionUrl;
pub use error::{ConnectorError, Result};
pub use factory::DriverConnectionFactory;
pub use identity::{CredentialLookup, Identity};
pub use properties::Properties;
pub use tds::TdsDriver;
