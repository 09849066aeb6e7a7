//! Typed errors for the connector crates.

use thiserror::Error;

/// Errors that can occur while configuring, authenticating or talking to a
/// remote database.
///
/// Authentication problems are deliberately reported through a single
/// variant: the identity provider, the network and malformed authorities all
/// end up as [`ConnectorError::Authentication`].
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Acquiring an access token (or resolving the credentials for it) failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Failed to establish a connection to the data source.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A statement against the data source failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A connection was in a state it must never be handed out in.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A mutating statement was issued on a read-only connection.
    #[error("connection is read-only, refusing to execute: {0}")]
    ReadOnly(String),
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

impl From<tiberius::error::Error> for ConnectorError {
    fn from(e: tiberius::error::Error) -> Self {
        ConnectorError::QueryFailed(e.to_string())
    }
}
