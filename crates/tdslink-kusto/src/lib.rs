//! Azure Data Explorer (Kusto) connector.
//!
//! Connections are opened over TDS with an access token obtained through
//! the OAuth2 client-credentials grant, then pinned to the configured
//! database.

pub mod cache;
pub mod client;
pub mod config;
pub mod factory;
pub mod oauth;

pub use cache::TokenCache;
pub use client::KustoClient;
pub use config::KustoConfig;
pub use factory::KustoConnectionFactory;
pub use oauth::{scope_for_host, AccessToken, ClientCredentials, TokenClient, TokenProvider};
