//! SQL Server catalog configuration.

use serde::Deserialize;
use tdslink_core::properties::deserialize_from_str;
use tdslink_core::{ConnectionUrl, ConnectorError, CredentialLookup, Properties, Result};

pub const CONNECTOR_NAME: &str = "sqlserver";
pub const DEFAULT_SCHEMA: &str = "dbo";
/// Catalog used when neither `sqlserver.catalog` nor the URL names one.
pub const FALLBACK_CATALOG: &str = "master";

const ENV_MAPPING: &[(&str, &str)] = &[
    ("SQLSERVER_CONNECTION_URL", "connection-url"),
    ("SQLSERVER_USER", "connection-user"),
    ("SQLSERVER_PASSWORD", "connection-password"),
    ("SQLSERVER_CATALOG", "sqlserver.catalog"),
    ("SQLSERVER_SCHEMA", "sqlserver.schema"),
];

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlServerConfig {
    #[serde(rename = "connector.name", default)]
    connector_name: Option<String>,

    #[serde(rename = "connection-url")]
    pub connection_url: String,

    #[serde(rename = "connection-user", default)]
    pub connection_user: Option<String>,

    #[serde(rename = "connection-password", default)]
    pub connection_password: Option<String>,

    #[serde(rename = "user-credential-name", default)]
    pub user_credential_name: Option<String>,

    #[serde(rename = "password-credential-name", default)]
    pub password_credential_name: Option<String>,

    /// Catalog every session is pinned to.
    #[serde(rename = "sqlserver.catalog", default)]
    pub catalog: Option<String>,

    #[serde(rename = "sqlserver.schema", default = "default_schema")]
    pub schema: String,

    #[serde(
        rename = "sqlserver.trust-server-certificate",
        default,
        deserialize_with = "deserialize_from_str"
    )]
    pub trust_server_certificate: bool,
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

impl std::fmt::Debug for SqlServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL can carry `password=...`; show the parsed, redacted form.
        let url = ConnectionUrl::parse(&self.connection_url)
            .map(|u| format!("{:?}", u))
            .unwrap_or_else(|_| "<invalid>".to_string());
        f.debug_struct("SqlServerConfig")
            .field("connection_url", &url)
            .field("connection_user", &self.connection_user)
            .field(
                "connection_password",
                &self.connection_password.as_ref().map(|_| "***"),
            )
            .field("user_credential_name", &self.user_credential_name)
            .field("password_credential_name", &self.password_credential_name)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

impl SqlServerConfig {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let config: Self = properties.bind()?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from `SQLSERVER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_properties(&Properties::from_env(ENV_MAPPING))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.connector_name {
            if name != CONNECTOR_NAME {
                return Err(ConnectorError::Config(format!(
                    "connector.name is '{}', expected '{}'",
                    name, CONNECTOR_NAME
                )));
            }
        }
        let url = self.url()?;
        if matches!(&self.catalog, Some(c) if c.trim().is_empty()) {
            return Err(ConnectorError::Config("sqlserver.catalog must not be empty".to_string()));
        }
        if self.schema.trim().is_empty() {
            return Err(ConnectorError::Config("sqlserver.schema must not be empty".to_string()));
        }
        if !self.user().is_configured() && url.property("user").is_none() {
            return Err(ConnectorError::Config(
                "connection-user (or user-credential-name) must be set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn url(&self) -> Result<ConnectionUrl> {
        ConnectionUrl::parse(&self.connection_url)
    }

    /// `sqlserver.catalog`, else the URL's database, else [`FALLBACK_CATALOG`].
    pub fn effective_catalog(&self) -> Result<String> {
        match &self.catalog {
            Some(catalog) => Ok(catalog.clone()),
            None => Ok(self.url()?.database_or(FALLBACK_CATALOG)),
        }
    }

    pub fn user(&self) -> CredentialLookup {
        CredentialLookup::new(self.connection_user.clone(), self.user_credential_name.clone())
    }

    pub fn password(&self) -> CredentialLookup {
        CredentialLookup::new(
            self.connection_password.clone(),
            self.password_credential_name.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for (var, _) in ENV_MAPPING {
            unsafe { std::env::remove_var(var) };
        }
    }

    fn props(url: &str) -> Properties {
        Properties::new()
            .with("connection-url", url)
            .with("connection-user", "sa")
            .with("connection-password", "Passw0rd!")
    }

    #[test]
    fn test_defaults() {
        let config =
            SqlServerConfig::from_properties(&props("jdbc:sqlserver://db:1433;databaseName=sales"))
                .unwrap();
        assert_eq!(config.schema, "dbo");
        assert!(!config.trust_server_certificate);
        assert_eq!(config.effective_catalog().unwrap(), "sales");
    }

    #[test]
    fn test_explicit_catalog_and_schema() {
        let p = props("jdbc:sqlserver://db;database=sales")
            .with("sqlserver.catalog", "warehouse")
            .with("sqlserver.schema", "reporting")
            .with("sqlserver.trust-server-certificate", "true");
        let config = SqlServerConfig::from_properties(&p).unwrap();
        assert_eq!(config.effective_catalog().unwrap(), "warehouse");
        assert_eq!(config.schema, "reporting");
        assert!(config.trust_server_certificate);
    }

    #[test]
    fn test_catalog_falls_back_when_url_has_no_database() {
        let config = SqlServerConfig::from_properties(&props("jdbc:sqlserver://db")).unwrap();
        assert_eq!(config.effective_catalog().unwrap(), FALLBACK_CATALOG);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = SqlServerConfig::from_properties(&props("mysql://db")).unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn test_missing_user_rejected() {
        let p = Properties::new().with("connection-url", "jdbc:sqlserver://db");
        assert!(SqlServerConfig::from_properties(&p).is_err());
    }

    #[test]
    fn test_user_in_url_is_enough() {
        let p = Properties::new().with("connection-url", "jdbc:sqlserver://db;user=sa;password=x");
        assert!(SqlServerConfig::from_properties(&p).is_ok());
    }

    #[test]
    fn test_legacy_key_rejected() {
        let p = props("jdbc:sqlserver://db").with("connection.url", "jdbc:sqlserver://other");
        assert!(SqlServerConfig::from_properties(&p).is_err());
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let config = SqlServerConfig::from_properties(&props(
            "jdbc:sqlserver://db;user=sa;password=UrlSecret",
        ))
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("Passw0rd!"));
        assert!(!debug.contains("UrlSecret"));
    }

    #[test]
    fn from_env_with_all_vars() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("SQLSERVER_CONNECTION_URL", "jdbc:sqlserver://db;database=sales");
            std::env::set_var("SQLSERVER_USER", "reader");
            std::env::set_var("SQLSERVER_PASSWORD", "pw");
            std::env::set_var("SQLSERVER_SCHEMA", "reporting");
        }

        let config = SqlServerConfig::from_env().unwrap();
        assert_eq!(config.connection_user.as_deref(), Some("reader"));
        assert_eq!(config.schema, "reporting");
        assert_eq!(config.effective_catalog().unwrap(), "sales");

        clear_env();
    }

    #[test]
    fn from_env_missing_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        assert!(SqlServerConfig::from_env().is_err());
    }
}
