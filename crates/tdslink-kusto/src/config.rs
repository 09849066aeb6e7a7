//! Kusto connection configuration.
//!
//! Canonical property keys (all prefixed with `kusto.`, hyphenated):
//!
//! | key | required | default |
//! |---|---|---|
//! | `kusto.host-name` | yes | |
//! | `kusto.database` | yes | |
//! | `kusto.app-id` / `kusto.app-id-credential-name` | one of | |
//! | `kusto.app-key` / `kusto.app-key-credential-name` | one of | |
//! | `kusto.tenant-id` / `kusto.tenant-id-credential-name` | one of | |
//! | `kusto.authority-host` | no | `https://login.microsoftonline.com` |
//! | `kusto.host-name-in-certificate` | no | `*.kusto.windows.net` |
//! | `kusto.port` | no | `1433` |
//! | `kusto.token-cache-enabled` | no | `true` |
//! | `kusto.token-request-timeout` | no | `30` (seconds) |

use std::time::Duration;

use serde::Deserialize;
use tdslink_core::properties::deserialize_from_str;
use tdslink_core::{ConnectorError, CredentialLookup, Properties, Result};

pub const CONNECTOR_NAME: &str = "kusto";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_HOST_NAME_IN_CERTIFICATE: &str = "*.kusto.windows.net";

/// Environment variables read by [`KustoConfig::from_env`].
const ENV_MAPPING: &[(&str, &str)] = &[
    ("KUSTO_HOST_NAME", "kusto.host-name"),
    ("KUSTO_DATABASE", "kusto.database"),
    ("KUSTO_APP_ID", "kusto.app-id"),
    ("KUSTO_APP_KEY", "kusto.app-key"),
    ("KUSTO_TENANT_ID", "kusto.tenant-id"),
    ("KUSTO_AUTHORITY_HOST", "kusto.authority-host"),
    ("KUSTO_PORT", "kusto.port"),
];

/// Static connection parameters for one Kusto cluster/database.
///
/// The application secret is redacted in `Debug` output.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KustoConfig {
    #[serde(rename = "connector.name", default)]
    connector_name: Option<String>,

    #[serde(rename = "kusto.host-name")]
    pub host_name: String,

    #[serde(rename = "kusto.database")]
    pub database: String,

    #[serde(rename = "kusto.app-id", default)]
    pub app_id: Option<String>,

    #[serde(rename = "kusto.app-key", default)]
    pub app_key: Option<String>,

    #[serde(rename = "kusto.tenant-id", default)]
    pub tenant_id: Option<String>,

    /// Name of the caller extra credential that overrides `app_id`.
    #[serde(rename = "kusto.app-id-credential-name", default)]
    pub app_id_credential_name: Option<String>,

    #[serde(rename = "kusto.app-key-credential-name", default)]
    pub app_key_credential_name: Option<String>,

    #[serde(rename = "kusto.tenant-id-credential-name", default)]
    pub tenant_id_credential_name: Option<String>,

    #[serde(rename = "kusto.authority-host", default = "default_authority_host")]
    pub authority_host: String,

    #[serde(
        rename = "kusto.host-name-in-certificate",
        default = "default_host_name_in_certificate"
    )]
    pub host_name_in_certificate: String,

    #[serde(
        rename = "kusto.port",
        default = "default_port",
        deserialize_with = "deserialize_from_str"
    )]
    pub port: u16,

    #[serde(
        rename = "kusto.token-cache-enabled",
        default = "default_true",
        deserialize_with = "deserialize_from_str"
    )]
    pub token_cache_enabled: bool,

    #[serde(
        rename = "kusto.token-request-timeout",
        default = "default_token_request_timeout",
        deserialize_with = "deserialize_from_str"
    )]
    pub token_request_timeout_secs: u64,
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_host_name_in_certificate() -> String {
    DEFAULT_HOST_NAME_IN_CERTIFICATE.to_string()
}

fn default_port() -> u16 {
    tdslink_core::connection_url::DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_token_request_timeout() -> u64 {
    30
}

impl std::fmt::Debug for KustoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KustoConfig")
            .field("host_name", &self.host_name)
            .field("database", &self.database)
            .field("app_id", &self.app_id)
            .field("app_key", &self.app_key.as_ref().map(|_| "***"))
            .field("tenant_id", &self.tenant_id)
            .field("app_id_credential_name", &self.app_id_credential_name)
            .field("app_key_credential_name", &self.app_key_credential_name)
            .field("tenant_id_credential_name", &self.tenant_id_credential_name)
            .field("authority_host", &self.authority_host)
            .field("host_name_in_certificate", &self.host_name_in_certificate)
            .field("port", &self.port)
            .field("token_cache_enabled", &self.token_cache_enabled)
            .field("token_request_timeout_secs", &self.token_request_timeout_secs)
            .finish()
    }
}

impl KustoConfig {
    /// Bind and validate catalog properties.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let config: Self = properties.bind()?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from `KUSTO_*` environment variables.
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
        if self.host_name.trim().is_empty() {
            return Err(ConnectorError::Config("kusto.host-name must not be empty".to_string()));
        }
        if self.host_name.contains('/') || self.host_name.contains("://") {
            return Err(ConnectorError::Config(format!(
                "kusto.host-name must be a bare host name, got '{}'",
                self.host_name
            )));
        }
        if self.database.trim().is_empty() {
            return Err(ConnectorError::Config("kusto.database must not be empty".to_string()));
        }
        for (key, lookup) in [
            ("kusto.app-id", self.app_id()),
            ("kusto.app-key", self.app_key()),
            ("kusto.tenant-id", self.tenant_id()),
        ] {
            if !lookup.is_configured() {
                return Err(ConnectorError::Config(format!(
                    "{key} (or {key}-credential-name) must be set"
                )));
            }
        }
        let authority = url::Url::parse(&self.authority_host).map_err(|e| {
            ConnectorError::Config(format!(
                "kusto.authority-host '{}' is not a URL: {}",
                self.authority_host, e
            ))
        })?;
        if !matches!(authority.scheme(), "https" | "http") {
            return Err(ConnectorError::Config(format!(
                "kusto.authority-host must be an http(s) URL, got '{}'",
                self.authority_host
            )));
        }
        if self.token_request_timeout_secs == 0 {
            return Err(ConnectorError::Config(
                "kusto.token-request-timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn app_id(&self) -> CredentialLookup {
        CredentialLookup::new(self.app_id.clone(), self.app_id_credential_name.clone())
    }

    pub fn app_key(&self) -> CredentialLookup {
        CredentialLookup::new(self.app_key.clone(), self.app_key_credential_name.clone())
    }

    pub fn tenant_id(&self) -> CredentialLookup {
        CredentialLookup::new(self.tenant_id.clone(), self.tenant_id_credential_name.clone())
    }

    pub fn token_request_timeout(&self) -> Duration {
        Duration::from_secs(self.token_request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tdslink_core::Identity;

    // Serialize env-mutating tests to avoid races.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for (var, _) in ENV_MAPPING {
            unsafe { std::env::remove_var(var) };
        }
    }

    fn base_properties() -> Properties {
        Properties::new()
            .with("connector.name", "kusto")
            .with("kusto.host-name", "help.kusto.windows.net")
            .with("kusto.database", "Samples")
            .with("kusto.app-id", "app")
            .with("kusto.app-key", "secret")
            .with("kusto.tenant-id", "tenant")
    }

    #[test]
    fn test_from_properties_with_defaults() {
        let config = KustoConfig::from_properties(&base_properties()).unwrap();
        assert_eq!(config.host_name, "help.kusto.windows.net");
        assert_eq!(config.database, "Samples");
        assert_eq!(config.authority_host, DEFAULT_AUTHORITY_HOST);
        assert_eq!(config.host_name_in_certificate, DEFAULT_HOST_NAME_IN_CERTIFICATE);
        assert_eq!(config.port, 1433);
        assert!(config.token_cache_enabled);
        assert_eq!(config.token_request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let props = base_properties()
            .with("kusto.port", "443")
            .with("kusto.token-cache-enabled", "false")
            .with("kusto.token-request-timeout", "5");
        let config = KustoConfig::from_properties(&props).unwrap();
        assert_eq!(config.port, 443);
        assert!(!config.token_cache_enabled);
        assert_eq!(config.token_request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_legacy_key_spelling_rejected() {
        let props = base_properties().with("kusto.appId", "app");
        let err = KustoConfig::from_properties(&props).unwrap_err();
        assert!(err.to_string().contains("kusto.appId"));
    }

    #[test]
    fn test_missing_app_key_rejected() {
        let props: Properties = [
            ("kusto.host-name", "help.kusto.windows.net"),
            ("kusto.database", "Samples"),
            ("kusto.app-id", "app"),
            ("kusto.tenant-id", "tenant"),
        ]
        .into_iter()
        .collect();
        let err = KustoConfig::from_properties(&props).unwrap_err();
        assert!(err.to_string().contains("kusto.app-key"));
    }

    #[test]
    fn test_credential_name_satisfies_requirement() {
        let props: Properties = [
            ("kusto.host-name", "help.kusto.windows.net"),
            ("kusto.database", "Samples"),
            ("kusto.app-id-credential-name", "kusto_app_id"),
            ("kusto.app-key-credential-name", "kusto_app_key"),
            ("kusto.tenant-id", "tenant"),
        ]
        .into_iter()
        .collect();
        let config = KustoConfig::from_properties(&props).unwrap();
        let identity = Identity::new("alice")
            .with_extra_credential("kusto_app_id", "alice-app")
            .with_extra_credential("kusto_app_key", "alice-secret");
        assert_eq!(config.app_id().resolve(&identity), Some("alice-app".to_string()));
        assert_eq!(config.app_key().resolve(&identity), Some("alice-secret".to_string()));
        assert_eq!(config.tenant_id().resolve(&identity), Some("tenant".to_string()));
    }

    #[test]
    fn test_wrong_connector_name_rejected() {
        let props = base_properties().with("connector.name", "sqlserver");
        assert!(KustoConfig::from_properties(&props).is_err());
    }

    #[test]
    fn test_host_name_with_scheme_rejected() {
        let props = base_properties().with("kusto.host-name", "https://help.kusto.windows.net");
        assert!(KustoConfig::from_properties(&props).is_err());
    }

    #[test]
    fn test_malformed_authority_host_rejected() {
        let props = base_properties().with("kusto.authority-host", "not a url");
        let err = KustoConfig::from_properties(&props).unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn test_debug_redacts_app_key() {
        let config = KustoConfig::from_properties(&base_properties()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("help.kusto.windows.net"));
    }

    #[test]
    fn from_env_with_all_vars() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("KUSTO_HOST_NAME", "mycluster.westeurope.kusto.windows.net");
            std::env::set_var("KUSTO_DATABASE", "Telemetry");
            std::env::set_var("KUSTO_APP_ID", "app");
            std::env::set_var("KUSTO_APP_KEY", "secret");
            std::env::set_var("KUSTO_TENANT_ID", "tenant");
            std::env::set_var("KUSTO_PORT", "1434");
        }

        let config = KustoConfig::from_env().unwrap();
        assert_eq!(config.host_name, "mycluster.westeurope.kusto.windows.net");
        assert_eq!(config.database, "Telemetry");
        assert_eq!(config.port, 1434);

        clear_env();
    }

    #[test]
    fn from_env_missing_host_name() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("KUSTO_DATABASE", "Telemetry");
        }

        assert!(KustoConfig::from_env().is_err());

        clear_env();
    }
}
