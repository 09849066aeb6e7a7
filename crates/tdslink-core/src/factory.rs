//! Driver-backed connection factory using login credentials.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::connection::{ConnectParams, Connection, ConnectionFactory, Credential, Driver};
use crate::connection_url::ConnectionUrl;
use crate::error::{ConnectorError, Result};
use crate::identity::{CredentialLookup, Identity};

pub const DEFAULT_APPLICATION_NAME: &str = "tdslink";

/// Opens driver connections to the server named by a [`ConnectionUrl`],
/// logging in with a user/password pair resolved per call.
///
/// User and password can each be configured literally or looked up in the
/// caller's extra credentials (see [`CredentialLookup`]).
pub struct DriverConnectionFactory {
    driver: Arc<dyn Driver>,
    url: ConnectionUrl,
    user: CredentialLookup,
    password: CredentialLookup,
    trust_server_certificate: bool,
}

impl DriverConnectionFactory {
    pub fn new(
        driver: Arc<dyn Driver>,
        url: ConnectionUrl,
        user: CredentialLookup,
        password: CredentialLookup,
    ) -> Self {
        Self {
            driver,
            url,
            user,
            password,
            trust_server_certificate: false,
        }
    }

    pub fn with_trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    pub fn url(&self) -> &ConnectionUrl {
        &self.url
    }

    /// Parameters for one connection on behalf of `identity`.
    pub fn connect_params(&self, identity: &Identity) -> Result<ConnectParams> {
        let user = self
            .user
            .resolve(identity)
            .or_else(|| self.url.property("user").map(str::to_string))
            .ok_or_else(|| {
                ConnectorError::Authentication(format!(
                    "no user name available for {} (identity {})",
                    self.url.host(),
                    identity.user()
                ))
            })?;
        let password = self
            .password
            .resolve(identity)
            .or_else(|| self.url.property("password").map(str::to_string))
            .unwrap_or_default();

        Ok(ConnectParams {
            host: self.url.host().to_string(),
            port: self.url.port(),
            instance: self.url.instance().map(str::to_string),
            database: self.url.database().map(str::to_string),
            credential: Credential::UserPassword { user, password },
            encrypt: self.url.flag("encrypt").unwrap_or(true),
            trust_server_certificate: self.trust_server_certificate
                || self.url.flag("trustServerCertificate").unwrap_or(false),
            host_name_in_certificate: self.url.property("hostNameInCertificate").map(str::to_string),
            application_name: Some(
                self.url
                    .property("applicationName")
                    .unwrap_or(DEFAULT_APPLICATION_NAME)
                    .to_string(),
            ),
        })
    }
}

#[async_trait]
impl ConnectionFactory for DriverConnectionFactory {
    async fn open_connection(&self, identity: &Identity) -> Result<Box<dyn Connection>> {
        let params = self.connect_params(identity)?;
        debug!(
            "Opening connection to {}:{} for {}",
            params.host,
            params.port,
            identity.user()
        );
        self.driver.connect(&params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockDriver};

    fn factory(user: CredentialLookup, password: CredentialLookup) -> (MockBackend, DriverConnectionFactory) {
        let backend = MockBackend::new();
        let url = ConnectionUrl::parse("jdbc:sqlserver://sql.local:1433;database=sales").unwrap();
        let factory =
            DriverConnectionFactory::new(Arc::new(MockDriver::new(backend.clone())), url, user, password);
        (backend, factory)
    }

    #[test]
    fn test_connect_params_from_literals() {
        let (_, factory) = factory(CredentialLookup::literal("sa"), CredentialLookup::literal("pw"));
        let params = factory.connect_params(&Identity::new("alice")).unwrap();
        assert_eq!(params.host, "sql.local");
        assert_eq!(params.port, 1433);
        assert_eq!(params.database.as_deref(), Some("sales"));
        assert_eq!(
            params.credential,
            Credential::UserPassword {
                user: "sa".to_string(),
                password: "pw".to_string()
            }
        );
        assert!(params.encrypt);
        assert!(!params.trust_server_certificate);
        assert_eq!(params.application_name.as_deref(), Some(DEFAULT_APPLICATION_NAME));
    }

    #[test]
    fn test_application_name_from_url() {
        let url =
            ConnectionUrl::parse("jdbc:sqlserver://sql.local;applicationName=nightly-export").unwrap();
        let factory = DriverConnectionFactory::new(
            Arc::new(MockDriver::new(MockBackend::new())),
            url,
            CredentialLookup::literal("sa"),
            CredentialLookup::literal("pw"),
        );
        let params = factory.connect_params(&Identity::new("alice")).unwrap();
        assert_eq!(params.application_name.as_deref(), Some("nightly-export"));
    }

    #[test]
    fn test_connect_params_from_extra_credentials() {
        let (_, factory) = factory(
            CredentialLookup::new(Some("sa".into()), Some("user".into())),
            CredentialLookup::by_name("password"),
        );
        let identity = Identity::new("alice")
            .with_extra_credential("user", "alice_sql")
            .with_extra_credential("password", "secret");
        let params = factory.connect_params(&identity).unwrap();
        assert_eq!(
            params.credential,
            Credential::UserPassword {
                user: "alice_sql".to_string(),
                password: "secret".to_string()
            }
        );
    }

    #[test]
    fn test_missing_user_is_authentication_error() {
        let (_, factory) = factory(CredentialLookup::default(), CredentialLookup::default());
        let err = factory.connect_params(&Identity::new("alice")).unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_open_connection_uses_driver() {
        let (backend, factory) = factory(CredentialLookup::literal("sa"), CredentialLookup::literal("pw"));
        let mut conn = factory.open_connection(&Identity::new("alice")).await.unwrap();
        assert!(!conn.is_closed());
        conn.close().await.unwrap();
        assert_eq!(backend.connect_params().len(), 1);
        assert_eq!(backend.close_count(), 1);
    }
}
