//! Connection factory that logs in to a Kusto cluster with an Entra ID
//! access token.

use std::sync::Arc;

use async_trait::async_trait;
use tdslink_core::factory::DEFAULT_APPLICATION_NAME;
use tdslink_core::{
    close_after, ConnectParams, Connection, ConnectionFactory, ConnectorError, Credential, Driver,
    Identity, Result,
};
use tracing::{debug, info};

use crate::cache::TokenCache;
use crate::config::KustoConfig;
use crate::oauth::{scope_for_host, AccessToken, ClientCredentials, TokenClient, TokenProvider};

/// Opens TDS connections to `kusto.host-name` authenticated with an OAuth2
/// client-credentials token, pinned to `kusto.database`.
///
/// Holds no per-caller state: app id, secret and tenant are resolved from the
/// [`Identity`] of each call, so one factory can serve concurrent callers.
pub struct KustoConnectionFactory {
    config: Arc<KustoConfig>,
    driver: Arc<dyn Driver>,
    tokens: Arc<dyn TokenProvider>,
}

impl KustoConnectionFactory {
    /// Factory fetching tokens from `kusto.authority-host`.
    pub fn new(config: Arc<KustoConfig>, driver: Arc<dyn Driver>) -> Result<Self> {
        let client = TokenClient::new(config.authority_host.clone(), config.token_request_timeout())?;
        Ok(Self::with_token_provider(config, driver, Arc::new(client)))
    }

    /// Factory fetching tokens from `provider`, cached unless
    /// `kusto.token-cache-enabled` is false.
    pub fn with_token_provider(
        config: Arc<KustoConfig>,
        driver: Arc<dyn Driver>,
        provider: Arc<dyn TokenProvider>,
    ) -> Self {
        let tokens: Arc<dyn TokenProvider> = if config.token_cache_enabled {
            Arc::new(TokenCache::new(provider))
        } else {
            provider
        };
        Self {
            config,
            driver,
            tokens,
        }
    }

    pub fn config(&self) -> &KustoConfig {
        &self.config
    }

    pub fn scope(&self) -> String {
        scope_for_host(&self.config.host_name)
    }

    /// Effective app id, secret and tenant for `identity`.
    pub fn resolve_credentials(&self, identity: &Identity) -> Result<ClientCredentials> {
        let missing = |what: &str| {
            ConnectorError::Authentication(format!(
                "no {} available for user '{}'",
                what,
                identity.user()
            ))
        };
        Ok(ClientCredentials {
            client_id: self.config.app_id().resolve(identity).ok_or_else(|| missing("app id"))?,
            client_secret: self
                .config
                .app_key()
                .resolve(identity)
                .ok_or_else(|| missing("app key"))?,
            tenant_id: self
                .config
                .tenant_id()
                .resolve(identity)
                .ok_or_else(|| missing("tenant id"))?,
        })
    }

    pub async fn acquire_token(&self, identity: &Identity) -> Result<AccessToken> {
        let credentials = self.resolve_credentials(identity)?;
        self.tokens.acquire(&credentials, &self.scope()).await
    }

    fn connect_params(&self, token: &AccessToken) -> ConnectParams {
        ConnectParams {
            host: self.config.host_name.clone(),
            port: self.config.port,
            instance: None,
            database: Some(self.config.database.clone()),
            credential: Credential::AccessToken(token.secret().to_string()),
            encrypt: true,
            trust_server_certificate: false,
            host_name_in_certificate: Some(self.config.host_name_in_certificate.clone()),
            application_name: Some(DEFAULT_APPLICATION_NAME.to_string()),
        }
    }
}

#[async_trait]
impl ConnectionFactory for KustoConnectionFactory {
    async fn open_connection(&self, identity: &Identity) -> Result<Box<dyn Connection>> {
        let token = self.acquire_token(identity).await?;
        debug!(
            "Connecting to {}:{} database {} for user {}",
            self.config.host_name,
            self.config.port,
            self.config.database,
            identity.user()
        );

        let mut connection = self.driver.connect(&self.connect_params(&token)).await?;
        if connection.is_closed() {
            return Err(ConnectorError::InvalidState(format!(
                "driver returned an unusable connection to {}",
                self.config.host_name
            )));
        }

        if let Err(e) = connection.set_schema(&self.config.database).await {
            return close_after(connection, Err(e)).await;
        }

        info!(
            "Opened Kusto connection {} to {}/{}",
            connection.id(),
            self.config.host_name,
            self.config.database
        );
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tdslink_core::mock::{MockBackend, MockCall, MockDriver};
    use tdslink_core::Properties;

    /// Issues `token-for-{client_id}` and records every request.
    #[derive(Default)]
    struct StubTokens {
        calls: AtomicUsize,
        requests: std::sync::Mutex<Vec<(ClientCredentials, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl TokenProvider for StubTokens {
        async fn acquire(&self, credentials: &ClientCredentials, scope: &str) -> Result<AccessToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .unwrap()
                .push((credentials.clone(), scope.to_string()));
            if self.fail {
                return Err(ConnectorError::Authentication("invalid_client".to_string()));
            }
            Ok(AccessToken::new(
                format!("token-for-{}", credentials.client_id),
                Utc::now() + chrono::Duration::hours(1),
            ))
        }
    }

    fn config(extra: &[(&str, &str)]) -> Arc<KustoConfig> {
        let mut props = Properties::new()
            .with("kusto.host-name", "help.kusto.windows.net")
            .with("kusto.database", "Samples")
            .with("kusto.app-id", "app")
            .with("kusto.app-key", "secret")
            .with("kusto.tenant-id", "contoso");
        for (k, v) in extra {
            props.set(*k, *v);
        }
        Arc::new(KustoConfig::from_properties(&props).unwrap())
    }

    fn factory(
        config: Arc<KustoConfig>,
        backend: &MockBackend,
        tokens: Arc<StubTokens>,
    ) -> KustoConnectionFactory {
        KustoConnectionFactory::with_token_provider(
            config,
            Arc::new(MockDriver::new(backend.clone())),
            tokens,
        )
    }

    #[tokio::test]
    async fn test_open_connection_presents_token_and_pins_schema() {
        let backend = MockBackend::new();
        let tokens = Arc::new(StubTokens::default());
        let factory = factory(config(&[]), &backend, tokens.clone());

        let connection = factory
            .open_connection(&Identity::new("alice"))
            .await
            .unwrap();
        assert!(!connection.is_closed());
        assert_eq!(connection.schema(), Some("Samples"));

        let params = backend.connect_params();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].host, "help.kusto.windows.net");
        assert_eq!(params[0].port, 1433);
        assert_eq!(params[0].database.as_deref(), Some("Samples"));
        assert_eq!(params[0].credential, Credential::AccessToken("token-for-app".to_string()));
        assert!(params[0].encrypt);
        assert_eq!(
            params[0].host_name_in_certificate.as_deref(),
            Some("*.kusto.windows.net")
        );
        assert_eq!(backend.calls(), vec![MockCall::SetSchema("Samples".to_string())]);

        let requests = tokens.requests.lock().unwrap();
        assert_eq!(requests[0].1, "https://help.kusto.windows.net/.default");
        assert_eq!(requests[0].0.tenant_id, "contoso");
        assert_eq!(requests[0].0.client_secret, "secret");
    }

    #[tokio::test]
    async fn test_extra_credentials_override_configured_values() {
        let backend = MockBackend::new();
        let tokens = Arc::new(StubTokens::default());
        let config = config(&[
            ("kusto.app-id-credential-name", "kusto_app_id"),
            ("kusto.app-key-credential-name", "kusto_app_key"),
        ]);
        let factory = factory(config, &backend, tokens.clone());

        let identity = Identity::new("bob")
            .with_extra_credential("kusto_app_id", "bob-app")
            .with_extra_credential("kusto_app_key", "bob-secret");
        factory.open_connection(&identity).await.unwrap();

        let requests = tokens.requests.lock().unwrap();
        assert_eq!(requests[0].0.client_id, "bob-app");
        assert_eq!(requests[0].0.client_secret, "bob-secret");
        assert_eq!(requests[0].0.tenant_id, "contoso");
    }

    #[tokio::test]
    async fn test_missing_named_credential_is_authentication_error() {
        let props = Properties::new()
            .with("kusto.host-name", "help.kusto.windows.net")
            .with("kusto.database", "Samples")
            .with("kusto.app-id-credential-name", "kusto_app_id")
            .with("kusto.app-key", "secret")
            .with("kusto.tenant-id", "contoso");
        let config = Arc::new(KustoConfig::from_properties(&props).unwrap());
        let backend = MockBackend::new();
        let factory = factory(config, &backend, Arc::new(StubTokens::default()));

        let err = factory
            .open_connection(&Identity::new("carol"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
        assert!(backend.connect_params().is_empty());
    }

    #[tokio::test]
    async fn test_token_failure_opens_no_connection() {
        let backend = MockBackend::new();
        let tokens = Arc::new(StubTokens {
            fail: true,
            ..Default::default()
        });
        let factory = factory(config(&[]), &backend, tokens);

        let err = factory
            .open_connection(&Identity::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
        assert!(backend.connect_params().is_empty());
    }

    #[tokio::test]
    async fn test_unusable_connection_is_invalid_state() {
        let backend = MockBackend::new().connecting_closed();
        let factory = factory(config(&[]), &backend, Arc::new(StubTokens::default()));

        let err = factory
            .open_connection(&Identity::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_schema_failure_closes_connection_once() {
        let backend = MockBackend::new().failing_set_schema("database not found");
        let factory = factory(config(&[]), &backend, Arc::new(StubTokens::default()));

        let err = factory
            .open_connection(&Identity::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::QueryFailed(_)));
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test]
    async fn test_tokens_cached_across_opens() {
        let backend = MockBackend::new();
        let tokens = Arc::new(StubTokens::default());
        let factory = factory(config(&[]), &backend, tokens.clone());

        factory.open_connection(&Identity::new("alice")).await.unwrap();
        factory.open_connection(&Identity::new("alice")).await.unwrap();

        assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.connect_params().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_disabled_fetches_every_time() {
        let backend = MockBackend::new();
        let tokens = Arc::new(StubTokens::default());
        let factory = factory(
            config(&[("kusto.token-cache-enabled", "false")]),
            &backend,
            tokens.clone(),
        );

        factory.open_connection(&Identity::new("alice")).await.unwrap();
        factory.open_connection(&Identity::new("alice")).await.unwrap();

        assert_eq!(tokens.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_opens_keep_identities_apart() {
        let backend = MockBackend::new();
        let config = config(&[("kusto.app-id-credential-name", "kusto_app_id")]);
        let factory = Arc::new(factory(config, &backend, Arc::new(StubTokens::default())));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let factory = factory.clone();
                tokio::spawn(async move {
                    let identity = Identity::new(format!("user{i}"))
                        .with_extra_credential("kusto_app_id", format!("app{i}"));
                    factory.open_connection(&identity).await.map(|_| ())
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut tokens: Vec<String> = backend
            .connect_params()
            .into_iter()
            .map(|p| match p.credential {
                Credential::AccessToken(t) => t,
                other => panic!("unexpected credential {:?}", other),
            })
            .collect();
        tokens.sort();
        let mut expected: Vec<String> = (0..16).map(|i| format!("token-for-app{i}")).collect();
        expected.sort();
        assert_eq!(tokens, expected);
    }
}
