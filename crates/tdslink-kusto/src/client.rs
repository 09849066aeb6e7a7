use std::sync::Arc;

use async_trait::async_trait;
use tdslink_core::client::execute_with;
use tdslink_core::dialect::{rename_column_sql, rename_table_sql};
use tdslink_core::{
    ConnectionFactory, Driver, Identity, JdbcClient, JdbcColumnHandle, JdbcTableHandle, Result,
    SchemaTableName, TdsDriver,
};

use crate::config::KustoConfig;
use crate::factory::KustoConnectionFactory;

/// Kusto client: base listing behaviour over the token-authenticated
/// factory, with `sp_rename` for renames.
pub struct KustoClient {
    connector_id: String,
    factory: KustoConnectionFactory,
}

impl KustoClient {
    pub fn new(connector_id: impl Into<String>, factory: KustoConnectionFactory) -> Self {
        Self {
            connector_id: connector_id.into(),
            factory,
        }
    }

    /// Client speaking TDS to the configured cluster.
    pub fn connect(connector_id: impl Into<String>, config: KustoConfig) -> Result<Self> {
        let driver: Arc<dyn Driver> = Arc::new(TdsDriver);
        let factory = KustoConnectionFactory::new(Arc::new(config), driver)?;
        Ok(Self::new(connector_id, factory))
    }

    pub fn factory(&self) -> &KustoConnectionFactory {
        &self.factory
    }

    // Renames without an explicit catalog target the configured database.
    fn catalog_or_default<'a>(&'a self, catalog_name: Option<&'a str>) -> &'a str {
        catalog_name.unwrap_or(&self.factory.config().database)
    }
}

#[async_trait]
impl JdbcClient for KustoClient {
    fn connector_id(&self) -> &str {
        &self.connector_id
    }

    fn connection_factory(&self) -> &dyn ConnectionFactory {
        &self.factory
    }

    async fn rename_table(
        &self,
        identity: &Identity,
        catalog_name: Option<&str>,
        old_table: &SchemaTableName,
        new_table: &SchemaTableName,
    ) -> Result<()> {
        let sql = rename_table_sql(
            self.catalog_or_default(catalog_name),
            old_table.schema_name(),
            old_table.table_name(),
            new_table.table_name(),
        );
        execute_with(&self.factory, identity, &sql).await
    }

    async fn rename_column(
        &self,
        identity: &Identity,
        handle: &JdbcTableHandle,
        column: &JdbcColumnHandle,
        new_column_name: &str,
    ) -> Result<()> {
        let sql = rename_column_sql(
            self.catalog_or_default(handle.catalog_name.as_deref()),
            &handle.schema_name,
            &handle.table_name,
            &column.column_name,
            new_column_name,
        );
        execute_with(&self.factory, identity, &sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{AccessToken, ClientCredentials, TokenProvider};
    use chrono::Utc;
    use tdslink_core::mock::{MockBackend, MockCall, MockDriver};
    use tdslink_core::Properties;

    struct FixedToken;

    #[async_trait]
    impl TokenProvider for FixedToken {
        async fn acquire(&self, _: &ClientCredentials, _: &str) -> Result<AccessToken> {
            Ok(AccessToken::new("t", Utc::now() + chrono::Duration::hours(1)))
        }
    }

    fn client(backend: &MockBackend) -> KustoClient {
        let props = Properties::new()
            .with("kusto.host-name", "help.kusto.windows.net")
            .with("kusto.database", "Samples")
            .with("kusto.app-id", "app")
            .with("kusto.app-key", "secret")
            .with("kusto.tenant-id", "contoso");
        let config = Arc::new(KustoConfig::from_properties(&props).unwrap());
        let factory = KustoConnectionFactory::with_token_provider(
            config,
            Arc::new(MockDriver::new(backend.clone())),
            Arc::new(FixedToken),
        );
        KustoClient::new("kusto", factory)
    }

    #[tokio::test]
    async fn test_rename_table_uses_sp_rename() {
        let backend = MockBackend::new();
        let client = client(&backend);

        client
            .rename_table(
                &Identity::new("alice"),
                Some("cat"),
                &SchemaTableName::new("sch", "old"),
                &SchemaTableName::new("sch", "new"),
            )
            .await
            .unwrap();

        assert_eq!(backend.executed(), vec!["sp_rename 'cat.sch.old', 'new'"]);
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test]
    async fn test_rename_table_defaults_catalog_to_database() {
        let backend = MockBackend::new();
        let client = client(&backend);

        client
            .rename_table(
                &Identity::new("alice"),
                None,
                &SchemaTableName::new("dbo", "events"),
                &SchemaTableName::new("dbo", "events_v2"),
            )
            .await
            .unwrap();

        assert_eq!(
            backend.executed(),
            vec!["sp_rename 'Samples.dbo.events', 'events_v2'"]
        );
    }

    #[tokio::test]
    async fn test_rename_column_uses_sp_rename_column() {
        let backend = MockBackend::new();
        let client = client(&backend);
        let handle = JdbcTableHandle::new("kusto", Some("cat".to_string()), "sch", "t");
        let column = JdbcColumnHandle::new("kusto", "c");

        client
            .rename_column(&Identity::new("alice"), &handle, &column, "d")
            .await
            .unwrap();

        assert_eq!(backend.executed(), vec!["sp_rename 'cat.sch.t.c', 'd', 'COLUMN'"]);
    }

    #[tokio::test]
    async fn test_table_names_lowercased() {
        let backend = MockBackend::new()
            .with_schemas(&["Samples"])
            .with_table("Samples", "StormEvents")
            .with_table("Samples", "PopulationData");
        let client = client(&backend);

        let tables = client
            .get_table_names(&Identity::new("alice"), Some("samples"))
            .await
            .unwrap();

        assert_eq!(
            tables,
            vec![
                SchemaTableName::new("samples", "stormevents"),
                SchemaTableName::new("samples", "populationdata"),
            ]
        );
        assert!(backend.calls().contains(&MockCall::ListTables {
            schema: Some("Samples".to_string()),
            table: None,
        }));
        assert_eq!(backend.close_count(), 1);
    }
}
