//! SQL Server client.
//!
//! The driver's default database for a login does not have to be the one the
//! catalog is configured for, so every connection handed out, every prepared
//! statement and every metadata listing first forces the configured catalog
//! and schema onto the session.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tdslink_core::client::{execute_with, read_schema_names, read_table_names};
use tdslink_core::dialect::{rename_column_sql, rename_table_sql};
use tdslink_core::{
    close_after, pin_context, Connection, ConnectionFactory, Driver, DriverConnectionFactory,
    Identity, JdbcClient, JdbcColumnHandle, JdbcSplit, JdbcTableHandle, Result, SchemaTableName,
    Statement, TdsDriver,
};
use tracing::{debug, info};

use crate::config::SqlServerConfig;

pub struct SqlServerClient {
    connector_id: String,
    factory: DriverConnectionFactory,
    catalog: String,
    schema: String,
}

impl SqlServerClient {
    pub fn new(
        connector_id: impl Into<String>,
        factory: DriverConnectionFactory,
        catalog: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            factory,
            catalog: catalog.into(),
            schema: schema.into(),
        }
    }

    /// Client for `config` on top of `driver`.
    pub fn from_config(
        connector_id: impl Into<String>,
        config: &SqlServerConfig,
        driver: Arc<dyn Driver>,
    ) -> Result<Self> {
        let factory = DriverConnectionFactory::new(driver, config.url()?, config.user(), config.password())
            .with_trust_server_certificate(config.trust_server_certificate);
        Ok(Self::new(
            connector_id,
            factory,
            config.effective_catalog()?,
            config.schema.clone(),
        ))
    }

    /// Client speaking TDS to the server in `connection-url`.
    pub fn connect(connector_id: impl Into<String>, config: &SqlServerConfig) -> Result<Self> {
        Self::from_config(connector_id, config, Arc::new(TdsDriver))
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn pin(&self, connection: &mut dyn Connection) -> Result<()> {
        pin_context(connection, &self.catalog, &self.schema).await
    }
}

#[async_trait]
impl JdbcClient for SqlServerClient {
    fn connector_id(&self) -> &str {
        &self.connector_id
    }

    fn connection_factory(&self) -> &dyn ConnectionFactory {
        &self.factory
    }

    /// Read-only session pinned to the configured catalog and schema. The
    /// connection is closed if any step fails.
    async fn get_connection(
        &self,
        identity: &Identity,
        split: &JdbcSplit,
    ) -> Result<Box<dyn Connection>> {
        let mut connection = self.factory.open_connection(identity).await?;
        info!(
            "Pinning connection {} to {}.{} for {}.{}",
            connection.id(),
            self.catalog,
            self.schema,
            split.schema_name,
            split.table_name
        );
        let pinned = match connection.set_read_only(true) {
            Ok(()) => self.pin(connection.as_mut()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = pinned {
            return close_after(connection, Err(e)).await;
        }
        Ok(connection)
    }

    async fn get_prepared_statement(
        &self,
        connection: &mut dyn Connection,
        sql: &str,
    ) -> Result<Statement> {
        self.pin(connection).await?;
        debug!("Preparing statement on {}: {}", connection.id(), sql);
        Ok(Statement::new(sql))
    }

    async fn list_schemas(&self, connection: &mut dyn Connection) -> Result<BTreeSet<String>> {
        self.pin(connection).await?;
        read_schema_names(connection).await
    }

    async fn get_table_names(
        &self,
        identity: &Identity,
        schema: Option<&str>,
    ) -> Result<Vec<SchemaTableName>> {
        let mut connection = self.factory.open_connection(identity).await?;
        let result = async {
            self.pin(connection.as_mut()).await?;
            let remote_schema = match schema {
                Some(name) => Some(self.to_remote_schema_name(connection.as_mut(), name).await?),
                None => None,
            };
            read_table_names(connection.as_mut(), remote_schema.as_deref()).await
        }
        .await;
        close_after(connection, result).await
    }

    async fn rename_table(
        &self,
        identity: &Identity,
        catalog_name: Option<&str>,
        old_table: &SchemaTableName,
        new_table: &SchemaTableName,
    ) -> Result<()> {
        let sql = rename_table_sql(
            catalog_name.unwrap_or(&self.catalog),
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
            handle.catalog_name.as_deref().unwrap_or(&self.catalog),
            &handle.schema_name,
            &handle.table_name,
            &column.column_name,
            new_column_name,
        );
        execute_with(&self.factory, identity, &sql).await
    }
}
