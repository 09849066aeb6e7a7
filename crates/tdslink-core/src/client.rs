//! The client extension points a connector exposes to the query engine.
//!
//! [`JdbcClient`] carries the base behaviour as default methods; connectors
//! override the handful that differ for their dialect (rename statements,
//! catalog pinning).

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{close_after, Connection, ConnectionFactory, SchemaTableName, Statement};
use crate::error::Result;
use crate::identity::Identity;

/// Schema hidden from every schema listing.
pub const INFORMATION_SCHEMA: &str = "information_schema";

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// A table as resolved by the connector: the caller-facing name plus the
/// remote catalog/schema/table it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JdbcTableHandle {
    pub connector_id: String,
    pub schema_table_name: SchemaTableName,
    pub catalog_name: Option<String>,
    pub schema_name: String,
    pub table_name: String,
}

impl JdbcTableHandle {
    pub fn new(
        connector_id: impl Into<String>,
        catalog_name: Option<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        let schema_name = schema_name.into();
        let table_name = table_name.into();
        Self {
            connector_id: connector_id.into(),
            schema_table_name: SchemaTableName::new(
                schema_name.to_lowercase(),
                table_name.to_lowercase(),
            ),
            catalog_name,
            schema_name,
            table_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JdbcColumnHandle {
    pub connector_id: String,
    pub column_name: String,
}

impl JdbcColumnHandle {
    pub fn new(connector_id: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            column_name: column_name.into(),
        }
    }
}

/// A unit of scan work assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JdbcSplit {
    pub connector_id: String,
    pub catalog_name: Option<String>,
    pub schema_name: String,
    pub table_name: String,
    pub additional_predicate: Option<String>,
}

impl JdbcSplit {
    pub fn for_table(handle: &JdbcTableHandle) -> Self {
        Self {
            connector_id: handle.connector_id.clone(),
            catalog_name: handle.catalog_name.clone(),
            schema_name: handle.schema_name.clone(),
            table_name: handle.table_name.clone(),
            additional_predicate: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JdbcClient: Send + Sync {
    fn connector_id(&self) -> &str;

    fn connection_factory(&self) -> &dyn ConnectionFactory;

    /// Quote string for identifiers in generated SQL.
    fn identifier_quote(&self) -> &str {
        "\""
    }

    fn quoted(&self, name: &str) -> String {
        let quote = self.identifier_quote();
        format!("{}{}{}", quote, name.replace(quote, &format!("{quote}{quote}")), quote)
    }

    /// Connection used to scan `split`.
    async fn get_connection(
        &self,
        identity: &Identity,
        _split: &JdbcSplit,
    ) -> Result<Box<dyn Connection>> {
        self.connection_factory().open_connection(identity).await
    }

    async fn get_prepared_statement(
        &self,
        _connection: &mut dyn Connection,
        sql: &str,
    ) -> Result<Statement> {
        debug!("Preparing statement: {}", sql);
        Ok(Statement::new(sql))
    }

    /// Schema names on `connection`, without `information_schema`.
    async fn list_schemas(&self, connection: &mut dyn Connection) -> Result<BTreeSet<String>> {
        read_schema_names(connection).await
    }

    /// Caller-facing (lowercased) schema names.
    async fn get_schema_names(&self, identity: &Identity) -> Result<BTreeSet<String>> {
        let mut connection = self.connection_factory().open_connection(identity).await?;
        let result = self
            .list_schemas(connection.as_mut())
            .await
            .map(|names| names.into_iter().map(|s| s.to_lowercase()).collect());
        close_after(connection, result).await
    }

    async fn get_table_names(
        &self,
        identity: &Identity,
        schema: Option<&str>,
    ) -> Result<Vec<SchemaTableName>> {
        let mut connection = self.connection_factory().open_connection(identity).await?;
        let result = async {
            let remote_schema = match schema {
                Some(name) => Some(self.to_remote_schema_name(connection.as_mut(), name).await?),
                None => None,
            };
            read_table_names(connection.as_mut(), remote_schema.as_deref()).await
        }
        .await;
        close_after(connection, result).await
    }

    /// Map a caller-facing schema name to the name stored remotely.
    ///
    /// Matches case-insensitively against the remote schema list and falls
    /// back to the name as given.
    async fn to_remote_schema_name(
        &self,
        connection: &mut dyn Connection,
        schema_name: &str,
    ) -> Result<String> {
        let remote = connection.list_schemas().await?;
        Ok(remote
            .into_iter()
            .find(|s| s.eq_ignore_ascii_case(schema_name))
            .unwrap_or_else(|| schema_name.to_string()))
    }

    async fn rename_table(
        &self,
        identity: &Identity,
        catalog_name: Option<&str>,
        old_table: &SchemaTableName,
        new_table: &SchemaTableName,
    ) -> Result<()> {
        let mut target = String::new();
        if let Some(catalog) = catalog_name {
            target.push_str(&self.quoted(catalog));
            target.push('.');
        }
        target.push_str(&self.quoted(old_table.schema_name()));
        target.push('.');
        target.push_str(&self.quoted(old_table.table_name()));
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            target,
            self.quoted(new_table.table_name())
        );
        execute_with(self.connection_factory(), identity, &sql).await
    }

    async fn rename_column(
        &self,
        identity: &Identity,
        handle: &JdbcTableHandle,
        column: &JdbcColumnHandle,
        new_column_name: &str,
    ) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {}.{} RENAME COLUMN {} TO {}",
            self.quoted(&handle.schema_name),
            self.quoted(&handle.table_name),
            self.quoted(&column.column_name),
            self.quoted(new_column_name)
        );
        execute_with(self.connection_factory(), identity, &sql).await
    }
}

// ---------------------------------------------------------------------------
// Shared building blocks
// ---------------------------------------------------------------------------

/// Remote schema names minus `information_schema` (any case), deduplicated.
pub async fn read_schema_names(connection: &mut dyn Connection) -> Result<BTreeSet<String>> {
    let names = connection.list_schemas().await?;
    Ok(names
        .into_iter()
        .filter(|name| !name.eq_ignore_ascii_case(INFORMATION_SCHEMA))
        .collect())
}

/// Tables in `remote_schema` (all schemas when `None`), both name parts
/// lowercased.
pub async fn read_table_names(
    connection: &mut dyn Connection,
    remote_schema: Option<&str>,
) -> Result<Vec<SchemaTableName>> {
    let tables = connection.list_tables(remote_schema, None).await?;
    Ok(tables
        .into_iter()
        .map(|t| {
            debug!(
                "Remote schema {}: table {} in schema {}",
                remote_schema.unwrap_or("<all>"),
                t.name,
                t.schema
            );
            SchemaTableName::new(t.schema.to_lowercase(), t.name.to_lowercase())
        })
        .collect())
}

/// Open a connection for `identity`, run `sql` on it and close it.
pub async fn execute_with(
    factory: &dyn ConnectionFactory,
    identity: &Identity,
    sql: &str,
) -> Result<()> {
    let mut connection = factory.open_connection(identity).await?;
    debug!("Executing on {}: {}", connection.id(), sql);
    let result = connection.execute(sql).await.map(|_| ());
    close_after(connection, result).await
}
