//! Connection, driver and factory abstractions.
//!
//! A [`Driver`] turns [`ConnectParams`] into a live [`Connection`]; a
//! [`ConnectionFactory`] decides which parameters (and which credentials) to
//! use for a given caller [`Identity`]. Connections are owned values: whoever
//! holds one last must call [`Connection::close`] on every exit path.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::identity::Identity;

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// A fully qualified (schema, table) pair as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaTableName {
    schema_name: String,
    table_name: String,
}

impl SchemaTableName {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl fmt::Display for SchemaTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema_name, self.table_name)
    }
}

/// A table as reported by the remote catalog metadata, names as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTable {
    pub catalog: Option<String>,
    pub schema: String,
    pub name: String,
    pub table_type: String,
}

/// A statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

/// A prepared statement: SQL text with positional parameters (`@P1`, `@P2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, param: impl Into<SqlParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}

/// Rows of a query result, every value rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    /// Index of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Connection parameters
// ---------------------------------------------------------------------------

/// How a connection proves its identity to the server.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// SQL Server login.
    UserPassword { user: String, password: String },
    /// OAuth2 bearer token presented in place of a login.
    AccessToken(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::UserPassword { user, .. } => f
                .debug_struct("UserPassword")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Credential::AccessToken(_) => f.debug_tuple("AccessToken").field(&"***").finish(),
        }
    }
}

/// Everything a driver needs to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub instance: Option<String>,
    pub database: Option<String>,
    pub credential: Credential,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    /// Pattern the server's host name must match before the TLS handshake,
    /// e.g. `*.kusto.windows.net`.
    pub host_name_in_certificate: Option<String>,
    pub application_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A live session with a remote database.
#[async_trait]
pub trait Connection: Send {
    /// Driver-assigned id, for log correlation.
    fn id(&self) -> &str;

    fn is_closed(&self) -> bool;

    fn is_read_only(&self) -> bool;

    /// Mark the session read-only; [`Connection::execute`] is refused afterwards.
    fn set_read_only(&mut self, read_only: bool) -> Result<()>;

    /// The active catalog (database), if known.
    fn catalog(&self) -> Option<&str>;

    async fn set_catalog(&mut self, catalog: &str) -> Result<()>;

    /// The active schema, if one was set.
    fn schema(&self) -> Option<&str>;

    async fn set_schema(&mut self, schema: &str) -> Result<()>;

    /// Run a statement directly; returns the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    async fn query(&mut self, statement: &Statement) -> Result<ResultSet>;

    /// Schema names from the catalog metadata, as stored.
    async fn list_schemas(&mut self) -> Result<Vec<String>>;

    /// Tables (and views) from the catalog metadata, optionally restricted
    /// to one schema and/or table name.
    async fn list_tables(
        &mut self,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<RemoteTable>>;

    /// Close the session. Closing an already closed connection is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Opens connections given fully resolved parameters.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Connection>>;
}

/// Produces connections for a caller identity.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open_connection(&self, identity: &Identity) -> Result<Box<dyn Connection>>;
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .field("read_only", &self.is_read_only())
            .field("catalog", &self.catalog())
            .field("schema", &self.schema())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Force the session's catalog and schema.
pub async fn pin_context(connection: &mut dyn Connection, catalog: &str, schema: &str) -> Result<()> {
    connection.set_catalog(catalog).await?;
    connection.set_schema(schema).await?;
    Ok(())
}

/// Close `connection` and hand back `result`.
///
/// An error from `result` wins over an error from closing; a close error is
/// only surfaced when the operation itself succeeded.
pub async fn close_after<T>(mut connection: Box<dyn Connection>, result: Result<T>) -> Result<T> {
    let closed = connection.close().await;
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(
                "Failed to close connection {} after error: {}",
                connection.id(),
                close_err
            );
            Err(e)
        }
    }
}
