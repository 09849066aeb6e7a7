//! TDS driver backed by `tiberius`.
//!
//! Speaks to SQL Server and to the Kusto (Azure Data Explorer) SQL endpoint.
//! Login uses either SQL credentials or an Azure AD access token.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{
    ConnectParams, Connection, Credential, Driver, RemoteTable, ResultSet, SqlParam, Statement,
};
use crate::dialect::{is_read_statement, quote_bracket};
use crate::error::{ConnectorError, Result};

type TdsClient = Client<Compat<TcpStream>>;

const SCHEMAS_SQL: &str = "SELECT name FROM sys.schemas ORDER BY name";

const TABLES_SQL: &str = "SELECT TABLE_CATALOG, TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE \
     FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE IN ('BASE TABLE', 'VIEW')";

// ===========================================================================
// Driver
// ===========================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct TdsDriver;

impl TdsDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_config(params: &ConnectParams) -> Config {
        let mut config = Config::new();
        config.host(&params.host);
        config.port(params.port);
        if let Some(db) = params.database.as_deref().filter(|db| !db.is_empty()) {
            config.database(db);
        }
        if let Some(name) = &params.application_name {
            config.application_name(name);
        }
        config.authentication(match &params.credential {
            Credential::UserPassword { user, password } => AuthMethod::sql_server(user, password),
            Credential::AccessToken(token) => AuthMethod::aad_token(token),
        });
        config.encryption(if params.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        if params.trust_server_certificate {
            config.trust_cert();
        }
        config
    }

    async fn open(config: Config) -> tiberius::Result<TdsClient> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }
}

fn connect_error(addr: &str, e: tiberius::error::Error) -> ConnectorError {
    ConnectorError::ConnectionFailed(format!("{}: {}", addr, e))
}

#[async_trait]
impl Driver for TdsDriver {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Connection>> {
        check_certificate_host(&params.host, params.host_name_in_certificate.as_deref())?;
        if let Some(instance) = &params.instance {
            warn!(
                "Named instance '{}' is not resolved; connecting to port {}",
                instance, params.port
            );
        }

        let config = Self::build_config(params);
        let addr = config.get_addr();
        // Azure gateways may answer the login with a redirect to the node
        // that actually serves the database; follow it once.
        let client = match Self::open(config.clone()).await {
            Ok(client) => client,
            Err(tiberius::error::Error::Routing { host, port }) => {
                info!("Following server redirect from {} to {}:{}", addr, host, port);
                check_certificate_host(&host, params.host_name_in_certificate.as_deref())?;
                let mut redirected = config;
                redirected.host(&host);
                redirected.port(port);
                Self::open(redirected)
                    .await
                    .map_err(|e| connect_error(&format!("{}:{}", host, port), e))?
            }
            Err(e) => return Err(connect_error(&addr, e)),
        };

        let connection = TdsConnection::new(client, params.database.clone());
        info!(
            "Opened connection {} to {}:{} (database {:?})",
            connection.id, params.host, params.port, params.database
        );
        Ok(Box::new(connection))
    }
}

/// Refuse to dial `host` when it falls outside the certificate name pattern.
fn check_certificate_host(host: &str, pattern: Option<&str>) -> Result<()> {
    match pattern {
        Some(pattern) if !host_matches_pattern(host, pattern) => Err(ConnectorError::InvalidState(
            format!("host {} does not match certificate name pattern {}", host, pattern),
        )),
        _ => Ok(()),
    }
}

/// `*.example.net` matches any host ending in `.example.net`; any other
/// pattern must equal the host. Case-insensitive.
pub fn host_matches_pattern(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    match pattern.strip_prefix('*') {
        Some(suffix) if suffix.starts_with('.') => {
            host.len() > suffix.len() && host.ends_with(suffix)
        }
        _ => host == pattern,
    }
}

// ===========================================================================
// Connection
// ===========================================================================

pub struct TdsConnection {
    id: String,
    client: Option<TdsClient>,
    read_only: bool,
    catalog: Option<String>,
    schema: Option<String>,
}

impl TdsConnection {
    fn new(client: TdsClient, database: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client: Some(client),
            read_only: false,
            catalog: database,
            schema: None,
        }
    }

    fn client(&mut self) -> Result<&mut TdsClient> {
        let id = &self.id;
        self.client
            .as_mut()
            .ok_or_else(|| ConnectorError::InvalidState(format!("connection {} is closed", id)))
    }
}

#[async_trait]
impl Connection for TdsConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_closed(&self) -> bool {
        self.client.is_none()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.client()?;
        self.read_only = read_only;
        Ok(())
    }

    fn catalog(&self) -> Option<&str> {
        self.catalog.as_deref()
    }

    async fn set_catalog(&mut self, catalog: &str) -> Result<()> {
        let sql = format!("USE {}", quote_bracket(catalog));
        debug!("{}: {}", self.id, sql);
        self.client()?.simple_query(sql).await?.into_results().await?;
        self.catalog = Some(catalog.to_string());
        Ok(())
    }

    fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// T-SQL has no per-session default schema; the schema is recorded on the
    /// connection for callers that qualify names with it.
    async fn set_schema(&mut self, schema: &str) -> Result<()> {
        self.client()?;
        self.schema = Some(schema.to_string());
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        if self.read_only {
            return Err(ConnectorError::ReadOnly(sql.to_string()));
        }
        let result = self.client()?.execute(sql, &[]).await?;
        Ok(result.total())
    }

    async fn query(&mut self, statement: &Statement) -> Result<ResultSet> {
        if self.read_only && !is_read_statement(statement.sql()) {
            return Err(ConnectorError::ReadOnly(statement.sql().to_string()));
        }
        let mut query = Query::new(statement.sql().to_string());
        for param in statement.params() {
            match param {
                SqlParam::Null => query.bind(Option::<String>::None),
                SqlParam::Bool(v) => query.bind(*v),
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Float(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.clone()),
            }
        }
        let rows = query
            .query(self.client()?)
            .await?
            .into_first_result()
            .await?;
        Ok(rows_to_result_set(&rows))
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        let result = self.query(&Statement::new(SCHEMAS_SQL)).await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    async fn list_tables(
        &mut self,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<RemoteTable>> {
        let result = self.query(&tables_statement(schema, table)).await?;
        Ok((0..result.rows.len())
            .filter_map(|i| {
                Some(RemoteTable {
                    catalog: result.get(i, "TABLE_CATALOG").map(str::to_string),
                    schema: result.get(i, "TABLE_SCHEMA")?.to_string(),
                    name: result.get(i, "TABLE_NAME")?.to_string(),
                    table_type: result.get(i, "TABLE_TYPE").unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

    async fn close(&mut self) -> Result<()> {
        match self.client.take() {
            Some(client) => {
                debug!("Closing connection {}", self.id);
                client
                    .close()
                    .await
                    .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))
            }
            None => Ok(()),
        }
    }
}

/// Metadata query for tables and views, filtered by schema and/or name.
fn tables_statement(schema: Option<&str>, table: Option<&str>) -> Statement {
    let mut sql = TABLES_SQL.to_string();
    let mut params = Vec::new();
    if let Some(schema) = schema {
        params.push(schema);
        sql.push_str(&format!(" AND TABLE_SCHEMA = @P{}", params.len()));
    }
    if let Some(table) = table {
        params.push(table);
        sql.push_str(&format!(" AND TABLE_NAME = @P{}", params.len()));
    }
    sql.push_str(" ORDER BY TABLE_SCHEMA, TABLE_NAME");
    params
        .into_iter()
        .fold(Statement::new(sql), |stmt, p| stmt.bind(p))
}

// ===========================================================================
// Row conversion
// ===========================================================================

fn rows_to_result_set(rows: &[Row]) -> ResultSet {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let rows = rows
        .iter()
        .map(|row| {
            row.cells()
                .enumerate()
                .map(|(i, (_, data))| cell_text(row, i, data))
                .collect()
        })
        .collect();
    ResultSet { columns, rows }
}

/// Render one cell as text. Date/time values go through chrono.
fn cell_text(row: &Row, idx: usize, data: &ColumnData<'_>) -> Option<String> {
    match data {
        ColumnData::Bit(v) => v.map(|b| b.to_string()),
        ColumnData::U8(v) => v.map(|n| n.to_string()),
        ColumnData::I16(v) => v.map(|n| n.to_string()),
        ColumnData::I32(v) => v.map(|n| n.to_string()),
        ColumnData::I64(v) => v.map(|n| n.to_string()),
        ColumnData::F32(v) => v.map(|n| n.to_string()),
        ColumnData::F64(v) => v.map(|n| n.to_string()),
        ColumnData::Numeric(v) => v.map(|n| n.to_string()),
        ColumnData::String(v) => v.as_ref().map(|s| s.to_string()),
        ColumnData::Guid(v) => v.map(|g| g.to_string()),
        ColumnData::Binary(v) => v
            .as_ref()
            .map(|b| b.iter().map(|byte| format!("{:02x}", byte)).collect()),
        ColumnData::Xml(v) => v.as_ref().map(|x| x.to_string()),
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        ColumnData::DateTimeOffset(Some(_)) => row
            .try_get::<chrono::DateTime<Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| dt.to_rfc3339()),
        ColumnData::Date(Some(_)) => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(|d| d.format("%Y-%m-%d").to_string()),
        ColumnData::Time(Some(_)) => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| t.format("%H:%M:%S%.f").to_string()),
        _ => None,
    }
}
