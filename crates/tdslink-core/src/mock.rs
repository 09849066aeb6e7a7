//! In-memory recording driver for tests.
//!
//! A [`MockBackend`] holds the canned metadata and failure switches shared by
//! every connection a [`MockDriver`] opens, and records each call made on
//! those connections so tests can assert on order and count.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::connection::{ConnectParams, Connection, Driver, RemoteTable, ResultSet, Statement};
use crate::dialect::is_read_statement;
use crate::error::{ConnectorError, Result};

/// One recorded call on a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    SetReadOnly(bool),
    SetCatalog(String),
    SetSchema(String),
    Execute(String),
    Query(String),
    ListSchemas,
    ListTables {
        schema: Option<String>,
        table: Option<String>,
    },
    Close,
}

#[derive(Default)]
struct BackendState {
    calls: Vec<MockCall>,
    connects: Vec<ConnectParams>,
    schemas: Vec<String>,
    tables: Vec<RemoteTable>,
    query_result: ResultSet,
    fail_connect: Option<String>,
    fail_set_catalog: Option<String>,
    fail_set_schema: Option<String>,
    connect_closed: bool,
    next_id: usize,
}

/// Shared state behind every mock connection.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_schemas(self, schemas: &[&str]) -> Self {
        self.lock().schemas = schemas.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_table(self, schema: &str, name: &str) -> Self {
        self.lock().tables.push(RemoteTable {
            catalog: None,
            schema: schema.to_string(),
            name: name.to_string(),
            table_type: "BASE TABLE".to_string(),
        });
        self
    }

    pub fn with_query_result(self, result: ResultSet) -> Self {
        self.lock().query_result = result;
        self
    }

    pub fn failing_connect(self, message: &str) -> Self {
        self.lock().fail_connect = Some(message.to_string());
        self
    }

    pub fn failing_set_catalog(self, message: &str) -> Self {
        self.lock().fail_set_catalog = Some(message.to_string());
        self
    }

    pub fn failing_set_schema(self, message: &str) -> Self {
        self.lock().fail_set_schema = Some(message.to_string());
        self
    }

    /// Make the driver hand out connections that are already closed.
    pub fn connecting_closed(self) -> Self {
        self.lock().connect_closed = true;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Execute(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn connect_params(&self) -> Vec<ConnectParams> {
        self.lock().connects.clone()
    }

    /// Number of `close()` invocations across all connections.
    pub fn close_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c == MockCall::Close)
            .count()
    }

    fn record(&self, call: MockCall) {
        self.lock().calls.push(call);
    }
}

/// Driver handing out [`MockConnection`]s backed by one [`MockBackend`].
pub struct MockDriver {
    backend: MockBackend,
}

impl MockDriver {
    pub fn new(backend: MockBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Connection>> {
        let mut state = self.backend.lock();
        state.connects.push(params.clone());
        if let Some(message) = &state.fail_connect {
            return Err(ConnectorError::ConnectionFailed(message.clone()));
        }
        state.next_id += 1;
        Ok(Box::new(MockConnection {
            id: format!("mock-{}", state.next_id),
            backend: self.backend.clone(),
            closed: state.connect_closed,
            read_only: false,
            catalog: params.database.clone(),
            schema: None,
        }))
    }
}

pub struct MockConnection {
    id: String,
    backend: MockBackend,
    closed: bool,
    read_only: bool,
    catalog: Option<String>,
    schema: Option<String>,
}

impl MockConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ConnectorError::InvalidState(format!(
                "connection {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.ensure_open()?;
        self.backend.record(MockCall::SetReadOnly(read_only));
        self.read_only = read_only;
        Ok(())
    }

    fn catalog(&self) -> Option<&str> {
        self.catalog.as_deref()
    }

    async fn set_catalog(&mut self, catalog: &str) -> Result<()> {
        self.ensure_open()?;
        self.backend.record(MockCall::SetCatalog(catalog.to_string()));
        if let Some(message) = self.backend.lock().fail_set_catalog.clone() {
            return Err(ConnectorError::QueryFailed(message));
        }
        self.catalog = Some(catalog.to_string());
        Ok(())
    }

    fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    async fn set_schema(&mut self, schema: &str) -> Result<()> {
        self.ensure_open()?;
        self.backend.record(MockCall::SetSchema(schema.to_string()));
        if let Some(message) = self.backend.lock().fail_set_schema.clone() {
            return Err(ConnectorError::QueryFailed(message));
        }
        self.schema = Some(schema.to_string());
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.ensure_open()?;
        if self.read_only {
            return Err(ConnectorError::ReadOnly(sql.to_string()));
        }
        self.backend.record(MockCall::Execute(sql.to_string()));
        Ok(0)
    }

    async fn query(&mut self, statement: &Statement) -> Result<ResultSet> {
        self.ensure_open()?;
        if self.read_only && !is_read_statement(statement.sql()) {
            return Err(ConnectorError::ReadOnly(statement.sql().to_string()));
        }
        self.backend.record(MockCall::Query(statement.sql().to_string()));
        Ok(self.backend.lock().query_result.clone())
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.backend.record(MockCall::ListSchemas);
        Ok(self.backend.lock().schemas.clone())
    }

    async fn list_tables(
        &mut self,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<RemoteTable>> {
        self.ensure_open()?;
        self.backend.record(MockCall::ListTables {
            schema: schema.map(str::to_string),
            table: table.map(str::to_string),
        });
        Ok(self
            .backend
            .lock()
            .tables
            .iter()
            .filter(|t| schema.map_or(true, |s| t.schema == s))
            .filter(|t| table.map_or(true, |n| t.name == n))
            .cloned()
            .collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.backend.record(MockCall::Close);
        self.closed = true;
        Ok(())
    }
}
