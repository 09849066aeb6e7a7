//! JDBC-style SQL Server connection URLs.
//!
//! `jdbc:sqlserver://host[\instance][:port][;property=value]...`
//!
//! Property names are case-insensitive. The catalog comes from `database`
//! or `databaseName`.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::error::{ConnectorError, Result};

pub const DEFAULT_PORT: u16 = 1433;

const PREFIX: &str = "jdbc:sqlserver://";

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    host: String,
    instance: Option<String>,
    port: u16,
    /// Keys are lowercased.
    properties: BTreeMap<String, String>,
}

impl ConnectionUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let rest = url
            .get(..PREFIX.len())
            .filter(|p| p.eq_ignore_ascii_case(PREFIX))
            .map(|_| &url[PREFIX.len()..])
            .ok_or_else(|| {
                ConnectorError::Config(format!(
                    "connection URL must start with {}: {}",
                    PREFIX,
                    redact(url)
                ))
            })?;

        let mut segments = rest.split(';');
        let server = segments.next().unwrap_or_default().trim();

        let mut properties = BTreeMap::new();
        for segment in segments {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                ConnectorError::Config(format!(
                    "malformed connection URL property '{}'",
                    segment
                ))
            })?;
            properties.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let (server, port) = match server.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConnectorError::Config(format!("invalid port in connection URL: '{}'", port))
                })?;
                (host, Some(port))
            }
            None => (server, None),
        };
        let (host, instance) = match server.split_once('\\') {
            Some((host, instance)) => (host, Some(instance.to_string())),
            None => (server, None),
        };

        let host = if host.is_empty() {
            properties.get("servername").cloned().unwrap_or_default()
        } else {
            host.to_string()
        };
        if host.is_empty() {
            return Err(ConnectorError::Config(
                "connection URL has no server name".to_string(),
            ));
        }

        let port = match port {
            Some(port) => port,
            None => match properties.get("portnumber") {
                Some(p) => p.parse().map_err(|_| {
                    ConnectorError::Config(format!("invalid portNumber in connection URL: '{}'", p))
                })?,
                None => DEFAULT_PORT,
            },
        };

        Ok(Self {
            host,
            instance,
            port,
            properties,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The database named by `database` or `databaseName`, if any.
    pub fn database(&self) -> Option<&str> {
        self.property("database")
            .or_else(|| self.property("databaseName"))
            .filter(|db| !db.is_empty())
    }

    /// The database, or `fallback` (with a warning) when the URL names none.
    pub fn database_or(&self, fallback: &str) -> String {
        match self.database() {
            Some(db) => db.to_string(),
            None => {
                warn!(
                    "Could not extract database/databaseName from connection URL for {}, using '{}'",
                    self.host, fallback
                );
                fallback.to_string()
            }
        }
    }

    /// Boolean property, accepting `true`/`false` in any case.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.property(key).map(|v| v.eq_ignore_ascii_case("true"))
    }
}

impl fmt::Debug for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let properties: BTreeMap<&str, &str> = self
            .properties
            .iter()
            .map(|(k, v)| {
                if k == "password" {
                    (k.as_str(), "***")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("ConnectionUrl")
            .field("host", &self.host)
            .field("instance", &self.instance)
            .field("port", &self.port)
            .field("properties", &properties)
            .finish()
    }
}

/// Strip everything after the server part so passwords never reach logs.
fn redact(url: &str) -> &str {
    url.split(';').next().unwrap_or_default()
}
