//! Catalog properties: `key=value` settings files and their binding to typed
//! configuration structs.
//!
//! Connector configs are plain serde structs whose field names are the
//! canonical property keys (`#[serde(rename = "kusto.host-name")]`). Every
//! value arrives as a string; non-string fields use [`deserialize_from_str`].

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::{ConnectorError, Result};

/// An ordered set of configuration properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse properties text. Blank lines and lines starting with `#` or `!`
    /// are ignored; the first `=` separates key from value.
    pub fn parse(text: &str) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ConnectorError::Config(format!(
                    "line {}: expected key=value, got '{}'",
                    lineno + 1,
                    line
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConnectorError::Config(format!(
                    "line {}: empty property name",
                    lineno + 1
                )));
            }
            if values
                .insert(key.to_string(), value.trim().to_string())
                .is_some()
            {
                return Err(ConnectorError::Config(format!(
                    "line {}: duplicate property '{}'",
                    lineno + 1,
                    key
                )));
            }
        }
        Ok(Self { values })
    }

    /// Read and parse a properties file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Build properties from environment variables, mapping each
    /// `(ENV_VAR, property.key)` pair that is set.
    pub fn from_env(mapping: &[(&str, &str)]) -> Self {
        let values = mapping
            .iter()
            .filter_map(|(var, key)| std::env::var(var).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self { values }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bind these properties to a typed config struct.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| ConnectorError::Config(e.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Deserialize a value that arrives as a string through its `FromStr` impl.
pub fn deserialize_from_str<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim().parse().map_err(serde::de::Error::custom)
}
