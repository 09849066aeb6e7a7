//! Caller identity and per-call credential resolution.

use std::collections::BTreeMap;
use std::fmt;

/// The identity a connector operation runs as.
///
/// Besides the user name an identity can carry "extra credentials": named
/// secrets supplied by the caller that override the connector's configured
/// credentials for this one call. Nothing here is global; every operation
/// receives its identity explicitly.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Identity {
    user: String,
    extra_credentials: BTreeMap<String, String>,
}

impl Identity {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            extra_credentials: BTreeMap::new(),
        }
    }

    /// Add a named extra credential.
    pub fn with_extra_credential(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_credentials.insert(name.into(), value.into());
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn extra_credential(&self, name: &str) -> Option<&str> {
        self.extra_credentials.get(name).map(String::as_str)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user", &self.user)
            .field(
                "extra_credentials",
                &self.extra_credentials.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A credential that is either configured literally, looked up by name in
/// the caller's extra credentials, or both.
///
/// When a credential name is configured and the identity carries it, the
/// looked-up value wins; otherwise the literal value (if any) is used.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialLookup {
    value: Option<String>,
    credential_name: Option<String>,
}

impl CredentialLookup {
    pub fn new(value: Option<String>, credential_name: Option<String>) -> Self {
        Self {
            value: value.filter(|v| !v.is_empty()),
            credential_name: credential_name.filter(|n| !n.is_empty()),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::new(Some(value.into()), None)
    }

    pub fn by_name(credential_name: impl Into<String>) -> Self {
        Self::new(None, Some(credential_name.into()))
    }

    /// Whether this lookup can ever produce a value.
    pub fn is_configured(&self) -> bool {
        self.value.is_some() || self.credential_name.is_some()
    }

    pub fn credential_name(&self) -> Option<&str> {
        self.credential_name.as_deref()
    }

    pub fn resolve(&self, identity: &Identity) -> Option<String> {
        self.credential_name
            .as_deref()
            .and_then(|name| identity.extra_credential(name))
            .map(str::to_string)
            .or_else(|| self.value.clone())
    }
}

impl fmt::Debug for CredentialLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLookup")
            .field("value", &self.value.as_ref().map(|_| "***"))
            .field("credential_name", &self.credential_name)
            .finish()
    }
}
