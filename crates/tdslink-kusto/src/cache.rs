//! In-process token cache in front of a [`TokenProvider`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tdslink_core::Result;
use tracing::debug;

use crate::oauth::{AccessToken, ClientCredentials, TokenProvider};

/// Tokens with less validity than this left are refreshed.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant_id: String,
    client_id: String,
    scope: String,
}

type Slot = Arc<tokio::sync::Mutex<Option<AccessToken>>>;

/// Caches tokens per (tenant, client id, scope).
///
/// Each key has its own async lock, held across a fetch: concurrent callers
/// for one cold key wait for a single request, while other keys are served
/// without waiting. Expired entries are pruned whenever a token is stored.
pub struct TokenCache {
    inner: Arc<dyn TokenProvider>,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl TokenCache {
    pub fn new(inner: Arc<dyn TokenProvider>) -> Self {
        Self {
            inner,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        self.slots().entry(key.clone()).or_default().clone()
    }

    /// Drop slots that are idle and hold no live token.
    fn prune(&self) {
        let now = Utc::now();
        self.slots().retain(|_, slot| match slot.try_lock() {
            Ok(token) => matches!(&*token, Some(t) if t.is_valid_for(now, chrono::Duration::zero())),
            Err(_) => true,
        });
    }

    /// Number of cached tokens, not counting slots being refreshed.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.try_lock().map(|t| t.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenProvider for TokenCache {
    async fn acquire(&self, credentials: &ClientCredentials, scope: &str) -> Result<AccessToken> {
        let key = CacheKey {
            tenant_id: credentials.tenant_id.clone(),
            client_id: credentials.client_id.clone(),
            scope: scope.to_string(),
        };
        let margin = chrono::Duration::minutes(REFRESH_MARGIN_MINUTES);

        let slot = self.slot(&key);
        let mut cached = slot.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_valid_for(Utc::now(), margin) {
                debug!("Token cache hit for client {} scope {}", key.client_id, key.scope);
                return Ok(token.clone());
            }
        }

        debug!("Token cache miss for client {} scope {}", key.client_id, key.scope);
        let token = self.inner.acquire(credentials, scope).await?;
        *cached = Some(token.clone());
        self.prune();
        Ok(token)
    }
}
