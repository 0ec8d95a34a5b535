//! Webhook secret lookup with a short-lived cache.
//!
//! The secret source is an external collaborator behind the [`SecretStore`]
//! trait; the config-backed implementation resolves literal values or
//! environment indirection, and [`CachedSecrets`] keeps resolved values for
//! ~15 minutes so the hot webhook path never waits on a lookup.

use crate::config::{Provider, SecretSource};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_webhook_secret(&self, provider_name: &str) -> Result<String>;
}

/// Resolves secrets from the provider table in the config file.
pub struct ConfigSecretStore {
    providers: BTreeMap<String, Provider>,
}

impl ConfigSecretStore {
    pub fn new(providers: BTreeMap<String, Provider>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl SecretStore for ConfigSecretStore {
    async fn get_webhook_secret(&self, provider_name: &str) -> Result<String> {
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| anyhow!("no secret configured for provider {}", provider_name))?;
        match &provider.secret {
            SecretSource::Literal { value } => Ok(value.clone()),
            SecretSource::Env { name } => std::env::var(name)
                .map_err(|_| anyhow!("secret env var {} for provider {} is unset", name, provider_name)),
        }
    }
}

struct CacheEntry {
    value: String,
    fetched_at: DateTime<Utc>,
}

/// Caching decorator over any [`SecretStore`].
pub struct CachedSecrets {
    inner: Arc<dyn SecretStore>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CachedSecrets {
    pub fn new(inner: Arc<dyn SecretStore>, ttl_seconds: i64) -> Self {
        Self {
            inner,
            ttl: Duration::seconds(ttl_seconds),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SecretStore for CachedSecrets {
    async fn get_webhook_secret(&self, provider_name: &str) -> Result<String> {
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(provider_name) {
                if Utc::now() - entry.fetched_at < self.ttl {
                    return Ok(entry.value.clone());
                }
            }
        }
        let value = self.inner.get_webhook_secret(provider_name).await?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            provider_name.to_string(),
            CacheEntry {
                value: value.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(value)
    }
}
