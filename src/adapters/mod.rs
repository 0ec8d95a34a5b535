//! Provider adapters: pure functions from raw webhook payloads to normalized
//! content records.
//!
//! Each adapter implements [`ProviderAdapter`] for one payload dialect and
//! does no I/O, so fixtures are enough to test them. The registry maps
//! configured provider names to adapter instances at startup; adding a
//! provider means registering an adapter, never touching the gateway.

mod git_cms;
mod headless_cms;
mod storefront;

pub use git_cms::GitCmsAdapter;
pub use headless_cms::HeadlessCmsAdapter;
pub use storefront::StorefrontAdapter;

use crate::config::{AdapterKind, Provider};
use crate::model::{NormalizedContent, ProviderType};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

/// Ambient facts an adapter needs but a payload does not carry.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub provider_name: String,
    pub tenant_id: String,
    pub synced_at: DateTime<Utc>,
}

pub trait ProviderAdapter: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Event type strings this adapter understands; payloads describing other
    /// event types normalize to zero records rather than failing.
    fn supported_event_types(&self) -> &'static [&'static str];

    /// Map a raw payload to zero or more normalized records. Pure: same bytes,
    /// same output (modulo `ctx.synced_at`).
    fn normalize(
        &self,
        ctx: &NormalizeContext,
        body: &[u8],
    ) -> Result<Vec<NormalizedContent>, AdapterError>;
}

pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn from_config(providers: &BTreeMap<String, Provider>) -> Self {
        let mut adapters: BTreeMap<String, Arc<dyn ProviderAdapter>> = BTreeMap::new();
        for (name, provider) in providers {
            let adapter: Arc<dyn ProviderAdapter> = match provider.adapter {
                AdapterKind::GitCms => Arc::new(GitCmsAdapter),
                AdapterKind::HeadlessCms => Arc::new(HeadlessCmsAdapter),
                AdapterKind::Storefront => Arc::new(StorefrontAdapter),
            };
            adapters.insert(name.clone(), adapter);
        }
        Self { adapters }
    }

    pub fn lookup(&self, provider_name: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_name)
    }

    /// Names of all registered providers, for "unknown provider" responses.
    pub fn provider_names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

/// Traverse a dot-separated JSON path (`"product.title"`) into a value.
pub(crate) fn json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .fold(Some(value), |current, key| current.and_then(|v| v.get(key)))
}

/// Fetch a required string field or fail with the field name.
pub(crate) fn required_str(
    value: &serde_json::Value,
    path: &str,
    field: &'static str,
) -> Result<String, AdapterError> {
    json_path(value, path)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(AdapterError::MissingField(field))
}

/// Parse an RFC 3339 timestamp field, falling back to `fallback` when absent
/// or unparseable (providers are sloppy about these).
pub(crate) fn timestamp_or(
    value: &serde_json::Value,
    path: &str,
    fallback: DateTime<Utc>,
) -> DateTime<Utc> {
    json_path(value, path)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fallback)
}

#[cfg(test)]
pub(crate) fn test_context() -> NormalizeContext {
    NormalizeContext {
        provider_name: "test-provider".into(),
        tenant_id: "t1".into(),
        synced_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_from_example_config() {
        let cfg: crate::config::Config = serde_yaml::from_str(crate::config::example()).unwrap();
        let registry = AdapterRegistry::from_config(&cfg.webhook.providers);
        assert!(registry.lookup("storefront-a").is_some());
        assert!(registry.lookup("git-cms").is_some());
        assert!(registry.lookup("unknown").is_none());
        assert_eq!(
            registry.provider_names(),
            vec!["git-cms", "headless-cms", "storefront-a"]
        );
    }

    #[test]
    fn json_path_walks_nested_objects() {
        let value = serde_json::json!({"a": {"b": {"c": 1}}});
        assert_eq!(json_path(&value, "a.b.c").and_then(|v| v.as_i64()), Some(1));
        assert!(json_path(&value, "a.x").is_none());
    }
}
