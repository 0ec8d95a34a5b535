//! Configuration loader and validator for the ingestion service.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub webhook: Webhook,
    pub batching: Batching,
    pub build: Build,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub bind_addr: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    /// Settled build batches older than this are swept.
    pub batch_ttl_hours: i64,
    /// Content rows untouched for this long are swept.
    pub content_ttl_days: i64,
}

/// Webhook gateway settings, including the provider table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    /// Maximum absolute skew between the provider timestamp and now.
    pub replay_window_seconds: i64,
    /// How long looked-up webhook secrets stay cached.
    pub secret_cache_seconds: i64,
    /// Idempotency ledger retention; redeliveries after expiry reprocess.
    pub receipt_ttl_hours: i64,
    pub providers: BTreeMap<String, Provider>,
}

/// One external content provider and how to authenticate its deliveries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub adapter: AdapterKind,
    pub tenant_id: String,
    pub secret: SecretSource,
    pub signature_header: String,
    pub signature_algorithm: SignatureAlgorithm,
    /// Prefix stripped from the signature header value (e.g. "sha256=").
    #[serde(default)]
    pub signature_prefix: Option<String>,
    pub timestamp_header: String,
    /// Header carrying the provider's delivery/event id. When absent the
    /// payload hash stands in as the external event id.
    #[serde(default)]
    pub event_id_header: Option<String>,
}

/// Which normalization adapter handles a provider's payloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    GitCms,
    HeadlessCms,
    Storefront,
}

/// Where a provider's shared secret comes from. Literal values are for
/// development; production configs point at an environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SecretSource {
    Literal { value: String },
    Env { name: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    HmacSha256,
    HmacSha1,
}

/// Build batching thresholds. All windows are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batching {
    pub window_seconds: i64,
    /// Window used instead of `window_seconds` once a bulk import is detected.
    pub bulk_window_seconds: i64,
    /// Events within the window that mark a bulk import.
    pub bulk_threshold: i64,
    /// Bursts below this size trigger an immediate build, no batch created.
    pub immediate_threshold: i64,
    pub max_batch_size: i64,
    /// Batch size at which the change summary requests a full rebuild.
    pub full_rebuild_threshold: usize,
}

/// Build executor endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Build {
    pub base_url: String,
    pub token: String,
    pub timeout_seconds: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty".into()));
    }
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty".into()));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0".into()));
    }
    if cfg.app.batch_ttl_hours <= 0 {
        return Err(ConfigError::Invalid("app.batch_ttl_hours must be > 0".into()));
    }
    if cfg.app.content_ttl_days <= 0 {
        return Err(ConfigError::Invalid("app.content_ttl_days must be > 0".into()));
    }

    if cfg.webhook.replay_window_seconds <= 0 {
        return Err(ConfigError::Invalid(
            "webhook.replay_window_seconds must be > 0".into(),
        ));
    }
    if cfg.webhook.receipt_ttl_hours <= 0 {
        return Err(ConfigError::Invalid(
            "webhook.receipt_ttl_hours must be > 0".into(),
        ));
    }
    if cfg.webhook.providers.is_empty() {
        return Err(ConfigError::Invalid(
            "webhook.providers must list at least one provider".into(),
        ));
    }
    for (name, provider) in &cfg.webhook.providers {
        if name.trim().is_empty() {
            return Err(ConfigError::Invalid("provider name must be non-empty".into()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "provider name '{name}' must be lowercase alphanumeric, '-' or '_'"
            )));
        }
        if provider.tenant_id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "webhook.providers.{name}.tenant_id must be non-empty"
            )));
        }
        if provider.signature_header.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "webhook.providers.{name}.signature_header must be non-empty"
            )));
        }
        if provider.timestamp_header.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "webhook.providers.{name}.timestamp_header must be non-empty"
            )));
        }
        match &provider.secret {
            SecretSource::Literal { value } if value.trim().is_empty() => {
                return Err(ConfigError::Invalid(format!(
                    "webhook.providers.{name}.secret value must be non-empty"
                )));
            }
            SecretSource::Env { name: var } if var.trim().is_empty() => {
                return Err(ConfigError::Invalid(format!(
                    "webhook.providers.{name}.secret env name must be non-empty"
                )));
            }
            _ => {}
        }
    }

    if cfg.batching.window_seconds <= 0 {
        return Err(ConfigError::Invalid(
            "batching.window_seconds must be > 0".into(),
        ));
    }
    if cfg.batching.bulk_window_seconds < cfg.batching.window_seconds {
        return Err(ConfigError::Invalid(
            "batching.bulk_window_seconds must be >= batching.window_seconds".into(),
        ));
    }
    if cfg.batching.max_batch_size <= 0 {
        return Err(ConfigError::Invalid(
            "batching.max_batch_size must be > 0".into(),
        ));
    }
    if cfg.batching.immediate_threshold < 0 {
        return Err(ConfigError::Invalid(
            "batching.immediate_threshold must be >= 0".into(),
        ));
    }

    if cfg.build.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("build.base_url must be non-empty".into()));
    }

    Ok(())
}

/// Example configuration, used by tests and `--help` documentation.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "0.0.0.0:8080"
  poll_interval_ms: 500
  max_backoff_seconds: 60
  batch_ttl_hours: 24
  content_ttl_days: 30

webhook:
  replay_window_seconds: 300
  secret_cache_seconds: 900
  receipt_ttl_hours: 24
  providers:
    storefront-a:
      adapter: storefront
      tenant_id: "tenant-1"
      secret:
        type: literal
        value: "dev-secret"
      signature_header: "X-Storefront-Hmac-Sha256"
      signature_algorithm: hmac-sha256
      timestamp_header: "X-Storefront-Timestamp"
      event_id_header: "X-Storefront-Event-Id"
    headless-cms:
      adapter: headless_cms
      tenant_id: "tenant-1"
      secret:
        type: env
        name: "HEADLESS_CMS_SECRET"
      signature_header: "X-Cms-Signature"
      signature_algorithm: hmac-sha256
      signature_prefix: "sha256="
      timestamp_header: "X-Cms-Timestamp"
      event_id_header: "X-Cms-Delivery"
    git-cms:
      adapter: git_cms
      tenant_id: "tenant-1"
      secret:
        type: env
        name: "GIT_CMS_SECRET"
      signature_header: "X-Hub-Signature-256"
      signature_algorithm: hmac-sha256
      signature_prefix: "sha256="
      timestamp_header: "X-Hub-Timestamp"
      event_id_header: "X-Hub-Delivery"

batching:
  window_seconds: 30
  bulk_window_seconds: 60
  bulk_threshold: 10
  immediate_threshold: 3
  max_batch_size: 50
  full_rebuild_threshold: 25

build:
  base_url: "https://builder.internal/"
  token: "BUILD_EXECUTOR_TOKEN"
  timeout_seconds: 30
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.webhook.providers.len(), 3);
        assert_eq!(
            cfg.webhook.providers["storefront-a"].adapter,
            AdapterKind::Storefront
        );
    }

    #[test]
    fn invalid_replay_window() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.webhook.replay_window_seconds = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("replay_window_seconds")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_content_ttl() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.content_ttl_days = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("content_ttl_days")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_provider_name() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        let provider = cfg.webhook.providers["storefront-a"].clone();
        cfg.webhook.providers.insert("Bad Name".into(), provider);
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("Bad Name")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_empty_secret() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        if let Some(p) = cfg.webhook.providers.get_mut("storefront-a") {
            p.secret = SecretSource::Literal { value: "".into() };
        }
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_bulk_window_smaller_than_window() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.batching.bulk_window_seconds = cfg.batching.window_seconds - 1;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(example().as_bytes()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.batching.window_seconds, 30);
    }
}
