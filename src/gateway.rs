//! Webhook gateway: verify, dedupe, normalize, persist, publish.
//!
//! The pipeline order is deliberate — authenticity first, then freshness, then
//! the idempotency gate, and only then the expensive work. Stale replays and
//! ledger hits are terminal successes ([`IngestOutcome`]), never errors, so
//! providers stop retrying them.

use crate::adapters::{AdapterRegistry, NormalizeContext};
use crate::bus::EventBus;
use crate::config::Provider;
use crate::db::{self, Pool};
use crate::model::{ContentChangeEvent, IngestOutcome, NormalizedContent};
use crate::secrets::SecretStore;
use crate::verify::{self, VerifyError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

const STORE_ATTEMPTS: u32 = 3;
const STORE_BACKOFF_MS: u64 = 50;

/// Lowercased header name -> value.
pub type Headers = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Bad or missing signature. Logged as a security event.
    #[error("unauthorized webhook from '{provider}': {reason}")]
    Unauthorized { provider: String, reason: String },

    /// No adapter is registered under this name.
    #[error("unsupported provider '{provider}'; supported: {}", supported.join(", "))]
    UnsupportedProvider {
        provider: String,
        supported: Vec<String>,
    },

    /// The adapter could not make sense of the payload. The digest identifies
    /// the offending payload for manual replay.
    #[error("invalid payload from '{provider}' (digest {payload_digest}): {message}")]
    Validation {
        provider: String,
        payload_digest: String,
        message: String,
    },

    /// Content store write failed after retries. The receipt is released so
    /// the provider's redelivery is not gated by the ledger.
    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),

    /// Event publish failed after the stored content was committed. The
    /// receipt is released so the provider's redelivery re-publishes; the
    /// content is not rolled back.
    #[error("publish failure: {0}")]
    Publish(String),

    /// Secret lookup collaborator failed.
    #[error("secret lookup failed for '{provider}': {source}")]
    Secret {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
}

pub struct Gateway {
    pool: Pool,
    registry: Arc<AdapterRegistry>,
    secrets: Arc<dyn SecretStore>,
    bus: EventBus,
    providers: BTreeMap<String, Provider>,
    replay_window_seconds: i64,
}

impl Gateway {
    pub fn new(
        pool: Pool,
        registry: Arc<AdapterRegistry>,
        secrets: Arc<dyn SecretStore>,
        bus: EventBus,
        providers: BTreeMap<String, Provider>,
        replay_window_seconds: i64,
    ) -> Self {
        Self {
            pool,
            registry,
            secrets,
            bus,
            providers,
            replay_window_seconds,
        }
    }

    /// Handle one inbound webhook delivery.
    #[instrument(skip_all, fields(provider = provider_name))]
    pub async fn handle(
        &self,
        provider_name: &str,
        headers: &Headers,
        body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let (provider, adapter) = match (
            self.providers.get(provider_name),
            self.registry.lookup(provider_name),
        ) {
            (Some(p), Some(a)) => (p, a.clone()),
            _ => {
                return Err(IngestError::UnsupportedProvider {
                    provider: provider_name.to_string(),
                    supported: self.registry.provider_names(),
                })
            }
        };
        let payload_digest = hex_sha256(body);

        // 1. Signature over the raw body, constant-time compare.
        let secret = self
            .secrets
            .get_webhook_secret(provider_name)
            .await
            .map_err(|source| IngestError::Secret {
                provider: provider_name.to_string(),
                source,
            })?;
        let sig_header = provider.signature_header.to_lowercase();
        let signature = headers.get(&sig_header).ok_or_else(|| {
            self.unauthorized(provider_name, "missing signature header")
        })?;
        verify::verify_signature(
            provider.signature_algorithm,
            provider.signature_prefix.as_deref(),
            &secret,
            body,
            signature,
        )
        .map_err(|e| self.unauthorized(provider_name, &e.to_string()))?;

        // 2. Replay window. A stale delivery is terminal: the provider gets a
        //    success so it stops retrying.
        let ts_header = provider.timestamp_header.to_lowercase();
        let now = Utc::now();
        let timestamp = headers
            .get(&ts_header)
            .ok_or_else(|| self.validation(provider_name, &payload_digest, "missing timestamp header"))
            .and_then(|raw| {
                verify::parse_timestamp(raw).map_err(|e: VerifyError| {
                    self.validation(provider_name, &payload_digest, &e.to_string())
                })
            })?;
        if !verify::within_replay_window(timestamp, now, self.replay_window_seconds) {
            info!(
                provider = provider_name,
                skew_seconds = (now - timestamp).num_seconds(),
                "stale webhook ignored"
            );
            return Ok(IngestOutcome::ReplayIgnored);
        }

        // 3. Idempotency gate. One atomic insert decides who processes this
        //    event; concurrent redeliveries observe the existing row.
        let external_event_id = provider
            .event_id_header
            .as_ref()
            .and_then(|h| headers.get(&h.to_lowercase()))
            .cloned()
            .unwrap_or_else(|| payload_digest.clone());
        let fresh = db::record_receipt(&self.pool, provider_name, &external_event_id, &payload_digest)
            .await
            .map_err(IngestError::Storage)?;
        if !fresh {
            info!(
                provider = provider_name,
                event = external_event_id.as_str(),
                "duplicate webhook short-circuited"
            );
            return Ok(IngestOutcome::Duplicate);
        }

        // 4. Normalize.
        let ctx = NormalizeContext {
            provider_name: provider_name.to_string(),
            tenant_id: provider.tenant_id.clone(),
            synced_at: now,
        };
        let records = match adapter.normalize(&ctx, body) {
            Ok(records) => records,
            Err(err) => {
                return Err(self.validation(provider_name, &payload_digest, &err.to_string()));
            }
        };
        if records.is_empty() {
            return Ok(IngestOutcome::Accepted { records: 0 });
        }

        // 5. Persist + publish, independently per record. One record's failure
        //    must not roll back the others.
        self.persist_and_publish(provider_name, &external_event_id, &records)
            .await?;

        Ok(IngestOutcome::Accepted {
            records: records.len(),
        })
    }

    async fn persist_and_publish(
        &self,
        provider_name: &str,
        external_event_id: &str,
        records: &[NormalizedContent],
    ) -> Result<(), IngestError> {
        let mut storage_failure: Option<anyhow::Error> = None;
        let mut publish_failure: Option<String> = None;

        for record in records {
            if let Err(err) = self.upsert_with_retry(record).await {
                warn!(
                    provider = provider_name,
                    content = record.id.as_str(),
                    error = %err,
                    "content upsert failed after retries"
                );
                storage_failure.get_or_insert(err);
                continue;
            }

            let event = ContentChangeEvent::for_content(record);
            if let Err(err) = db::insert_change_event(&self.pool, &event).await {
                warn!(event = event.event_id.as_str(), error = %err, "change event insert failed");
                storage_failure.get_or_insert(err);
                continue;
            }
            if let Err(err) = self.bus.publish(event).await {
                // Stored content stays; only the notification is degraded.
                warn!(
                    provider = provider_name,
                    content = record.id.as_str(),
                    error = %err,
                    "change event publish failed"
                );
                publish_failure.get_or_insert(err.to_string());
            }
        }

        if storage_failure.is_some() || publish_failure.is_some() {
            // Release the receipt so the provider's retry reprocesses the
            // whole delivery instead of hitting the duplicate gate. For a
            // publish failure that retry is what gets the event onto the bus;
            // the upsert is idempotent, so replaying the stores is safe.
            if let Err(release) =
                db::delete_receipt(&self.pool, provider_name, external_event_id).await
            {
                warn!(error = %release, "failed to release receipt after ingest failure");
            }
        }
        if let Some(err) = storage_failure {
            return Err(IngestError::Storage(err));
        }
        if let Some(message) = publish_failure {
            return Err(IngestError::Publish(message));
        }
        Ok(())
    }

    async fn upsert_with_retry(&self, record: &NormalizedContent) -> anyhow::Result<()> {
        let mut last = None;
        for attempt in 0..STORE_ATTEMPTS {
            match db::upsert_content(&self.pool, record).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last = Some(err);
                    tokio::time::sleep(Duration::from_millis(STORE_BACKOFF_MS * (1 << attempt)))
                        .await;
                }
            }
        }
        Err(last.unwrap_or_else(|| anyhow::anyhow!("upsert failed")))
    }

    fn unauthorized(&self, provider: &str, reason: &str) -> IngestError {
        warn!(provider, reason, "webhook signature rejected");
        IngestError::Unauthorized {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    fn validation(&self, provider: &str, digest: &str, message: &str) -> IngestError {
        warn!(provider, digest, message, "webhook payload rejected");
        IngestError::Validation {
            provider: provider.to_string(),
            payload_digest: digest.to_string(),
            message: message.to_string(),
        }
    }
}

pub fn hex_sha256(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
