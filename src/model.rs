use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Product,
    Article,
    Page,
    Collection,
    Media,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Product => "product",
            ContentType::Article => "article",
            ContentType::Page => "page",
            ContentType::Collection => "collection",
            ContentType::Media => "media",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product" => Some(ContentType::Product),
            "article" => Some(ContentType::Article),
            "page" => Some(ContentType::Page),
            "collection" => Some(ContentType::Collection),
            "media" => Some(ContentType::Media),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Published,
    Archived,
    Deleted,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
            ContentStatus::Archived => "archived",
            ContentStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ContentStatus::Draft),
            "published" => Some(ContentStatus::Published),
            "archived" => Some(ContentStatus::Archived),
            "deleted" => Some(ContentStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Cms,
    Ecommerce,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Cms => "cms",
            ProviderType::Ecommerce => "ecommerce",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cms" => Some(ProviderType::Cms),
            "ecommerce" => Some(ProviderType::Ecommerce),
            _ => None,
        }
    }
}

/// What kind of change a webhook described, carried on every change event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    InventoryUpdated,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
            ChangeKind::InventoryUpdated => "inventoryUpdated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ChangeKind::Created),
            "updated" => Some(ChangeKind::Updated),
            "deleted" => Some(ChangeKind::Deleted),
            "inventoryUpdated" => Some(ChangeKind::InventoryUpdated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchState {
    Active,
    Building,
    Completed,
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Active => "ACTIVE",
            BatchState::Building => "BUILDING",
            BatchState::Completed => "COMPLETED",
            BatchState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(BatchState::Active),
            "BUILDING" => Some(BatchState::Building),
            "COMPLETED" => Some(BatchState::Completed),
            "FAILED" => Some(BatchState::Failed),
            _ => None,
        }
    }
}

/// Provider-agnostic content record produced by the adapters.
///
/// `(id, content_type, provider_name)` is the stable identity used for
/// idempotent upserts; re-ingesting the same external state overwrites
/// rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedContent {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub content_type: ContentType,
    pub status: ContentStatus,
    pub provider_type: ProviderType,
    pub provider_name: String,
    pub tenant_id: String,
    pub price: Option<f64>,
    pub inventory: Option<i64>,
    pub variants: Option<serde_json::Value>,
    pub provider_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
    /// The change the source webhook described for this record.
    #[serde(default = "default_change_kind")]
    pub change_kind: ChangeKind,
}

fn default_change_kind() -> ChangeKind {
    ChangeKind::Updated
}

/// Immutable "content changed" notification published after a store write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentChangeEvent {
    pub event_id: String,
    pub event_type: ChangeKind,
    pub content_id: String,
    pub content_type: ContentType,
    pub provider_name: String,
    pub tenant_id: String,
    pub occurred_at: DateTime<Utc>,
    pub requires_build: bool,
}

impl ContentChangeEvent {
    pub fn for_content(record: &NormalizedContent) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: record.change_kind,
            content_id: record.id.clone(),
            content_type: record.content_type,
            provider_name: record.provider_name.clone(),
            tenant_id: record.tenant_id.clone(),
            occurred_at: Utc::now(),
            requires_build: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildBatch {
    pub batch_id: String,
    pub tenant_id: String,
    pub state: BatchState,
    pub last_error: Option<String>,
    pub build_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregated view of a batch handed to the build executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeSummary {
    pub tenant_id: String,
    pub event_count: usize,
    pub counts_by_type: BTreeMap<String, usize>,
    pub counts_by_provider: BTreeMap<String, usize>,
    pub affected_content_ids: Vec<String>,
    pub requires_full_rebuild: bool,
}

impl ChangeSummary {
    /// Fold a list of change events into a summary. `full_rebuild_threshold`
    /// is the batch size at which incremental rendering stops being worth the
    /// bookkeeping; a collection-level change always forces a full rebuild.
    pub fn from_events(
        tenant_id: &str,
        events: &[ContentChangeEvent],
        full_rebuild_threshold: usize,
    ) -> Self {
        let mut summary = ChangeSummary {
            tenant_id: tenant_id.to_string(),
            event_count: events.len(),
            ..Default::default()
        };
        for event in events {
            *summary
                .counts_by_type
                .entry(event.event_type.as_str().to_string())
                .or_default() += 1;
            *summary
                .counts_by_provider
                .entry(event.provider_name.clone())
                .or_default() += 1;
            if !summary.affected_content_ids.contains(&event.content_id) {
                summary.affected_content_ids.push(event.content_id.clone());
            }
            if event.content_type == ContentType::Collection {
                summary.requires_full_rebuild = true;
            }
        }
        if full_rebuild_threshold > 0 && events.len() >= full_rebuild_threshold {
            summary.requires_full_rebuild = true;
        }
        summary
    }
}

/// Terminal result of handling a webhook. Duplicates and stale replays are
/// explicit variants, not errors: callers must be able to tell a benign
/// redelivery apart from a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Normalized and stored; carries how many records were written.
    Accepted { records: usize },
    /// The idempotency ledger already held this (provider, event id) pair.
    Duplicate,
    /// Timestamp fell outside the replay window; dropped without processing.
    ReplayIgnored,
}
