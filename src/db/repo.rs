use super::model::{ContentFilter, EvaluationTask};
use crate::model::{
    BatchState, BuildBatch, ChangeKind, ContentChangeEvent, ContentStatus, ContentType,
    NormalizedContent, ProviderType,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Idempotency ledger
// ---------------------------------------------------------------------------

/// Record a webhook receipt. Returns `true` when this call created the row,
/// `false` when the (provider, external event id) pair was already present.
/// `INSERT OR IGNORE` against the primary key is the atomic insert-if-absent
/// gate that keeps concurrent redeliveries from double-processing.
#[instrument(skip_all, fields(provider = provider_name, event = external_event_id))]
pub async fn record_receipt(
    pool: &Pool,
    provider_name: &str,
    external_event_id: &str,
    payload_hash: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO webhook_receipts (provider_name, external_event_id, payload_hash, processed_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(provider_name)
    .bind(external_event_id)
    .bind(payload_hash)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Release a receipt so a redelivery can reprocess. Used when storage fails
/// after the ledger insert succeeded.
#[instrument(skip_all, fields(provider = provider_name, event = external_event_id))]
pub async fn delete_receipt(
    pool: &Pool,
    provider_name: &str,
    external_event_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM webhook_receipts WHERE provider_name = ? AND external_event_id = ?")
        .bind(provider_name)
        .bind(external_event_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Content store
// ---------------------------------------------------------------------------

/// Upsert keyed by content identity; last writer wins on `updated_at`.
#[instrument(skip_all, fields(id = record.id.as_str(), provider = record.provider_name.as_str()))]
pub async fn upsert_content(pool: &Pool, record: &NormalizedContent) -> Result<()> {
    let variants = record
        .variants
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let provider_data = serde_json::to_string(&record.provider_data)?;
    sqlx::query(
        "INSERT INTO content (content_id, content_type, provider_name, provider_type, tenant_id, \
                              title, slug, status, price, inventory, variants, provider_data, \
                              created_at, updated_at, synced_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (content_id, content_type, provider_name) DO UPDATE SET \
             provider_type = excluded.provider_type, \
             tenant_id = excluded.tenant_id, \
             title = excluded.title, \
             slug = excluded.slug, \
             status = excluded.status, \
             price = excluded.price, \
             inventory = excluded.inventory, \
             variants = excluded.variants, \
             provider_data = excluded.provider_data, \
             created_at = excluded.created_at, \
             updated_at = excluded.updated_at, \
             synced_at = excluded.synced_at",
    )
    .bind(&record.id)
    .bind(record.content_type.as_str())
    .bind(&record.provider_name)
    .bind(record.provider_type.as_str())
    .bind(&record.tenant_id)
    .bind(&record.title)
    .bind(&record.slug)
    .bind(record.status.as_str())
    .bind(record.price)
    .bind(record.inventory)
    .bind(variants)
    .bind(provider_data)
    .bind(record.created_at)
    .bind(record.updated_at)
    .bind(record.synced_at)
    .execute(pool)
    .await?;
    Ok(())
}

fn row_to_content(row: &SqliteRow) -> Result<NormalizedContent> {
    let content_type: String = row.get("content_type");
    let status: String = row.get("status");
    let provider_type: String = row.get("provider_type");
    let variants: Option<String> = row.try_get("variants").ok().flatten();
    let provider_data: String = row.get("provider_data");
    Ok(NormalizedContent {
        id: row.get("content_id"),
        title: row.get("title"),
        slug: row.get("slug"),
        content_type: ContentType::parse(&content_type)
            .ok_or_else(|| anyhow!("unknown content type {}", content_type))?,
        status: ContentStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown content status {}", status))?,
        provider_type: ProviderType::parse(&provider_type)
            .ok_or_else(|| anyhow!("unknown provider type {}", provider_type))?,
        provider_name: row.get("provider_name"),
        tenant_id: row.get("tenant_id"),
        price: row.try_get("price").ok().flatten(),
        inventory: row.try_get("inventory").ok().flatten(),
        variants: variants.map(|v| serde_json::from_str(&v)).transpose()?,
        provider_data: serde_json::from_str(&provider_data)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        synced_at: row.get("synced_at"),
        change_kind: ChangeKind::Updated,
    })
}

#[instrument(skip_all)]
pub async fn get_content(
    pool: &Pool,
    id: &str,
    content_type: ContentType,
    provider_name: &str,
) -> Result<Option<NormalizedContent>> {
    let row = sqlx::query(
        "SELECT * FROM content WHERE content_id = ? AND content_type = ? AND provider_name = ?",
    )
    .bind(id)
    .bind(content_type.as_str())
    .bind(provider_name)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_content).transpose()
}

/// Range query over the (tenant, type) index with optional narrowing.
#[instrument(skip_all, fields(tenant = filter.tenant_id.as_str()))]
pub async fn query_content(
    pool: &Pool,
    filter: &ContentFilter,
    limit: i64,
) -> Result<Vec<NormalizedContent>> {
    let mut sql = String::from("SELECT * FROM content WHERE tenant_id = ?");
    if filter.content_type.is_some() {
        sql.push_str(" AND content_type = ?");
    }
    if filter.provider_name.is_some() {
        sql.push_str(" AND provider_name = ?");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    sql.push_str(" ORDER BY updated_at DESC LIMIT ?");

    let mut query = sqlx::query(&sql).bind(&filter.tenant_id);
    if let Some(ct) = filter.content_type {
        query = query.bind(ct.as_str());
    }
    if let Some(ref provider) = filter.provider_name {
        query = query.bind(provider);
    }
    if let Some(status) = filter.status {
        query = query.bind(status.as_str());
    }
    let rows = query.bind(limit).fetch_all(pool).await?;
    rows.iter().map(row_to_content).collect()
}

/// Everything a provider changed since `since`, via the (provider, updated_at)
/// index; serves the build executor's incremental fetch.
#[instrument(skip_all, fields(provider = provider_name))]
pub async fn changed_since(
    pool: &Pool,
    provider_name: &str,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<NormalizedContent>> {
    let rows = sqlx::query(
        "SELECT * FROM content WHERE provider_name = ? AND updated_at > ? \
         ORDER BY updated_at ASC LIMIT ?",
    )
    .bind(provider_name)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_content).collect()
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(event = event.event_id.as_str()))]
pub async fn insert_change_event(pool: &Pool, event: &ContentChangeEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO change_events (event_id, event_type, content_id, content_type, \
                                    provider_name, tenant_id, occurred_at, requires_build) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.event_type.as_str())
    .bind(&event.content_id)
    .bind(event.content_type.as_str())
    .bind(&event.provider_name)
    .bind(&event.tenant_id)
    .bind(event.occurred_at)
    .bind(event.requires_build)
    .execute(pool)
    .await?;
    Ok(())
}

/// How many change events a tenant produced since `since`. Drives the burst
/// detection in the batching scheduler; reading it from the store keeps
/// horizontally-scaled schedulers in agreement.
#[instrument(skip_all)]
pub async fn recent_event_count(pool: &Pool, tenant_id: &str, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM change_events WHERE tenant_id = ? AND occurred_at > ?",
    )
    .bind(tenant_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

fn row_to_event(row: &SqliteRow) -> Result<ContentChangeEvent> {
    let event_type: String = row.get("event_type");
    let content_type: String = row.get("content_type");
    Ok(ContentChangeEvent {
        event_id: row.get("event_id"),
        event_type: ChangeKind::parse(&event_type)
            .ok_or_else(|| anyhow!("unknown event type {}", event_type))?,
        content_id: row.get("content_id"),
        content_type: ContentType::parse(&content_type)
            .ok_or_else(|| anyhow!("unknown content type {}", content_type))?,
        provider_name: row.get("provider_name"),
        tenant_id: row.get("tenant_id"),
        occurred_at: row.get("occurred_at"),
        requires_build: row.get("requires_build"),
    })
}

// ---------------------------------------------------------------------------
// Build batches
// ---------------------------------------------------------------------------

fn row_to_batch(row: &SqliteRow) -> Result<BuildBatch> {
    let state: String = row.get("state");
    Ok(BuildBatch {
        batch_id: row.get("batch_id"),
        tenant_id: row.get("tenant_id"),
        state: BatchState::parse(&state).ok_or_else(|| anyhow!("unknown batch state {}", state))?,
        last_error: row.try_get("last_error").ok().flatten(),
        build_id: row.try_get("build_id").ok().flatten(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Create the tenant's active batch. Returns `None` when another instance won
/// the race: the partial unique index on (tenant_id) WHERE state = 'ACTIVE'
/// rejects the second insert and `OR IGNORE` turns that into zero rows.
#[instrument(skip_all, fields(tenant = tenant_id))]
pub async fn create_active_batch(pool: &Pool, tenant_id: &str) -> Result<Option<BuildBatch>> {
    let batch_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT OR IGNORE INTO build_batches (batch_id, tenant_id, state, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&batch_id)
    .bind(tenant_id)
    .bind(BatchState::Active.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    load_batch(pool, &batch_id).await
}

#[instrument(skip_all)]
pub async fn active_batch(pool: &Pool, tenant_id: &str) -> Result<Option<BuildBatch>> {
    let row = sqlx::query("SELECT * FROM build_batches WHERE tenant_id = ? AND state = 'ACTIVE'")
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_batch).transpose()
}

#[instrument(skip_all)]
pub async fn load_batch(pool: &Pool, batch_id: &str) -> Result<Option<BuildBatch>> {
    let row = sqlx::query("SELECT * FROM build_batches WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_batch).transpose()
}

/// Append an event to a batch and return the batch's new size, or `None` when
/// the batch is no longer ACTIVE (it fired or was swept between the caller's
/// load and this append) so the event must not ride along. Duplicate appends
/// of the same event are ignored (the scheduler tolerates redelivery).
#[instrument(skip_all, fields(batch = batch_id))]
pub async fn append_batch_event(pool: &Pool, batch_id: &str, event_id: &str) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let active: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM build_batches WHERE batch_id = ? AND state = 'ACTIVE'")
            .bind(batch_id)
            .fetch_optional(&mut *tx)
            .await?;
    if active.is_none() {
        return Ok(None);
    }
    let max_seq: Option<i64> =
        sqlx::query_scalar("SELECT MAX(sequence) FROM batch_events WHERE batch_id = ?")
            .bind(batch_id)
            .fetch_optional(&mut *tx)
            .await?
            .flatten();
    sqlx::query("INSERT OR IGNORE INTO batch_events (batch_id, event_id, sequence) VALUES (?, ?, ?)")
        .bind(batch_id)
        .bind(event_id)
        .bind(max_seq.unwrap_or(0) + 1)
        .execute(&mut *tx)
        .await?;
    let size: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_events WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await?;
    sqlx::query("UPDATE build_batches SET updated_at = ? WHERE batch_id = ?")
        .bind(Utc::now())
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Some(size))
}

/// The batch's events in append order.
#[instrument(skip_all)]
pub async fn batch_change_events(pool: &Pool, batch_id: &str) -> Result<Vec<ContentChangeEvent>> {
    let rows = sqlx::query(
        "SELECT e.* FROM change_events e \
         JOIN batch_events be ON be.event_id = e.event_id \
         WHERE be.batch_id = ? ORDER BY be.sequence ASC",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_event).collect()
}

/// Compare-and-swap ACTIVE → BUILDING. Returns `true` for exactly one caller;
/// a timer evaluation and a size-threshold check racing on the same batch
/// cannot both fire the build.
#[instrument(skip_all, fields(batch = batch_id))]
pub async fn claim_batch_for_build(pool: &Pool, batch_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE build_batches SET state = 'BUILDING', updated_at = ? \
         WHERE batch_id = ? AND state = 'ACTIVE'",
    )
    .bind(Utc::now())
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[instrument(skip_all, fields(batch = batch_id))]
pub async fn complete_batch(pool: &Pool, batch_id: &str, build_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE build_batches SET state = 'COMPLETED', build_id = ?, updated_at = ? \
         WHERE batch_id = ? AND state = 'BUILDING'",
    )
    .bind(build_id)
    .bind(Utc::now())
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a build trigger failure. The batch is left FAILED for a supervisory
/// process to inspect; it is not retried automatically.
#[instrument(skip_all, fields(batch = batch_id))]
pub async fn fail_batch(pool: &Pool, batch_id: &str, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE build_batches SET state = 'FAILED', last_error = ?, updated_at = ? \
         WHERE batch_id = ?",
    )
    .bind(error)
    .bind(Utc::now())
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Scheduler task queue
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn enqueue_evaluation(
    pool: &Pool,
    tenant_id: &str,
    batch_id: &str,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO scheduler_tasks (tenant_id, batch_id, attempt, due_at) \
         VALUES (?, ?, 0, ?) RETURNING id",
    )
    .bind(tenant_id)
    .bind(batch_id)
    .bind(due_at)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

/// Push a batch's pending evaluation further out (window extension).
#[instrument(skip_all)]
pub async fn reschedule_evaluation(
    pool: &Pool,
    batch_id: &str,
    due_at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query("UPDATE scheduler_tasks SET due_at = ? WHERE batch_id = ?")
        .bind(due_at)
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[instrument(skip_all)]
pub async fn next_due_evaluation(pool: &Pool) -> Result<Option<EvaluationTask>> {
    let row = sqlx::query(
        "SELECT id, tenant_id, batch_id, attempt FROM scheduler_tasks \
         WHERE datetime(due_at) <= CURRENT_TIMESTAMP ORDER BY datetime(due_at) ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| EvaluationTask {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        batch_id: row.get("batch_id"),
        attempt: row.get("attempt"),
    }))
}

#[instrument(skip_all)]
pub async fn delete_evaluation(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM scheduler_tasks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exponential backoff for a failed evaluation: 5s * 2^attempt, capped.
#[instrument(skip_all)]
pub async fn backoff_evaluation(pool: &Pool, id: i64, attempt: i32, max_cap_secs: i64) -> Result<()> {
    let secs = (5_i64) * (1_i64 << attempt.min(10));
    let cap = if max_cap_secs <= 0 { secs } else { max_cap_secs };
    let secs = secs.min(cap);
    sqlx::query(
        "UPDATE scheduler_tasks SET attempt = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// TTL sweeps
// ---------------------------------------------------------------------------

/// Remove expired rows: receipts and batches after `receipt_ttl_hours` /
/// `batch_ttl_hours`, content untouched for `content_ttl_days`. Returns
/// (receipts, batches, content) delete counts.
#[instrument(skip_all)]
pub async fn sweep_expired(
    pool: &Pool,
    receipt_ttl_hours: i64,
    batch_ttl_hours: i64,
    content_ttl_days: i64,
) -> Result<(u64, u64, u64)> {
    let now = Utc::now();
    let receipts = sqlx::query("DELETE FROM webhook_receipts WHERE processed_at < ?")
        .bind(now - Duration::hours(receipt_ttl_hours))
        .execute(pool)
        .await?
        .rows_affected();
    let batch_cutoff = now - Duration::hours(batch_ttl_hours);
    let batches = sqlx::query("DELETE FROM build_batches WHERE created_at < ?")
        .bind(batch_cutoff)
        .execute(pool)
        .await?
        .rows_affected();
    sqlx::query(
        "DELETE FROM batch_events WHERE batch_id NOT IN (SELECT batch_id FROM build_batches)",
    )
    .execute(pool)
    .await?;
    let content = sqlx::query("DELETE FROM content WHERE synced_at < ?")
        .bind(now - Duration::days(content_ttl_days))
        .execute(pool)
        .await?
        .rows_affected();
    Ok((receipts, batches, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeKind;
    use serde_json::json;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_content(id: &str) -> NormalizedContent {
        let now = Utc::now();
        NormalizedContent {
            id: id.to_string(),
            title: "Widget".into(),
            slug: "widget".into(),
            content_type: ContentType::Product,
            status: ContentStatus::Published,
            provider_type: ProviderType::Ecommerce,
            provider_name: "storefront-a".into(),
            tenant_id: "t1".into(),
            price: Some(9.99),
            inventory: Some(3),
            variants: Some(json!([{"sku": "W-1"}])),
            provider_data: json!({"vendor": "acme"}),
            created_at: now,
            updated_at: now,
            synced_at: now,
            change_kind: ChangeKind::Created,
        }
    }

    #[tokio::test]
    async fn receipt_insert_is_idempotent() {
        let pool = setup_pool().await;
        assert!(record_receipt(&pool, "storefront-a", "evt-1", "abc")
            .await
            .unwrap());
        assert!(!record_receipt(&pool, "storefront-a", "evt-1", "abc")
            .await
            .unwrap());
        // Different provider, same event id: independent namespace.
        assert!(record_receipt(&pool, "git-cms", "evt-1", "abc")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn upsert_overwrites_not_duplicates() {
        let pool = setup_pool().await;
        let mut record = sample_content("prod-42");
        upsert_content(&pool, &record).await.unwrap();
        record.title = "Widget v2".into();
        record.updated_at = Utc::now();
        upsert_content(&pool, &record).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let stored = get_content(&pool, "prod-42", ContentType::Product, "storefront-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, "Widget v2");
        assert_eq!(stored.price, Some(9.99));
        assert_eq!(stored.variants, record.variants);
    }

    #[tokio::test]
    async fn query_content_filters() {
        let pool = setup_pool().await;
        let mut a = sample_content("p1");
        upsert_content(&pool, &a).await.unwrap();
        a.id = "p2".into();
        a.status = ContentStatus::Draft;
        upsert_content(&pool, &a).await.unwrap();

        let filter = ContentFilter {
            tenant_id: "t1".into(),
            status: Some(ContentStatus::Published),
            ..Default::default()
        };
        let rows = query_content(&pool, &filter, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "p1");

        let filter = ContentFilter {
            tenant_id: "t2".into(),
            ..Default::default()
        };
        assert!(query_content(&pool, &filter, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_batch_is_unique_per_tenant() {
        let pool = setup_pool().await;
        let first = create_active_batch(&pool, "t1").await.unwrap();
        assert!(first.is_some());
        let second = create_active_batch(&pool, "t1").await.unwrap();
        assert!(second.is_none());
        // Other tenants are unaffected.
        assert!(create_active_batch(&pool, "t2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn claim_batch_first_caller_wins() {
        let pool = setup_pool().await;
        let batch = create_active_batch(&pool, "t1").await.unwrap().unwrap();
        assert!(claim_batch_for_build(&pool, &batch.batch_id).await.unwrap());
        assert!(!claim_batch_for_build(&pool, &batch.batch_id).await.unwrap());

        let loaded = load_batch(&pool, &batch.batch_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, BatchState::Building);

        // A new active batch may now be opened for the tenant.
        assert!(create_active_batch(&pool, "t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn append_batch_event_orders_and_dedupes() {
        let pool = setup_pool().await;
        let batch = create_active_batch(&pool, "t1").await.unwrap().unwrap();
        for (i, id) in ["e1", "e2", "e1"].iter().enumerate() {
            let event = ContentChangeEvent {
                event_id: id.to_string(),
                event_type: ChangeKind::Updated,
                content_id: format!("c{i}"),
                content_type: ContentType::Page,
                provider_name: "git-cms".into(),
                tenant_id: "t1".into(),
                occurred_at: Utc::now(),
                requires_build: true,
            };
            // The same event id may arrive twice; only the first insert lands.
            let _ = insert_change_event(&pool, &event).await;
            append_batch_event(&pool, &batch.batch_id, id).await.unwrap();
        }
        let size = append_batch_event(&pool, &batch.batch_id, "e2").await.unwrap();
        assert_eq!(size, Some(2));
        let events = batch_change_events(&pool, &batch.batch_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, "e1");
        assert_eq!(events[1].event_id, "e2");
    }

    #[tokio::test]
    async fn append_to_claimed_batch_is_rejected() {
        let pool = setup_pool().await;
        let batch = create_active_batch(&pool, "t1").await.unwrap().unwrap();
        assert!(claim_batch_for_build(&pool, &batch.batch_id).await.unwrap());

        // The batch left ACTIVE; a late append must not ride along.
        let size = append_batch_event(&pool, &batch.batch_id, "e1").await.unwrap();
        assert_eq!(size, None);
        assert!(batch_change_events(&pool, &batch.batch_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_expired_rows() {
        let pool = setup_pool().await;
        record_receipt(&pool, "storefront-a", "old", "h").await.unwrap();
        sqlx::query("UPDATE webhook_receipts SET processed_at = ?")
            .bind(Utc::now() - Duration::hours(25))
            .execute(&pool)
            .await
            .unwrap();
        record_receipt(&pool, "storefront-a", "fresh", "h").await.unwrap();

        let (receipts, _, _) = sweep_expired(&pool, 24, 24, 30).await.unwrap();
        assert_eq!(receipts, 1);
        // The expired event may now be reprocessed.
        assert!(record_receipt(&pool, "storefront-a", "old", "h").await.unwrap());
    }
}
