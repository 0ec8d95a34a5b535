//! Adaptive build-batching scheduler.
//!
//! Consumes content change events and decides when the build executor runs.
//! Small isolated changes build immediately; bursts are folded into a
//! per-tenant batch that fires when its debounce window elapses or it hits the
//! size cap. All coordination state lives in SQLite so multiple scheduler
//! instances sharing the store agree on batch membership and fire exactly one
//! build per batch.

use crate::builder::BuildExecutor;
use crate::config::Batching;
use crate::db::{self, EvaluationTask, Pool};
use crate::model::{BatchState, ChangeKind, ChangeSummary, ContentChangeEvent, ContentType};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

pub struct Scheduler {
    pool: Pool,
    batching: Batching,
    executor: Arc<dyn BuildExecutor>,
    max_backoff_seconds: i64,
}

impl Scheduler {
    pub fn new(
        pool: Pool,
        batching: Batching,
        executor: Arc<dyn BuildExecutor>,
        max_backoff_seconds: i64,
    ) -> Self {
        Self {
            pool,
            batching,
            executor,
            max_backoff_seconds,
        }
    }

    /// React to one change event.
    ///
    /// The burst count is read back from the store rather than kept in memory,
    /// so every scheduler instance sees the same tenant activity.
    #[instrument(skip_all, fields(tenant = event.tenant_id.as_str(), event = event.event_id.as_str()))]
    pub async fn on_event(&self, event: &ContentChangeEvent) -> Result<()> {
        if !event.requires_build {
            return Ok(());
        }
        match self.schedule(event).await {
            Ok(()) => Ok(()),
            // Batching bookkeeping broke; an immediate build keeps the event
            // from being lost while the batch state is sorted out.
            Err(err) => {
                warn!(error = %err, "batching failed; falling back to immediate build");
                self.trigger_immediate(event).await
            }
        }
    }

    async fn schedule(&self, event: &ContentChangeEvent) -> Result<()> {
        if let Some(batch) = db::active_batch(&self.pool, &event.tenant_id).await? {
            if self.join_batch(&batch.batch_id, event).await? {
                return Ok(());
            }
            // The batch fired between the load and the append; fall through
            // and treat this as the tenant's next change.
        }

        let window_start = Utc::now() - ChronoDuration::seconds(self.batching.window_seconds);
        let recent = db::recent_event_count(&self.pool, &event.tenant_id, window_start).await?;

        if recent < self.batching.immediate_threshold || is_high_priority(event) {
            return self.trigger_immediate(event).await;
        }

        match db::create_active_batch(&self.pool, &event.tenant_id).await? {
            Some(batch) => {
                let window = if recent >= self.batching.bulk_threshold {
                    self.batching.bulk_window_seconds
                } else {
                    self.batching.window_seconds
                };
                db::enqueue_evaluation(
                    &self.pool,
                    &event.tenant_id,
                    &batch.batch_id,
                    Utc::now() + ChronoDuration::seconds(window),
                )
                .await?;
                info!(
                    batch = batch.batch_id.as_str(),
                    window_seconds = window,
                    recent_events = recent,
                    "opened build batch"
                );
                if self.join_batch(&batch.batch_id, event).await? {
                    Ok(())
                } else {
                    self.trigger_immediate(event).await
                }
            }
            // Lost the creation race to another instance; join its batch.
            None => match db::active_batch(&self.pool, &event.tenant_id).await? {
                Some(batch) => {
                    if self.join_batch(&batch.batch_id, event).await? {
                        Ok(())
                    } else {
                        self.trigger_immediate(event).await
                    }
                }
                // The winner already fired. Treat as a fresh small change.
                None => self.trigger_immediate(event).await,
            },
        }
    }

    /// Append to a batch. Returns `false` when the batch left ACTIVE before
    /// the append landed, meaning the event is in no build and the caller must
    /// handle it another way.
    async fn join_batch(&self, batch_id: &str, event: &ContentChangeEvent) -> Result<bool> {
        let Some(size) = db::append_batch_event(&self.pool, batch_id, &event.event_id).await? else {
            return Ok(false);
        };
        if size >= self.batching.max_batch_size {
            info!(batch = batch_id, size, "batch reached size cap");
            self.fire_batch(batch_id).await?;
            return Ok(true);
        }

        // Debouncing: every append pushes the evaluation out, and a sustained
        // burst gets the longer bulk window so an import collapses into one
        // build instead of several.
        let window_start = Utc::now() - ChronoDuration::seconds(self.batching.window_seconds);
        let recent = db::recent_event_count(&self.pool, &event.tenant_id, window_start).await?;
        let window = if recent >= self.batching.bulk_threshold {
            self.batching.bulk_window_seconds
        } else {
            self.batching.window_seconds
        };
        db::reschedule_evaluation(
            &self.pool,
            batch_id,
            Utc::now() + ChronoDuration::seconds(window),
        )
        .await?;
        Ok(true)
    }

    async fn trigger_immediate(&self, event: &ContentChangeEvent) -> Result<()> {
        let summary = ChangeSummary::from_events(
            &event.tenant_id,
            std::slice::from_ref(event),
            self.batching.full_rebuild_threshold,
        );
        let build_id = self
            .executor
            .trigger_build(&event.tenant_id, &summary)
            .await
            .context("immediate build trigger failed")?;
        info!(
            tenant = event.tenant_id.as_str(),
            build = build_id.as_str(),
            "triggered immediate build"
        );
        Ok(())
    }

    /// Fire a batch's build. The ACTIVE -> BUILDING compare-and-swap admits
    /// exactly one caller, so a timer evaluation racing a size-cap check
    /// cannot double-trigger. Returns `false` when someone else won.
    #[instrument(skip_all, fields(batch = batch_id))]
    pub async fn fire_batch(&self, batch_id: &str) -> Result<bool> {
        if !db::claim_batch_for_build(&self.pool, batch_id).await? {
            return Ok(false);
        }
        let batch = db::load_batch(&self.pool, batch_id)
            .await?
            .context("claimed batch disappeared")?;
        let events = db::batch_change_events(&self.pool, batch_id).await?;
        let summary = ChangeSummary::from_events(
            &batch.tenant_id,
            &events,
            self.batching.full_rebuild_threshold,
        );

        match self.executor.trigger_build(&batch.tenant_id, &summary).await {
            Ok(build_id) => {
                db::complete_batch(&self.pool, batch_id, &build_id).await?;
                info!(
                    tenant = batch.tenant_id.as_str(),
                    build = build_id.as_str(),
                    events = summary.event_count,
                    full_rebuild = summary.requires_full_rebuild,
                    "batch build triggered"
                );
            }
            Err(err) => {
                warn!(error = %err, "batch build trigger failed");
                db::fail_batch(&self.pool, batch_id, &err.to_string()).await?;
            }
        }
        Ok(true)
    }

    /// Process the next due evaluation, if any. Returns whether one was
    /// handled; the worker loop sleeps when it returns `false`.
    pub async fn process_next_evaluation(&self) -> Result<bool> {
        let Some(task) = db::next_due_evaluation(&self.pool).await? else {
            return Ok(false);
        };
        match self.evaluate(&task).await {
            Ok(()) => {
                db::delete_evaluation(&self.pool, task.id).await?;
            }
            Err(err) => {
                warn!(
                    task = task.id,
                    batch = task.batch_id.as_str(),
                    attempt = task.attempt,
                    error = %err,
                    "batch evaluation failed; backing off"
                );
                db::backoff_evaluation(&self.pool, task.id, task.attempt, self.max_backoff_seconds)
                    .await?;
            }
        }
        Ok(true)
    }

    async fn evaluate(&self, task: &EvaluationTask) -> Result<()> {
        // The batch may already have fired via the size cap, or been swept.
        let still_active = matches!(
            db::load_batch(&self.pool, &task.batch_id).await?,
            Some(batch) if batch.state == BatchState::Active
        );
        if !still_active {
            return Ok(());
        }
        self.fire_batch(&task.batch_id).await?;
        Ok(())
    }
}

/// Product creations and deletions change what the storefront sells; they jump
/// the batching queue.
fn is_high_priority(event: &ContentChangeEvent) -> bool {
    event.content_type == ContentType::Product
        && matches!(event.event_type, ChangeKind::Created | ChangeKind::Deleted)
}

/// Feed bus events into the scheduler until the bus closes.
pub async fn run_event_loop(
    scheduler: Arc<Scheduler>,
    mut rx: broadcast::Receiver<ContentChangeEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = scheduler.on_event(&event).await {
                    warn!(event = event.event_id.as_str(), error = %err, "scheduling failed");
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // Skipped events are still in their batches; only this
                // receiver's view lagged.
                warn!(missed, "scheduler lagged behind the event bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Poll for due evaluations, sleeping when the queue is idle.
pub async fn run_worker(scheduler: Arc<Scheduler>, poll_interval_ms: u64) {
    let idle = Duration::from_millis(poll_interval_ms);
    loop {
        match scheduler.process_next_evaluation().await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(idle).await,
            Err(err) => {
                warn!(error = %err, "evaluation worker tick failed");
                tokio::time::sleep(idle).await;
            }
        }
    }
}
