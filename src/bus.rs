//! Event bus: fan-out channel carrying content change notifications.
//!
//! Built on `tokio::sync::broadcast` so every subscriber gets an independent
//! receiver; one slow or failed consumer lags its own channel without blocking
//! delivery to the others. Publish failures are retried with bounded backoff
//! before being surfaced, and delivery is at-least-once: consumers must
//! tolerate duplicates.

use crate::model::ContentChangeEvent;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_BACKOFF_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish failed after {attempts} attempts: no active subscribers")]
    NoSubscribers { attempts: u32 },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ContentChangeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish one event to all subscribers. Retries with exponential backoff
    /// while no receiver is attached (startup races), then surfaces the
    /// failure; the caller decides whether that fails the ingestion.
    pub async fn publish(&self, event: ContentChangeEvent) -> Result<(), BusError> {
        let mut pending = event;
        for attempt in 0..PUBLISH_ATTEMPTS {
            match self.sender.send(pending) {
                Ok(_) => return Ok(()),
                Err(broadcast::error::SendError(returned)) => {
                    pending = returned;
                    let delay = PUBLISH_BACKOFF_MS * (1 << attempt);
                    warn!(attempt, delay_ms = delay, "event bus has no subscribers; retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
        Err(BusError::NoSubscribers {
            attempts: PUBLISH_ATTEMPTS,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContentChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
