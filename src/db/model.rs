//! Query filters and view models used by repositories.
//!
//! Keep these structs focused on the data passed to and returned by queries.
//! Business logic should live in higher layers.

use crate::model::{ContentStatus, ContentType};

/// Filter for content range queries. `tenant_id` is required; the rest narrow
/// the result set.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub tenant_id: String,
    pub content_type: Option<ContentType>,
    pub provider_name: Option<String>,
    pub status: Option<ContentStatus>,
}

/// Delayed batch evaluation pulled off the scheduler queue.
#[derive(Debug, Clone)]
pub struct EvaluationTask {
    pub id: i64,
    pub tenant_id: String,
    pub batch_id: String,
    pub attempt: i32,
}
