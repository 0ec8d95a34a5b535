//! HTTP surface: webhook intake plus a read API over the content store.

use crate::db::{self, ContentFilter, Pool};
use crate::gateway::{Gateway, Headers, IngestError};
use crate::model::{ContentStatus, ContentType, IngestOutcome};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub pool: Pool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/:provider", post(ingest_webhook))
        .route("/content", get(list_content))
        .route("/content/changed/:provider", get(changed_content))
        .route("/content/:provider/:content_type/:id", get(content_by_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error envelope. Internal failures are logged with detail and returned
/// as an opaque 500.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match &err {
            IngestError::Unauthorized { .. } => Self {
                status: StatusCode::UNAUTHORIZED,
                message: err.to_string(),
            },
            IngestError::UnsupportedProvider { .. } | IngestError::Validation { .. } => {
                Self::bad_request(err.to_string())
            }
            IngestError::Storage(_) | IngestError::Publish(_) | IngestError::Secret { .. } => {
                error!(error = %err, "webhook ingestion failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".into(),
                }
            }
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn ingest_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let headers = lowercase_headers(&headers);
    let outcome = state.gateway.handle(&provider, &headers, &body).await?;
    let body = match outcome {
        IngestOutcome::Accepted { records } => json!({ "status": "accepted", "records": records }),
        IngestOutcome::Duplicate => json!({ "status": "duplicate" }),
        IngestOutcome::ReplayIgnored => json!({ "status": "replay_ignored" }),
    };
    Ok(Json(body))
}

fn lowercase_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

#[derive(Deserialize)]
struct ContentQuery {
    tenant_id: String,
    content_type: Option<String>,
    provider: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
}

async fn list_content(
    State(state): State<AppState>,
    Query(query): Query<ContentQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_type = query
        .content_type
        .as_deref()
        .map(|raw| {
            ContentType::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown content type '{raw}'")))
        })
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            ContentStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status '{raw}'")))
        })
        .transpose()?;

    let filter = ContentFilter {
        tenant_id: query.tenant_id,
        content_type,
        provider_name: query.provider,
        status,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let items = db::query_content(&state.pool, &filter, limit).await?;
    let count = items.len();
    Ok(Json(json!({ "items": items, "count": count })))
}

#[derive(Deserialize)]
struct ChangedQuery {
    /// RFC 3339 cutoff; everything the provider changed after it.
    since: String,
    limit: Option<i64>,
}

/// Incremental fetch for build pipelines: what did this provider change
/// since the last build.
async fn changed_content(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<ChangedQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let since = chrono::DateTime::parse_from_rfc3339(&query.since)
        .map_err(|_| ApiError::bad_request(format!("unparseable 'since' value '{}'", query.since)))?
        .with_timezone(&chrono::Utc);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let items = db::changed_since(&state.pool, &provider, since, limit).await?;
    let count = items.len();
    Ok(Json(json!({ "items": items, "count": count })))
}

async fn content_by_id(
    State(state): State<AppState>,
    Path((provider, content_type, id)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_type = ContentType::parse(&content_type)
        .ok_or_else(|| ApiError::bad_request(format!("unknown content type '{content_type}'")))?;
    match db::get_content(&state.pool, &id, content_type, &provider).await? {
        Some(record) => Ok(Json(serde_json::to_value(record).map_err(anyhow::Error::from)?)),
        None => Err(ApiError::not_found(format!(
            "no {} '{}' from provider '{}'",
            content_type.as_str(),
            id,
            provider
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterRegistry;
    use crate::bus::EventBus;
    use crate::config::{self, Config, SignatureAlgorithm};
    use crate::secrets::ConfigSecretStore;
    use crate::verify::compute_signature;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use sqlx::SqlitePool;
    use tower::ServiceExt;

    async fn test_app() -> (Router, Pool, EventBus) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        let providers = cfg.webhook.providers;
        let registry = Arc::new(AdapterRegistry::from_config(&providers));
        let secrets = Arc::new(ConfigSecretStore::new(providers.clone()));
        let bus = EventBus::new(16);
        let gateway = Arc::new(Gateway::new(
            pool.clone(),
            registry,
            secrets,
            bus.clone(),
            providers,
            300,
        ));
        let app = router(AppState {
            gateway,
            pool: pool.clone(),
        });
        (app, pool, bus)
    }

    fn signed_product_request(body: &str) -> Request<Body> {
        let sig = compute_signature(SignatureAlgorithm::HmacSha256, "dev-secret", body.as_bytes());
        Request::builder()
            .method("POST")
            .uri("/webhooks/storefront-a")
            .header("X-Storefront-Hmac-Sha256", sig)
            .header("X-Storefront-Timestamp", Utc::now().timestamp().to_string())
            .header("X-Storefront-Event-Id", "evt-1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn product_payload() -> String {
        json!({
            "event": "products/update",
            "product": {
                "id": 42,
                "title": "Widget",
                "handle": "widget",
                "status": "active",
                "variants": [{"sku": "W-1", "price": "9.99", "inventory_quantity": 3}],
                "created_at": "2026-08-01T00:00:00Z",
                "updated_at": "2026-08-29T00:00:00Z"
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _pool, _bus) = test_app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn signed_webhook_is_accepted_and_readable() {
        let (app, _pool, bus) = test_app().await;
        let _rx = bus.subscribe();

        let response = app
            .clone()
            .oneshot(signed_product_request(&product_payload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["records"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::get("/content/storefront-a/product/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record = body_json(response).await;
        assert_eq!(record["title"], "Widget");
        assert_eq!(record["slug"], "widget");

        let response = app
            .oneshot(
                Request::get("/content?tenant_id=tenant-1&content_type=product")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listing = body_json(response).await;
        assert_eq!(listing["count"], 1);
    }

    #[tokio::test]
    async fn changed_since_serves_incremental_fetch() {
        let (app, _pool, bus) = test_app().await;
        let _rx = bus.subscribe();

        let response = app
            .clone()
            .oneshot(signed_product_request(&product_payload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::get("/content/changed/storefront-a?since=2026-08-01T00:00:00Z")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);

        // Garbage cutoff is rejected.
        let response = app
            .oneshot(
                Request::get("/content/changed/storefront-a?since=yesterday")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let (app, _pool, _bus) = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/storefront-a")
            .header("X-Storefront-Hmac-Sha256", "00".repeat(32))
            .header("X-Storefront-Timestamp", Utc::now().timestamp().to_string())
            .body(Body::from(product_payload()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_provider_is_bad_request() {
        let (app, _pool, _bus) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/nonesuch")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_content_type_in_listing_is_rejected() {
        let (app, _pool, _bus) = test_app().await;
        let response = app
            .oneshot(
                Request::get("/content?tenant_id=tenant-1&content_type=widget")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_content_is_not_found() {
        let (app, _pool, _bus) = test_app().await;
        let response = app
            .oneshot(
                Request::get("/content/storefront-a/product/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
