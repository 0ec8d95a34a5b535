//! Build executor gateway.
//!
//! The executor that actually regenerates the site is an external
//! collaborator; only its trigger contract lives here. [`BuildExecutor`] is
//! the seam tests fake out.

use crate::model::ChangeSummary;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Ask the executor to rebuild the tenant's site. Returns the build id.
    async fn trigger_build(&self, tenant_id: &str, summary: &ChangeSummary) -> Result<String>;
}

#[derive(Clone)]
pub struct HttpBuildExecutor {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for HttpBuildExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBuildExecutor")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBuildExecutor {
    pub fn new(base_url: &str, token: String, timeout_seconds: u64) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid build executor base URL")?;
        let http = Client::builder()
            .user_agent("site-sync/0.1")
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("reqwest client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn build_request(&self, tenant_id: &str, summary: &ChangeSummary) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("v1/builds")
            .context("invalid build executor base URL")?;
        let body = build_trigger_body(tenant_id, summary);
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(&body)
            .build()
            .context("failed to build trigger request")
    }
}

#[async_trait]
impl BuildExecutor for HttpBuildExecutor {
    async fn trigger_build(&self, tenant_id: &str, summary: &ChangeSummary) -> Result<String> {
        let request = self.build_request(tenant_id, summary)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach build executor")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from build executor: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("build executor error {}: {}", status, body));
        }

        let payload: TriggerBuildResponse =
            res.json().await.context("invalid build executor response")?;
        Ok(payload.build_id)
    }
}

pub fn build_trigger_body(tenant_id: &str, summary: &ChangeSummary) -> Value {
    json!({
        "tenantId": tenant_id,
        "changeSummary": {
            "eventCount": summary.event_count,
            "countsByType": summary.counts_by_type,
            "countsByProvider": summary.counts_by_provider,
            "affectedContentIds": summary.affected_content_ids,
            "requiresFullRebuild": summary.requires_full_rebuild,
        },
    })
}

#[derive(Deserialize)]
struct TriggerBuildResponse {
    #[serde(rename = "buildId")]
    build_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_summary() -> ChangeSummary {
        ChangeSummary {
            tenant_id: "t1".into(),
            event_count: 2,
            counts_by_type: BTreeMap::from([("created".to_string(), 2)]),
            counts_by_provider: BTreeMap::from([("storefront-a".to_string(), 2)]),
            affected_content_ids: vec!["p1".into(), "p2".into()],
            requires_full_rebuild: false,
        }
    }

    #[test]
    fn trigger_body_shape() {
        let body = build_trigger_body("t1", &sample_summary());
        assert_eq!(body["tenantId"], "t1");
        assert_eq!(body["changeSummary"]["eventCount"], 2);
        assert_eq!(body["changeSummary"]["countsByType"]["created"], 2);
        assert_eq!(body["changeSummary"]["affectedContentIds"][1], "p2");
        assert_eq!(body["changeSummary"]["requiresFullRebuild"], false);
    }

    #[test]
    fn build_request_sets_headers() {
        let executor =
            HttpBuildExecutor::new("https://builder.internal/", "token".into(), 30).unwrap();
        let request = executor.build_request("t1", &sample_summary()).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/builds");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }
}
