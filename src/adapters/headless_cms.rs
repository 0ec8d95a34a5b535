//! Adapter for headless CMS entry webhooks.
//!
//! Payloads carry a `type` (`entry.publish`, `entry.unpublish`, `entry.archive`,
//! `entry.delete`, `asset.publish`) plus an `entry`/`asset` object with an id,
//! a content type name, and a `fields` map.

use super::{json_path, required_str, timestamp_or, AdapterError, NormalizeContext, ProviderAdapter};
use crate::model::{ChangeKind, ContentStatus, ContentType, NormalizedContent, ProviderType};
use serde_json::Value;

pub struct HeadlessCmsAdapter;

const EVENT_TYPES: &[&str] = &[
    "entry.create",
    "entry.publish",
    "entry.unpublish",
    "entry.archive",
    "entry.delete",
    "asset.publish",
    "asset.delete",
];

impl ProviderAdapter for HeadlessCmsAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Cms
    }

    fn supported_event_types(&self) -> &'static [&'static str] {
        EVENT_TYPES
    }

    fn normalize(
        &self,
        ctx: &NormalizeContext,
        body: &[u8],
    ) -> Result<Vec<NormalizedContent>, AdapterError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;
        let event = required_str(&payload, "type", "type")?;
        if !EVENT_TYPES.contains(&event.as_str()) {
            return Ok(Vec::new());
        }

        let is_asset = event.starts_with("asset.");
        let subject = if is_asset {
            json_path(&payload, "asset").ok_or(AdapterError::MissingField("asset"))?
        } else {
            json_path(&payload, "entry").ok_or(AdapterError::MissingField("entry"))?
        };

        let id = required_str(subject, "id", "entry.id")?;
        let title = json_path(subject, "fields.title")
            .and_then(|v| v.as_str())
            .unwrap_or(&id)
            .to_string();
        let slug = json_path(subject, "fields.slug")
            .and_then(|v| v.as_str())
            .unwrap_or(&id)
            .to_string();

        let content_type = if is_asset {
            ContentType::Media
        } else {
            match json_path(subject, "contentType").and_then(|v| v.as_str()) {
                Some("page") => ContentType::Page,
                Some("collection") => ContentType::Collection,
                _ => ContentType::Article,
            }
        };

        let (status, change_kind) = match event.as_str() {
            "entry.create" => (ContentStatus::Draft, ChangeKind::Created),
            "entry.publish" | "asset.publish" => (ContentStatus::Published, ChangeKind::Updated),
            "entry.unpublish" => (ContentStatus::Draft, ChangeKind::Updated),
            "entry.archive" => (ContentStatus::Archived, ChangeKind::Updated),
            _ => (ContentStatus::Deleted, ChangeKind::Deleted),
        };

        Ok(vec![NormalizedContent {
            id,
            title,
            slug,
            content_type,
            status,
            provider_type: ProviderType::Cms,
            provider_name: ctx.provider_name.clone(),
            tenant_id: ctx.tenant_id.clone(),
            price: None,
            inventory: None,
            variants: None,
            provider_data: subject.clone(),
            created_at: timestamp_or(subject, "createdAt", ctx.synced_at),
            updated_at: timestamp_or(subject, "updatedAt", ctx.synced_at),
            synced_at: ctx.synced_at,
            change_kind,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_context;
    use serde_json::json;

    fn entry_payload(event: &str, content_type: &str) -> Vec<u8> {
        json!({
            "type": event,
            "entry": {
                "id": "entry-7",
                "contentType": content_type,
                "fields": {"title": "Hello World", "slug": "hello-world"},
                "createdAt": "2026-08-10T08:00:00Z",
                "updatedAt": "2026-08-25T09:15:00Z"
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn publish_maps_to_published_article() {
        let records = HeadlessCmsAdapter
            .normalize(&test_context(), &entry_payload("entry.publish", "article"))
            .unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "entry-7");
        assert_eq!(record.content_type, ContentType::Article);
        assert_eq!(record.status, ContentStatus::Published);
        assert_eq!(record.slug, "hello-world");
        assert!(record.price.is_none());
    }

    #[test]
    fn page_content_type_respected() {
        let records = HeadlessCmsAdapter
            .normalize(&test_context(), &entry_payload("entry.publish", "page"))
            .unwrap();
        assert_eq!(records[0].content_type, ContentType::Page);
    }

    #[test]
    fn delete_marks_deleted() {
        let records = HeadlessCmsAdapter
            .normalize(&test_context(), &entry_payload("entry.delete", "article"))
            .unwrap();
        assert_eq!(records[0].status, ContentStatus::Deleted);
        assert_eq!(records[0].change_kind, ChangeKind::Deleted);
    }

    #[test]
    fn asset_publish_is_media() {
        let body = json!({
            "type": "asset.publish",
            "asset": {"id": "img-1", "fields": {"title": "Hero"}}
        })
        .to_string();
        let records = HeadlessCmsAdapter
            .normalize(&test_context(), body.as_bytes())
            .unwrap();
        assert_eq!(records[0].content_type, ContentType::Media);
        assert_eq!(records[0].title, "Hero");
        // Slug falls back to the id when fields.slug is absent.
        assert_eq!(records[0].slug, "img-1");
    }

    #[test]
    fn unknown_type_yields_nothing() {
        let body = json!({"type": "space.update"}).to_string();
        let records = HeadlessCmsAdapter
            .normalize(&test_context(), body.as_bytes())
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn missing_entry_fails() {
        let body = json!({"type": "entry.publish"}).to_string();
        assert!(matches!(
            HeadlessCmsAdapter.normalize(&test_context(), body.as_bytes()),
            Err(AdapterError::MissingField("entry"))
        ));
    }
}
