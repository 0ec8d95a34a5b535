//! Adapter for git-based CMS push webhooks.
//!
//! A push payload lists commits with added/modified/removed paths. Content
//! files under `content/` map to records: `content/posts/*` become articles,
//! `content/pages/*` become pages, `content/media/*` become media. When the
//! same path appears in several commits the last change wins, matching the
//! repository state after the push.

use super::{json_path, required_str, AdapterError, NormalizeContext, ProviderAdapter};
use crate::model::{ChangeKind, ContentStatus, ContentType, NormalizedContent, ProviderType};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct GitCmsAdapter;

const EVENT_TYPES: &[&str] = &["push"];

const CONTENT_PREFIX: &str = "content/";

impl ProviderAdapter for GitCmsAdapter {
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
        let git_ref = required_str(&payload, "ref", "ref")?;
        // Only pushes to a branch produce content; tag pushes are ignored.
        if !git_ref.starts_with("refs/heads/") {
            return Ok(Vec::new());
        }

        let commits = json_path(&payload, "commits")
            .and_then(|v| v.as_array())
            .ok_or(AdapterError::MissingField("commits"))?;

        // path -> (change, commit timestamp); later commits overwrite earlier.
        let mut changes: BTreeMap<String, (ChangeKind, DateTime<Utc>)> = BTreeMap::new();
        for commit in commits {
            let at = commit
                .get("timestamp")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(ctx.synced_at);
            for (key, kind) in [
                ("added", ChangeKind::Created),
                ("modified", ChangeKind::Updated),
                ("removed", ChangeKind::Deleted),
            ] {
                if let Some(paths) = commit.get(key).and_then(|v| v.as_array()) {
                    for path in paths.iter().filter_map(|p| p.as_str()) {
                        if path.starts_with(CONTENT_PREFIX) {
                            changes.insert(path.to_string(), (kind, at));
                        }
                    }
                }
            }
        }

        let records = changes
            .into_iter()
            .filter_map(|(path, (kind, at))| path_to_record(ctx, &path, kind, at))
            .collect();
        Ok(records)
    }
}

fn path_to_record(
    ctx: &NormalizeContext,
    path: &str,
    change_kind: ChangeKind,
    updated_at: DateTime<Utc>,
) -> Option<NormalizedContent> {
    let relative = path.strip_prefix(CONTENT_PREFIX)?;
    let (section, rest) = relative.split_once('/')?;
    let content_type = match section {
        "posts" => ContentType::Article,
        "pages" => ContentType::Page,
        "media" => ContentType::Media,
        _ => return None,
    };
    let slug = rest
        .rsplit('/')
        .next()
        .map(|file| file.split('.').next().unwrap_or(file))?
        .to_string();
    if slug.is_empty() {
        return None;
    }

    Some(NormalizedContent {
        id: path.to_string(),
        title: humanize(&slug),
        slug,
        content_type,
        status: if change_kind == ChangeKind::Deleted {
            ContentStatus::Deleted
        } else {
            ContentStatus::Published
        },
        provider_type: ProviderType::Cms,
        provider_name: ctx.provider_name.clone(),
        tenant_id: ctx.tenant_id.clone(),
        price: None,
        inventory: None,
        variants: None,
        provider_data: serde_json::json!({ "path": path }),
        created_at: updated_at,
        updated_at,
        synced_at: ctx.synced_at,
        change_kind,
    })
}

/// "hello-world" -> "Hello world".
fn humanize(slug: &str) -> String {
    let spaced = slug.replace(['-', '_'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_context;
    use serde_json::json;

    #[test]
    fn push_maps_content_paths_to_records() {
        let body = json!({
            "ref": "refs/heads/main",
            "commits": [
                {
                    "id": "c1",
                    "timestamp": "2026-08-28T10:00:00Z",
                    "added": ["content/posts/hello-world.md", "README.md"],
                    "modified": ["content/pages/about.md"],
                    "removed": []
                }
            ]
        })
        .to_string();
        let records = GitCmsAdapter
            .normalize(&test_context(), body.as_bytes())
            .unwrap();
        assert_eq!(records.len(), 2);

        let page = records
            .iter()
            .find(|r| r.content_type == ContentType::Page)
            .unwrap();
        assert_eq!(page.slug, "about");
        assert_eq!(page.change_kind, ChangeKind::Updated);

        let post = records
            .iter()
            .find(|r| r.content_type == ContentType::Article)
            .unwrap();
        assert_eq!(post.id, "content/posts/hello-world.md");
        assert_eq!(post.title, "Hello world");
        assert_eq!(post.change_kind, ChangeKind::Created);
        // README.md is outside content/ and produces nothing.
    }

    #[test]
    fn later_commit_wins_for_same_path() {
        let body = json!({
            "ref": "refs/heads/main",
            "commits": [
                {
                    "timestamp": "2026-08-28T10:00:00Z",
                    "added": ["content/posts/a.md"], "modified": [], "removed": []
                },
                {
                    "timestamp": "2026-08-28T10:05:00Z",
                    "added": [], "modified": [], "removed": ["content/posts/a.md"]
                }
            ]
        })
        .to_string();
        let records = GitCmsAdapter
            .normalize(&test_context(), body.as_bytes())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].change_kind, ChangeKind::Deleted);
        assert_eq!(records[0].status, ContentStatus::Deleted);
    }

    #[test]
    fn tag_push_is_ignored() {
        let body = json!({"ref": "refs/tags/v1.0", "commits": []}).to_string();
        let records = GitCmsAdapter
            .normalize(&test_context(), body.as_bytes())
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn media_paths_map_to_media() {
        let body = json!({
            "ref": "refs/heads/main",
            "commits": [{"added": ["content/media/hero.png"], "modified": [], "removed": []}]
        })
        .to_string();
        let records = GitCmsAdapter
            .normalize(&test_context(), body.as_bytes())
            .unwrap();
        assert_eq!(records[0].content_type, ContentType::Media);
        assert_eq!(records[0].slug, "hero");
    }

    #[test]
    fn missing_commits_fails() {
        let body = json!({"ref": "refs/heads/main"}).to_string();
        assert!(matches!(
            GitCmsAdapter.normalize(&test_context(), body.as_bytes()),
            Err(AdapterError::MissingField("commits"))
        ));
    }
}
