//! Adapter for storefront-style e-commerce platforms.
//!
//! Payloads carry an `event` topic (`products/create`, `inventory_levels/update`,
//! `collections/update`, ...) and a `product` or `collection` object. Products
//! map to `product` records with price/inventory/variants; collection changes
//! map to `collection` records, which the scheduler treats as full-rebuild
//! triggers.

use super::{json_path, required_str, timestamp_or, AdapterError, NormalizeContext, ProviderAdapter};
use crate::model::{ChangeKind, ContentStatus, ContentType, NormalizedContent, ProviderType};
use serde_json::Value;

pub struct StorefrontAdapter;

const EVENT_TYPES: &[&str] = &[
    "products/create",
    "products/update",
    "products/delete",
    "inventory_levels/update",
    "collections/create",
    "collections/update",
    "collections/delete",
];

impl ProviderAdapter for StorefrontAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ecommerce
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
        let event = required_str(&payload, "event", "event")?;

        match event.as_str() {
            "products/create" | "products/update" | "products/delete"
            | "inventory_levels/update" => {
                let change = match event.as_str() {
                    "products/create" => ChangeKind::Created,
                    "products/delete" => ChangeKind::Deleted,
                    "inventory_levels/update" => ChangeKind::InventoryUpdated,
                    _ => ChangeKind::Updated,
                };
                Ok(vec![self.normalize_product(ctx, &payload, change)?])
            }
            "collections/create" | "collections/update" | "collections/delete" => {
                let change = match event.as_str() {
                    "collections/create" => ChangeKind::Created,
                    "collections/delete" => ChangeKind::Deleted,
                    _ => ChangeKind::Updated,
                };
                Ok(vec![self.normalize_collection(ctx, &payload, change)?])
            }
            _ => Ok(Vec::new()),
        }
    }
}

impl StorefrontAdapter {
    fn normalize_product(
        &self,
        ctx: &NormalizeContext,
        payload: &Value,
        change: ChangeKind,
    ) -> Result<NormalizedContent, AdapterError> {
        let product = json_path(payload, "product")
            .ok_or(AdapterError::MissingField("product"))?;
        let id = product
            .get("id")
            .map(stringify_id)
            .ok_or(AdapterError::MissingField("product.id"))?;
        let title = required_str(product, "title", "product.title")?;
        let slug = json_path(product, "handle")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| slugify(&title));

        let status = if change == ChangeKind::Deleted {
            ContentStatus::Deleted
        } else {
            match json_path(product, "status").and_then(|v| v.as_str()) {
                Some("active") => ContentStatus::Published,
                Some("archived") => ContentStatus::Archived,
                _ => ContentStatus::Draft,
            }
        };

        let variants = product.get("variants").cloned();
        let price = variants
            .as_ref()
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("price"))
            .and_then(price_as_f64);
        let inventory = variants
            .as_ref()
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("inventory_quantity").and_then(Value::as_i64))
                    .sum()
            });

        Ok(NormalizedContent {
            id,
            title,
            slug,
            content_type: ContentType::Product,
            status,
            provider_type: ProviderType::Ecommerce,
            provider_name: ctx.provider_name.clone(),
            tenant_id: ctx.tenant_id.clone(),
            price,
            inventory,
            variants,
            provider_data: product.clone(),
            created_at: timestamp_or(product, "created_at", ctx.synced_at),
            updated_at: timestamp_or(product, "updated_at", ctx.synced_at),
            synced_at: ctx.synced_at,
            change_kind: change,
        })
    }

    fn normalize_collection(
        &self,
        ctx: &NormalizeContext,
        payload: &Value,
        change: ChangeKind,
    ) -> Result<NormalizedContent, AdapterError> {
        let collection = json_path(payload, "collection")
            .ok_or(AdapterError::MissingField("collection"))?;
        let id = collection
            .get("id")
            .map(stringify_id)
            .ok_or(AdapterError::MissingField("collection.id"))?;
        let title = required_str(collection, "title", "collection.title")?;
        let slug = json_path(collection, "handle")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| slugify(&title));

        Ok(NormalizedContent {
            id,
            title,
            slug,
            content_type: ContentType::Collection,
            status: if change == ChangeKind::Deleted {
                ContentStatus::Deleted
            } else {
                ContentStatus::Published
            },
            provider_type: ProviderType::Ecommerce,
            provider_name: ctx.provider_name.clone(),
            tenant_id: ctx.tenant_id.clone(),
            price: None,
            inventory: None,
            variants: None,
            provider_data: collection.clone(),
            created_at: timestamp_or(collection, "created_at", ctx.synced_at),
            updated_at: timestamp_or(collection, "updated_at", ctx.synced_at),
            synced_at: ctx.synced_at,
            change_kind: change,
        })
    }
}

/// Product ids arrive as numbers or strings depending on the platform.
fn stringify_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Prices arrive as `"9.99"` strings or bare numbers.
fn price_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
