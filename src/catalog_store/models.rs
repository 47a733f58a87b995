//! Catalog data types.

use serde::{Deserialize, Serialize};

pub const STATUS_PUBLISH: &str = "publish";
pub const STOCK_OUT_OF_STOCK: &str = "outofstock";

/// A catalog product as seen by the deletion processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletableItem {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub permalink: String,
    pub status: String,
    pub stock_status: String,
    /// Unix timestamp of creation.
    pub created_at: i64,
    pub featured_asset_id: Option<i64>,
    /// Gallery assets in display order.
    pub gallery_asset_ids: Vec<i64>,
}

/// Selection criteria for eligible items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityFilter {
    pub status: String,
    pub stock_status: String,
    /// Only items created strictly before this unix timestamp match.
    pub created_before: i64,
}

impl EligibilityFilter {
    /// Published, out-of-stock items older than `created_before`.
    pub fn stale_stock(created_before: i64) -> Self {
        Self {
            status: STATUS_PUBLISH.to_string(),
            stock_status: STOCK_OUT_OF_STOCK.to_string(),
            created_before,
        }
    }
}

/// Input for inserting a product.
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    pub permalink: String,
    pub status: String,
    pub stock_status: String,
    pub created_at: i64,
    pub featured_asset_id: Option<i64>,
    pub gallery_asset_ids: Vec<i64>,
    pub description: String,
}

/// A media file owned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: i64,
    /// Path relative to the media directory.
    pub file_path: String,
    /// Public URL, used to find references inside content bodies.
    pub url: String,
}
