//! Collaborator traits used by the deletion processor.

use super::models::{DeletableItem, EligibilityFilter};
use anyhow::Result;

/// Catalog query and storage engine.
pub trait CatalogStore: Send + Sync {
    /// Ids of all items matching the filter, in catalog order. Uncapped.
    fn find_item_ids(&self, filter: &EligibilityFilter) -> Result<Vec<i64>>;

    /// Number of items matching the filter.
    fn count_eligible(&self, filter: &EligibilityFilter) -> Result<u64>;

    fn get_item(&self, id: i64) -> Result<Option<DeletableItem>>;

    /// Permanently delete an item. Returns false if nothing was deleted.
    fn delete_item(&self, id: i64) -> Result<bool>;
}

/// Image deletion and reference counting.
pub trait AssetStore: Send + Sync {
    /// Featured asset first, then gallery assets, without duplicates.
    fn resolve_assets(&self, item: &DeletableItem) -> Vec<i64> {
        let mut ids: Vec<i64> = Vec::with_capacity(item.gallery_asset_ids.len() + 1);
        for id in item
            .featured_asset_id
            .into_iter()
            .chain(item.gallery_asset_ids.iter().copied())
        {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Whether anything other than `excluding_item` still uses the asset:
    /// another item's featured image or gallery, or a content body
    /// (other items' descriptions and standalone content) embedding its URL.
    fn is_referenced_elsewhere(&self, asset_id: i64, excluding_item: i64) -> Result<bool>;

    /// Delete an asset record and its file. Returns false if the asset does
    /// not exist.
    fn delete_asset(&self, asset_id: i64) -> Result<bool>;
}
