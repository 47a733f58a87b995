//! Catalog fixtures for end-to-end tests

use chrono::{Months, Utc};
use catalog_pruner::catalog_store::{NewProduct, STATUS_PUBLISH, STOCK_OUT_OF_STOCK};
use std::path::Path;

/// Published, out of stock and two years old: eligible with default settings.
pub fn stale_product(slug: &str) -> NewProduct {
    let created_at = Utc::now()
        .checked_sub_months(Months::new(24))
        .expect("date out of range")
        .timestamp();
    NewProduct {
        name: slug.replace('-', " "),
        slug: slug.to_string(),
        permalink: format!("https://shop.example/product/{}/", slug),
        status: STATUS_PUBLISH.to_string(),
        stock_status: STOCK_OUT_OF_STOCK.to_string(),
        created_at,
        ..Default::default()
    }
}

/// Out of stock but created last week: never eligible.
pub fn fresh_product(slug: &str) -> NewProduct {
    NewProduct {
        created_at: (Utc::now() - chrono::Duration::days(7)).timestamp(),
        ..stale_product(slug)
    }
}

/// Write a small file into the media directory.
pub fn add_media_file(media_path: &Path, name: &str) {
    std::fs::write(media_path.join(name), b"image-bytes").expect("Failed to write media file");
}
