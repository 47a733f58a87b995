//! SQLite schema definitions for the catalog database.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const PRODUCTS_TABLE_V1: Table = Table {
    name: "products",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("slug", &SqlType::Text, non_null = true),
        sqlite_column!("permalink", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("stock_status", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("featured_asset_id", &SqlType::Integer),
        sqlite_column!(
            "description",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
    ],
    indices: &[
        (
            "idx_products_eligibility",
            "status, stock_status, created_at",
        ),
        ("idx_products_featured", "featured_asset_id"),
    ],
};

const PRODUCT_GALLERY_TABLE_V1: Table = Table {
    name: "product_gallery",
    columns: &[
        sqlite_column!(
            "product_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "products",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("asset_id", &SqlType::Integer, non_null = true),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_gallery_product", "product_id"),
        ("idx_gallery_asset", "asset_id"),
    ],
};

const ASSETS_TABLE_V1: Table = Table {
    name: "assets",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("file_path", &SqlType::Text, non_null = true),
        sqlite_column!("url", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

/// Standalone content (pages, posts) whose bodies may embed asset URLs
const CONTENT_TABLE_V1: Table = Table {
    name: "content",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("body", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        PRODUCTS_TABLE_V1,
        PRODUCT_GALLERY_TABLE_V1,
        ASSETS_TABLE_V1,
        CONTENT_TABLE_V1,
    ],
    migration: None,
}];
