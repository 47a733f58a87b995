use super::models::{Asset, DeletableItem, EligibilityFilter, NewProduct};
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::{AssetStore, CatalogStore};
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// SQLite-backed catalog, also acting as the asset store.
///
/// Asset files live under `media_path`; the `assets` table stores paths
/// relative to it.
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
    media_path: PathBuf,
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>, M: AsRef<Path>>(db_path: P, media_path: M) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            media_path: media_path.as_ref().to_path_buf(),
        })
    }

    pub fn media_path(&self) -> &Path {
        &self.media_path
    }

    // =========================================================================
    // Write helpers (fixtures, imports)
    // =========================================================================

    pub fn insert_product(&self, product: &NewProduct) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO products
               (name, slug, permalink, status, stock_status, created_at, featured_asset_id, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                product.name,
                product.slug,
                product.permalink,
                product.status,
                product.stock_status,
                product.created_at,
                product.featured_asset_id,
                product.description,
            ],
        )?;
        let id = tx.last_insert_rowid();
        for (position, asset_id) in product.gallery_asset_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO product_gallery (product_id, asset_id, position) VALUES (?1, ?2, ?3)",
                params![id, asset_id, position as i64],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    pub fn insert_asset(&self, file_path: &str, url: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO assets (file_path, url) VALUES (?1, ?2)",
            params![file_path, url],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_content(&self, title: &str, body: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO content (title, body) VALUES (?1, ?2)",
            params![title, body],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_asset(&self, asset_id: i64) -> Result<Option<Asset>> {
        let conn = self.conn.lock().unwrap();
        let asset = conn
            .query_row(
                "SELECT id, file_path, url FROM assets WHERE id = ?1",
                params![asset_id],
                |row| {
                    Ok(Asset {
                        id: row.get(0)?,
                        file_path: row.get(1)?,
                        url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(asset)
    }

    pub fn products_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    fn load_gallery(conn: &Connection, product_id: i64) -> rusqlite::Result<Vec<i64>> {
        let mut stmt = conn.prepare(
            "SELECT asset_id FROM product_gallery WHERE product_id = ?1 ORDER BY position",
        )?;
        let ids = stmt
            .query_map(params![product_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn find_item_ids(&self, filter: &EligibilityFilter) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM products
             WHERE status = ?1 AND stock_status = ?2 AND created_at < ?3
             ORDER BY id",
        )?;
        let ids = stmt
            .query_map(
                params![filter.status, filter.stock_status, filter.created_before],
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("Failed to query eligible products")?;
        Ok(ids)
    }

    fn count_eligible(&self, filter: &EligibilityFilter) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM products
                 WHERE status = ?1 AND stock_status = ?2 AND created_at < ?3",
                params![filter.status, filter.stock_status, filter.created_before],
                |row| row.get(0),
            )
            .context("Failed to count eligible products")?;
        Ok(count as u64)
    }

    fn get_item(&self, id: i64) -> Result<Option<DeletableItem>> {
        let conn = self.conn.lock().unwrap();
        let item = conn
            .query_row(
                "SELECT id, name, slug, permalink, status, stock_status, created_at, featured_asset_id
                 FROM products WHERE id = ?1",
                params![id],
                |row| {
                    Ok(DeletableItem {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        slug: row.get(2)?,
                        permalink: row.get(3)?,
                        status: row.get(4)?,
                        stock_status: row.get(5)?,
                        created_at: row.get(6)?,
                        featured_asset_id: row.get(7)?,
                        gallery_asset_ids: Vec::new(),
                    })
                },
            )
            .optional()?;

        match item {
            Some(mut item) => {
                item.gallery_asset_ids = Self::load_gallery(&conn, item.id)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    fn delete_item(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // Gallery rows go with the product (ON DELETE CASCADE).
        let deleted = conn.execute("DELETE FROM products WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

impl AssetStore for SqliteCatalogStore {
    fn is_referenced_elsewhere(&self, asset_id: i64, excluding_item: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let by_id: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM products WHERE featured_asset_id = ?1 AND id != ?2)
                 OR EXISTS(SELECT 1 FROM product_gallery WHERE asset_id = ?1 AND product_id != ?2)",
            params![asset_id, excluding_item],
            |row| row.get(0),
        )?;
        if by_id {
            return Ok(true);
        }

        let url: Option<String> = conn
            .query_row(
                "SELECT url FROM assets WHERE id = ?1",
                params![asset_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return Ok(false);
        };

        let in_bodies: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM products WHERE id != ?2 AND instr(description, ?1) > 0)
                 OR EXISTS(SELECT 1 FROM content WHERE instr(body, ?1) > 0)",
            params![url, excluding_item],
            |row| row.get(0),
        )?;
        Ok(in_bodies)
    }

    fn delete_asset(&self, asset_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let file_path: Option<String> = conn
            .query_row(
                "SELECT file_path FROM assets WHERE id = ?1",
                params![asset_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(file_path) = file_path else {
            return Ok(false);
        };

        let full_path = self.media_path.join(&file_path);
        match std::fs::remove_file(&full_path) {
            Ok(()) => debug!("Removed asset file {:?}", full_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Asset file {:?} already missing", full_path);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {:?}", full_path));
            }
        }

        conn.execute("DELETE FROM assets WHERE id = ?1", params![asset_id])?;
        Ok(true)
    }
}
