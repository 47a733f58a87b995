//! Batch deletion of stale out-of-stock products.

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::run_log::RunLog;
use super::settings::CleanupSettings;
use crate::catalog_store::{AssetStore, CatalogStore, DeletableItem, EligibilityFilter};
use crate::server::metrics;
use crate::status_store::{DeletedRecord, StatusKey, StatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionOptions {
    pub age_threshold_months: u32,
    pub delete_images: bool,
    pub track_gone: bool,
}

impl From<&CleanupSettings> for DeletionOptions {
    fn from(settings: &CleanupSettings) -> Self {
        Self {
            age_threshold_months: settings.age_threshold_months,
            delete_images: settings.delete_images,
            track_gone: settings.gone_tracking,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Number of items the catalog query returned.
    pub attempted: u64,
    pub deleted: u64,
    pub assets_deleted: u64,
    /// Assets kept because something else still references them.
    pub assets_skipped: u64,
    pub assets_failed: u64,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("age threshold must be at least one month, got {0}")]
    InvalidAgeThreshold(u32),
    #[error("cutoff date is out of range")]
    CutoffOutOfRange,
    #[error("catalog query failed: {0:#}")]
    Query(anyhow::Error),
}

/// `now` minus `months` calendar months. Day-of-month is clamped, so
/// March 31st minus one month is February 28th/29th.
pub fn cutoff(now: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, ProcessorError> {
    if months == 0 {
        return Err(ProcessorError::InvalidAgeThreshold(months));
    }
    now.checked_sub_months(Months::new(months))
        .ok_or(ProcessorError::CutoffOutOfRange)
}

pub struct DeletionProcessor {
    catalog: Arc<dyn CatalogStore>,
    assets: Arc<dyn AssetStore>,
    status_store: Arc<dyn StatusStore>,
    run_log: Arc<RunLog>,
}

impl DeletionProcessor {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        assets: Arc<dyn AssetStore>,
        status_store: Arc<dyn StatusStore>,
        run_log: Arc<RunLog>,
    ) -> Self {
        Self {
            catalog,
            assets,
            status_store,
            run_log,
        }
    }

    pub fn filter_for(
        options: &DeletionOptions,
        now: DateTime<Utc>,
    ) -> Result<EligibilityFilter, ProcessorError> {
        let cutoff = cutoff(now, options.age_threshold_months)?;
        Ok(EligibilityFilter::stale_stock(cutoff.timestamp()))
    }

    /// Count eligible items with the same filter `run` would use.
    pub fn count_eligible(
        &self,
        options: &DeletionOptions,
        now: DateTime<Utc>,
    ) -> Result<u64, ProcessorError> {
        let filter = Self::filter_for(options, now)?;
        self.catalog
            .count_eligible(&filter)
            .map_err(ProcessorError::Query)
    }

    pub fn run(&self, options: &DeletionOptions) -> Result<DeletionReport, ProcessorError> {
        self.run_at(options, Utc::now())
    }

    /// Delete every eligible item, one at a time in catalog order.
    ///
    /// Only a failure of the initial query is fatal. Per-item and per-asset
    /// failures are logged and the loop moves on.
    pub fn run_at(
        &self,
        options: &DeletionOptions,
        now: DateTime<Utc>,
    ) -> Result<DeletionReport, ProcessorError> {
        let filter = Self::filter_for(options, now)?;
        let ids = self
            .catalog
            .find_item_ids(&filter)
            .map_err(ProcessorError::Query)?;

        self.run_log.log_eligible(ids.len(), filter.created_before);

        let mut report = DeletionReport {
            attempted: ids.len() as u64,
            ..Default::default()
        };

        for (index, id) in ids.iter().enumerate() {
            self.process_item(*id, options, now, &mut report);
            self.update_progress(index as u64 + 1, report.deleted);
        }

        self.run_log.log_run_finished(&report);
        Ok(report)
    }

    fn process_item(
        &self,
        id: i64,
        options: &DeletionOptions,
        now: DateTime<Utc>,
        report: &mut DeletionReport,
    ) {
        // Another run may have removed it since the query.
        let item = match self.catalog.get_item(id) {
            Ok(Some(item)) => item,
            Ok(None) => {
                self.run_log.log_item_not_found(id);
                return;
            }
            Err(e) => {
                self.run_log.log_item_failed(id, &format!("{:#}", e));
                return;
            }
        };

        if options.delete_images {
            self.delete_assets(&item, report);
        }

        match self.catalog.delete_item(item.id) {
            Ok(true) => {
                report.deleted += 1;
                metrics::record_item_deleted();
                self.run_log.log_item_deleted(&item);
                if options.track_gone {
                    self.record_gone(&item, now);
                }
            }
            Ok(false) => self.run_log.log_item_failed(item.id, "delete had no effect"),
            Err(e) => self.run_log.log_item_failed(item.id, &format!("{:#}", e)),
        }
    }

    fn delete_assets(&self, item: &DeletableItem, report: &mut DeletionReport) {
        for asset_id in self.assets.resolve_assets(item) {
            match self.assets.is_referenced_elsewhere(asset_id, item.id) {
                Ok(true) => {
                    report.assets_skipped += 1;
                    metrics::record_asset_outcome("skipped");
                    self.run_log.log_asset_in_use(asset_id, item);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    report.assets_failed += 1;
                    metrics::record_asset_outcome("failed");
                    self.run_log.log_asset_failed(
                        asset_id,
                        item,
                        &format!("reference check failed: {:#}", e),
                    );
                    continue;
                }
            }

            match self.assets.delete_asset(asset_id) {
                Ok(true) => {
                    report.assets_deleted += 1;
                    metrics::record_asset_outcome("deleted");
                    self.run_log.log_asset_deleted(asset_id, item);
                }
                Ok(false) => {
                    report.assets_failed += 1;
                    metrics::record_asset_outcome("failed");
                    self.run_log.log_asset_failed(asset_id, item, "not found");
                }
                Err(e) => {
                    report.assets_failed += 1;
                    metrics::record_asset_outcome("failed");
                    self.run_log
                        .log_asset_failed(asset_id, item, &format!("{:#}", e));
                }
            }
        }
    }

    fn record_gone(&self, item: &DeletableItem, now: DateTime<Utc>) {
        let record = DeletedRecord {
            slug: item.slug.clone(),
            url: item.permalink.clone(),
            deleted_at: now.timestamp(),
        };
        if let Err(e) = self.status_store.record_deleted_item(&record) {
            warn!("Failed to record deleted product {}: {:#}", item.slug, e);
        }
    }

    fn update_progress(&self, processed: u64, deleted: u64) {
        let result = self
            .status_store
            .set_slot(StatusKey::ProductsProcessed, &processed.to_string())
            .and_then(|_| {
                self.status_store
                    .set_slot(StatusKey::ProductsDeleted, &deleted.to_string())
            });
        if let Err(e) = result {
            debug!("Failed to update cleanup progress: {:#}", e);
        }
    }
}
