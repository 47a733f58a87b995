//! Operator-visible run log.
//!
//! Wraps the raw [`RunLogSink`] with one method per event so that every line
//! is also emitted through `tracing`. Sink failures are logged and swallowed:
//! losing a log line must never abort a deletion run.

use std::sync::Arc;

use tracing::{info, warn};

use super::processor::DeletionReport;
use crate::catalog_store::DeletableItem;
use crate::status_store::{RunLogEntry, RunLogSink};

pub struct RunLog {
    sink: Arc<dyn RunLogSink>,
}

impl RunLog {
    pub fn new(sink: Arc<dyn RunLogSink>) -> Self {
        Self { sink }
    }

    fn write(&self, line: String) {
        info!("{}", line);
        if let Err(e) = self.sink.write_line(&line) {
            warn!("Failed to persist run log line: {:#}", e);
        }
    }

    fn write_warning(&self, line: String) {
        warn!("{}", line);
        if let Err(e) = self.sink.write_line(&line) {
            warn!("Failed to persist run log line: {:#}", e);
        }
    }

    pub fn log_run_started(&self, trigger: &str) {
        self.write(format!("Cleanup run started ({})", trigger));
    }

    pub fn log_eligible(&self, count: usize, cutoff: i64) {
        self.write(format!(
            "Found {} out-of-stock products created before {}",
            count,
            format_timestamp(cutoff)
        ));
    }

    pub fn log_item_not_found(&self, item_id: i64) {
        self.write(format!("Product #{} skipped, not found", item_id));
    }

    pub fn log_asset_deleted(&self, asset_id: i64, item: &DeletableItem) {
        self.write(format!(
            "Deleted image #{} of product #{} ({})",
            asset_id, item.id, item.name
        ));
    }

    pub fn log_asset_in_use(&self, asset_id: i64, item: &DeletableItem) {
        self.write(format!(
            "Kept image #{} of product #{}, still in use elsewhere",
            asset_id, item.id
        ));
    }

    pub fn log_asset_failed(&self, asset_id: i64, item: &DeletableItem, reason: &str) {
        self.write_warning(format!(
            "Failed to delete image #{} of product #{}: {}",
            asset_id, item.id, reason
        ));
    }

    pub fn log_item_deleted(&self, item: &DeletableItem) {
        self.write(format!(
            "Deleted product #{} \"{}\" ({})",
            item.id, item.name, item.permalink
        ));
    }

    pub fn log_item_failed(&self, item_id: i64, reason: &str) {
        self.write_warning(format!("Failed to delete product #{}: {}", item_id, reason));
    }

    pub fn log_run_finished(&self, report: &DeletionReport) {
        self.write(format!(
            "Cleanup run finished: {} of {} products deleted, images deleted {} / kept {} / failed {}",
            report.deleted,
            report.attempted,
            report.assets_deleted,
            report.assets_skipped,
            report.assets_failed
        ));
    }

    pub fn log_too_many(&self, eligible: u64, limit: u64) {
        self.write_warning(format!(
            "Manual cleanup refused: {} eligible products exceed the limit of {}",
            eligible, limit
        ));
    }

    pub fn log_fatal(&self, reason: &str) {
        self.write_warning(format!("Cleanup run aborted: {}", reason));
    }

    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<RunLogEntry>> {
        self.sink.read_recent(limit)
    }

    pub fn has_content(&self) -> anyhow::Result<bool> {
        self.sink.has_content()
    }

    pub fn prune_older_than(&self, before_timestamp: i64) -> anyhow::Result<usize> {
        self.sink.prune_older_than(before_timestamp)
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
