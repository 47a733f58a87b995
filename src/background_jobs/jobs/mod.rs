//! Specific background job implementations.

pub mod housekeeping;
pub mod pending_cleanup_run;
pub mod stale_stock_cleanup;

pub use housekeeping::{HousekeepingJob, HOUSEKEEPING_JOB_ID};
pub use pending_cleanup_run::{PendingCleanupRunJob, PENDING_CLEANUP_RUN_JOB_ID};
pub use stale_stock_cleanup::{StaleStockCleanupJob, STALE_STOCK_CLEANUP_JOB_ID};
