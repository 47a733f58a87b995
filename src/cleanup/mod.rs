//! Stale stock cleanup: settings, the deletion processor, run coordination
//! and the status surface polled by the admin page.

mod coordinator;
mod processor;
mod run_log;
mod settings;
mod status;

pub use coordinator::{CleanupCoordinator, CleanupError, EnsureOutcome, FallbackSource, RunOutcome};
pub use processor::{cutoff, DeletionOptions, DeletionProcessor, DeletionReport, ProcessorError};
pub use run_log::RunLog;
pub use settings::{CleanupLimits, CleanupSettings, SettingsError, SettingsUpdate};
pub use status::{StatusService, StatusSnapshot};
