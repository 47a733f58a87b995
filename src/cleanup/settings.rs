//! Operator-adjustable cleanup settings and fixed run limits.

use crate::status_store::{StatusKey, StatusStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Upper bound for the age threshold (100 years).
const MAX_AGE_THRESHOLD_MONTHS: u32 = 1200;

/// Upper bound for the schedule interval (one year).
pub const MAX_SCHEDULE_INTERVAL_HOURS: u64 = 8760;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("age_threshold_months must be between 1 and {max}, got {0}", max = MAX_AGE_THRESHOLD_MONTHS)]
    InvalidAgeThreshold(u32),
    #[error("schedule_interval_hours must be between 1 and {max}, got {0}", max = MAX_SCHEDULE_INTERVAL_HOURS)]
    InvalidScheduleInterval(u64),
    #[error("Failed to persist settings: {0}")]
    Store(#[from] anyhow::Error),
}

/// Settings changed at runtime through `configure`.
///
/// The config file provides the initial values; once an operator saves
/// settings they are persisted in the status store and win over the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub age_threshold_months: u32,
    pub delete_images: bool,
    pub gone_tracking: bool,
    pub scheduled_cleanup: bool,
    pub schedule_interval_hours: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            age_threshold_months: 12,
            delete_images: false,
            gone_tracking: false,
            scheduled_cleanup: true,
            schedule_interval_hours: 24,
        }
    }
}

/// Partial update accepted by `configure`. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub age_threshold_months: Option<u32>,
    pub delete_images: Option<bool>,
    pub gone_tracking: Option<bool>,
    pub scheduled_cleanup: Option<bool>,
    pub schedule_interval_hours: Option<u64>,
}

impl CleanupSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.age_threshold_months == 0 || self.age_threshold_months > MAX_AGE_THRESHOLD_MONTHS
        {
            return Err(SettingsError::InvalidAgeThreshold(
                self.age_threshold_months,
            ));
        }
        if self.schedule_interval_hours == 0
            || self.schedule_interval_hours > MAX_SCHEDULE_INTERVAL_HOURS
        {
            return Err(SettingsError::InvalidScheduleInterval(
                self.schedule_interval_hours,
            ));
        }
        Ok(())
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_hours.saturating_mul(60 * 60))
    }

    pub fn apply(&self, update: &SettingsUpdate) -> CleanupSettings {
        CleanupSettings {
            age_threshold_months: update
                .age_threshold_months
                .unwrap_or(self.age_threshold_months),
            delete_images: update.delete_images.unwrap_or(self.delete_images),
            gone_tracking: update.gone_tracking.unwrap_or(self.gone_tracking),
            scheduled_cleanup: update.scheduled_cleanup.unwrap_or(self.scheduled_cleanup),
            schedule_interval_hours: update
                .schedule_interval_hours
                .unwrap_or(self.schedule_interval_hours),
        }
    }

    /// Load persisted settings, falling back to `defaults` when none are
    /// stored or the stored value is unreadable.
    pub fn load_or(store: &dyn StatusStore, defaults: &CleanupSettings) -> CleanupSettings {
        let raw = match store.get_slot(StatusKey::Settings) {
            Ok(Some(raw)) => raw,
            Ok(None) => return defaults.clone(),
            Err(e) => {
                warn!("Failed to read persisted cleanup settings: {:#}", e);
                return defaults.clone();
            }
        };
        match serde_json::from_str::<CleanupSettings>(&raw) {
            Ok(settings) if settings.validate().is_ok() => settings,
            Ok(settings) => {
                warn!("Ignoring invalid persisted cleanup settings {:?}", settings);
                defaults.clone()
            }
            Err(e) => {
                warn!("Ignoring unparsable persisted cleanup settings: {}", e);
                defaults.clone()
            }
        }
    }

    pub fn persist(&self, store: &dyn StatusStore) -> Result<(), SettingsError> {
        let json = serde_json::to_string(self).map_err(anyhow::Error::from)?;
        store.set_slot(StatusKey::Settings, &json)?;
        Ok(())
    }
}

/// Fixed limits, only configurable through the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupLimits {
    /// Manual runs finding more eligible items than this are refused.
    pub manual_run_limit: u64,
    /// Manual runs finding fewer eligible items than this execute inline.
    pub inline_run_threshold: u64,
    pub stuck_after_secs: i64,
    pub gone_retention_days: u64,
    pub log_retention_days: u64,
}

impl Default for CleanupLimits {
    fn default() -> Self {
        Self {
            manual_run_limit: 200,
            inline_run_threshold: 100,
            stuck_after_secs: 600,
            gone_retention_days: 365,
            log_retention_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_store::SqliteStatusStore;
    use tempfile::TempDir;

    #[test]
    fn test_validate() {
        assert!(CleanupSettings::default().validate().is_ok());

        let zero_age = CleanupSettings {
            age_threshold_months: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_age.validate(),
            Err(SettingsError::InvalidAgeThreshold(0))
        ));

        let zero_interval = CleanupSettings {
            schedule_interval_hours: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_interval.validate(),
            Err(SettingsError::InvalidScheduleInterval(0))
        ));

        let year = CleanupSettings {
            schedule_interval_hours: MAX_SCHEDULE_INTERVAL_HOURS,
            ..Default::default()
        };
        assert!(year.validate().is_ok());

        let oversized = CleanupSettings {
            schedule_interval_hours: MAX_SCHEDULE_INTERVAL_HOURS + 1,
            ..Default::default()
        };
        assert!(matches!(
            oversized.validate(),
            Err(SettingsError::InvalidScheduleInterval(8761))
        ));
    }

    #[test]
    fn test_schedule_interval_does_not_overflow() {
        let daily = CleanupSettings::default();
        assert_eq!(daily.schedule_interval(), Duration::from_secs(24 * 3600));

        let huge = CleanupSettings {
            schedule_interval_hours: u64::MAX / 2,
            ..Default::default()
        };
        assert_eq!(huge.schedule_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_apply_partial_update() {
        let base = CleanupSettings::default();
        let updated = base.apply(&SettingsUpdate {
            age_threshold_months: Some(18),
            gone_tracking: Some(true),
            ..Default::default()
        });
        assert_eq!(updated.age_threshold_months, 18);
        assert!(updated.gone_tracking);
        assert_eq!(updated.delete_images, base.delete_images);
        assert_eq!(updated.schedule_interval_hours, base.schedule_interval_hours);
    }

    #[test]
    fn test_persist_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStatusStore::new(temp_dir.path().join("status.db")).unwrap();
        let defaults = CleanupSettings::default();

        assert_eq!(CleanupSettings::load_or(&store, &defaults), defaults);

        let custom = CleanupSettings {
            age_threshold_months: 3,
            delete_images: true,
            ..Default::default()
        };
        custom.persist(&store).unwrap();
        assert_eq!(CleanupSettings::load_or(&store, &defaults), custom);
    }

    #[test]
    fn test_load_ignores_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStatusStore::new(temp_dir.path().join("status.db")).unwrap();
        store.set_slot(StatusKey::Settings, "not json").unwrap();

        let defaults = CleanupSettings::default();
        assert_eq!(CleanupSettings::load_or(&store, &defaults), defaults);
    }

    #[test]
    fn test_load_ignores_out_of_range_interval() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStatusStore::new(temp_dir.path().join("status.db")).unwrap();
        store
            .set_slot(
                StatusKey::Settings,
                r#"{"schedule_interval_hours": 10000000000000}"#,
            )
            .unwrap();

        let defaults = CleanupSettings::default();
        assert_eq!(CleanupSettings::load_or(&store, &defaults), defaults);
    }
}
