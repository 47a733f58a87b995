use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_path: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Feature configs
    pub cleanup: Option<CleanupFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CleanupFileConfig {
    pub age_threshold_months: Option<u32>,
    pub delete_images: Option<bool>,
    pub gone_tracking: Option<bool>,
    pub scheduled_cleanup: Option<bool>,
    pub schedule_interval_hours: Option<u64>,
    pub manual_run_limit: Option<u64>,
    pub inline_run_threshold: Option<u64>,
    pub stuck_after_secs: Option<i64>,
    pub gone_retention_days: Option<u64>,
    pub log_retention_days: Option<u64>,
    pub action_token_secret: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
