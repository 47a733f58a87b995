mod file_config;

pub use file_config::{CleanupFileConfig, FileConfig};

use crate::cleanup::{CleanupLimits, CleanupSettings};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub media_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupConfig {
    /// Initial settings, used until an operator saves their own.
    pub defaults: CleanupSettings,
    pub limits: CleanupLimits,
    /// Secret for action tokens. A random one is generated when absent.
    pub action_token_secret: Option<String>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_path = file
            .media_path
            .map(PathBuf::from)
            .or_else(|| cli.media_path.clone())
            .unwrap_or_else(|| db_dir.join("media"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let cleanup = resolve_cleanup(file.cleanup.unwrap_or_default())?;

        Ok(Self {
            db_dir,
            media_path,
            port,
            metrics_port,
            logging_level,
            cleanup,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn status_db_path(&self) -> PathBuf {
        self.db_dir.join("status.db")
    }
}

fn resolve_cleanup(file: CleanupFileConfig) -> Result<CleanupConfig> {
    let base = CleanupSettings::default();
    let defaults = CleanupSettings {
        age_threshold_months: file
            .age_threshold_months
            .unwrap_or(base.age_threshold_months),
        delete_images: file.delete_images.unwrap_or(base.delete_images),
        gone_tracking: file.gone_tracking.unwrap_or(base.gone_tracking),
        scheduled_cleanup: file.scheduled_cleanup.unwrap_or(base.scheduled_cleanup),
        schedule_interval_hours: file
            .schedule_interval_hours
            .unwrap_or(base.schedule_interval_hours),
    };
    defaults.validate()?;

    let base_limits = CleanupLimits::default();
    let limits = CleanupLimits {
        manual_run_limit: file.manual_run_limit.unwrap_or(base_limits.manual_run_limit),
        inline_run_threshold: file
            .inline_run_threshold
            .unwrap_or(base_limits.inline_run_threshold),
        stuck_after_secs: file.stuck_after_secs.unwrap_or(base_limits.stuck_after_secs),
        gone_retention_days: file
            .gone_retention_days
            .unwrap_or(base_limits.gone_retention_days),
        log_retention_days: file
            .log_retention_days
            .unwrap_or(base_limits.log_retention_days),
    };
    if limits.inline_run_threshold > limits.manual_run_limit {
        bail!(
            "inline_run_threshold ({}) must not exceed manual_run_limit ({})",
            limits.inline_run_threshold,
            limits.manual_run_limit
        );
    }

    let action_token_secret = file.action_token_secret.filter(|s| !s.is_empty());

    Ok(CleanupConfig {
        defaults,
        limits,
        action_token_secret,
    })
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("path"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(matches!(
            parse_logging_level("HEADERS"),
            Some(RequestsLoggingLevel::Headers)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            media_path: Some(PathBuf::from("/media")),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Headers,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.media_path, PathBuf::from("/media"));
        assert_eq!(config.port, 3001);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.cleanup.defaults, CleanupSettings::default());
        assert_eq!(config.cleanup.limits, CleanupLimits::default());
        assert!(config.cleanup.action_token_secret.is_none());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            media_path: Some(PathBuf::from("/cli/media")),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
        };

        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            media_path: Some("/toml/media".to_string()),
            port: Some(4000),
            logging_level: Some("none".to_string()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.media_path, PathBuf::from("/toml/media"));
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::None);
        assert_eq!(config.metrics_port, 9091);
    }

    #[test]
    fn test_resolve_cleanup_section() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let file_config = FileConfig {
            cleanup: Some(CleanupFileConfig {
                age_threshold_months: Some(6),
                delete_images: Some(true),
                scheduled_cleanup: Some(false),
                manual_run_limit: Some(50),
                inline_run_threshold: Some(10),
                action_token_secret: Some("secret".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.cleanup.defaults.age_threshold_months, 6);
        assert!(config.cleanup.defaults.delete_images);
        assert!(!config.cleanup.defaults.scheduled_cleanup);
        assert_eq!(config.cleanup.defaults.schedule_interval_hours, 24);
        assert_eq!(config.cleanup.limits.manual_run_limit, 50);
        assert_eq!(config.cleanup.limits.inline_run_threshold, 10);
        assert_eq!(config.cleanup.limits.stuck_after_secs, 600);
        assert_eq!(
            config.cleanup.action_token_secret,
            Some("secret".to_string())
        );
    }

    #[test]
    fn test_resolve_rejects_invalid_cleanup_values() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };

        let zero_age = FileConfig {
            cleanup: Some(CleanupFileConfig {
                age_threshold_months: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(zero_age)).is_err());

        let inverted = FileConfig {
            cleanup: Some(CleanupFileConfig {
                manual_run_limit: Some(10),
                inline_run_threshold: Some(20),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(inverted)).is_err());
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig::default();
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("db_dir"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/to/db")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_media_path_defaults_under_db_dir() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.media_path, temp_dir.path().join("media"));
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.catalog_db_path(), temp_dir.path().join("catalog.db"));
        assert_eq!(config.status_db_path(), temp_dir.path().join("status.db"));
    }
}
