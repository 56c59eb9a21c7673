//! Validation helpers for configuration documents.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{CoreConfig, TimerConfig, TorrentDefaults};

/// Validate a configuration document.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first offending field.
pub fn validate(config: &CoreConfig) -> ConfigResult<()> {
    ensure_path("core", "download_location", &config.download_location)?;
    ensure_path("core", "state_dir", &config.state_dir)?;
    if config.copy_torrent_file && config.torrentfiles_location.is_none() {
        return Err(ConfigError::InvalidField {
            section: "core",
            field: "torrentfiles_location",
            value: None,
            reason: "required when copy_torrent_file is enabled",
        });
    }
    validate_defaults(&config.torrent_defaults)?;
    validate_timers(&config.timers)
}

fn validate_defaults(defaults: &TorrentDefaults) -> ConfigResult<()> {
    if !defaults.stop_seed_ratio.is_finite() || defaults.stop_seed_ratio < 0.0 {
        return Err(ConfigError::InvalidField {
            section: "torrent_defaults",
            field: "stop_seed_ratio",
            value: Some(defaults.stop_seed_ratio.to_string()),
            reason: "must be a non-negative number",
        });
    }
    if defaults.move_completed {
        ensure_path(
            "torrent_defaults",
            "move_completed_path",
            &defaults.move_completed_path,
        )?;
    }
    Ok(())
}

fn validate_timers(timers: &TimerConfig) -> ConfigResult<()> {
    let fields = [
        ("alert_poll_interval_ms", timers.alert_poll_interval_ms),
        ("sweep_interval_secs", timers.sweep_interval_secs),
        ("save_state_interval_secs", timers.save_state_interval_secs),
        ("save_resume_interval_secs", timers.save_resume_interval_secs),
        (
            "status_cache_cleanup_interval_secs",
            timers.status_cache_cleanup_interval_secs,
        ),
        ("shutdown_timeout_secs", timers.shutdown_timeout_secs),
        ("shutdown_poll_interval_ms", timers.shutdown_poll_interval_ms),
    ];
    for (field, value) in fields {
        if value == 0 {
            return Err(ConfigError::InvalidField {
                section: "timers",
                field,
                value: Some(value.to_string()),
                reason: "must be positive",
            });
        }
    }
    Ok(())
}

fn ensure_path(section: &'static str, field: &'static str, path: &Path) -> ConfigResult<()> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidField {
            section,
            field,
            value: None,
            reason: "must not be empty",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn defaults_are_valid() {
        validate(&CoreConfig::default()).expect("defaults validate");
    }

    #[test]
    fn rejects_negative_ratio_and_zero_interval() {
        let mut config = CoreConfig::default();
        config.torrent_defaults.stop_seed_ratio = -1.0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                field: "stop_seed_ratio",
                ..
            })
        ));

        let mut config = CoreConfig::default();
        config.timers.sweep_interval_secs = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                field: "sweep_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn rejects_empty_paths() {
        let mut config = CoreConfig::default();
        config.state_dir = PathBuf::new();
        assert!(validate(&config).is_err());

        let mut config = CoreConfig::default();
        config.copy_torrent_file = true;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                field: "torrentfiles_location",
                ..
            })
        ));

        let mut config = CoreConfig::default();
        config.torrent_defaults.move_completed = true;
        assert!(validate(&config).is_err());
    }
}
