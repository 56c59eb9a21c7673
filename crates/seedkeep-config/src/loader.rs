//! JSON file loader with environment overrides.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::model::CoreConfig;
use crate::validate::validate;

/// Environment variable overriding [`CoreConfig::state_dir`].
pub const ENV_STATE_DIR: &str = "SEEDKEEP_STATE_DIR";
/// Environment variable overriding [`CoreConfig::download_location`].
pub const ENV_DOWNLOAD_LOCATION: &str = "SEEDKEEP_DOWNLOAD_LOCATION";

/// Load, override from the process environment, and validate a configuration file.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or when the
/// resulting configuration fails validation.
pub fn load(path: &Path) -> ConfigResult<CoreConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    finish(parse(path, &raw)?)
}

/// Like [`load`], but a missing file yields the defaults.
///
/// # Errors
///
/// Returns an error when an existing file cannot be read or parsed, or when
/// the resulting configuration fails validation.
pub fn load_or_default(path: &Path) -> ConfigResult<CoreConfig> {
    match fs::read_to_string(path) {
        Ok(raw) => finish(parse(path, &raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "configuration file missing; using defaults");
            finish(CoreConfig::default())
        }
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Apply environment overrides using the supplied lookup.
pub fn apply_env_overrides<F>(config: &mut CoreConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup(ENV_STATE_DIR).filter(|value| !value.trim().is_empty()) {
        config.state_dir = PathBuf::from(dir.trim());
    }
    if let Some(dir) = lookup(ENV_DOWNLOAD_LOCATION).filter(|value| !value.trim().is_empty()) {
        config.download_location = PathBuf::from(dir.trim());
    }
}

fn parse(path: &Path, raw: &str) -> ConfigResult<CoreConfig> {
    serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn finish(mut config: CoreConfig) -> ConfigResult<CoreConfig> {
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reads_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("core.json");
        fs::write(&path, r#"{"queue_new_to_top": true}"#).expect("write");
        let config = load(&path).expect("load");
        assert!(config.queue_new_to_top);
    }

    #[test]
    fn load_reports_parse_and_read_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("core.json");
        assert!(matches!(load(&path), Err(ConfigError::Read { .. })));
        fs::write(&path, "{not json").expect("write");
        assert!(matches!(load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_or_default(&dir.path().join("absent.json")).expect("defaults");
        assert!(!config.queue_new_to_top);
    }

    #[test]
    fn env_overrides_replace_paths() {
        let mut config = CoreConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            ENV_STATE_DIR => Some("/var/lib/seedkeep".into()),
            ENV_DOWNLOAD_LOCATION => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/seedkeep"));
        assert_eq!(config.download_location, PathBuf::from("downloads"));
    }
}
