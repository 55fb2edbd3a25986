//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge the user file from the chanhost home
//! 3. Apply `CHANHOST_*` environment overrides
//! 4. Deserialize merged tree → `Config`
//! 5. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{CHANHOST_HOME, apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Name of the preferences file inside the chanhost home.
const PREFERENCES_FILE: &str = "preferences.toml";

/// A loaded configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The merged, validated configuration.
    pub config: Config,
    /// The chanhost home directory used for discovery.
    pub home: PathBuf,
    /// Files that contributed a layer, in merge order.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// Path of the preferences file, falling back to the chanhost home.
    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.config
            .preferences
            .path
            .clone()
            .unwrap_or_else(|| self.home.join(PREFERENCES_FILE))
    }
}

/// Load the configuration with layered precedence.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// final merged configuration fails validation.
pub fn load(home_override: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    load_with_env(home_override, &collect_env_vars())
}

/// Load the configuration using an explicit environment snapshot.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    let home = match (home_override, env_vars.get(CHANHOST_HOME)) {
        (Some(h), _) => h.to_path_buf(),
        (None, Some(h)) => PathBuf::from(h),
        (None, None) => home_directory()?.join(".chanhost"),
    };

    // 1. Embedded defaults.
    let mut merged = parse_defaults()?;
    let mut loaded_files = Vec::new();

    // 2. User config.
    let user_path = home.join("config.toml");
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge(&mut merged, &overlay);
        loaded_files.push(user_path.display().to_string());
        info!(path = %user_path.display(), "loaded user config");
    }

    // 3. Environment.
    let env_count = apply_env_overrides(&mut merged, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable overrides");
    }

    // 4-5.
    let config = deserialize(merged, "<merged config>")?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        home,
        loaded_files,
    })
}

/// Load a config from a specific file layered over the embedded defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;

    let mut merged = parse_defaults()?;
    deep_merge(&mut merged, &overlay);

    let config = deserialize(merged, &path.display().to_string())?;
    validate::validate(&config)?;
    Ok(config)
}

fn parse_defaults() -> ConfigResult<toml::Value> {
    toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
        path: "<embedded defaults>".to_owned(),
        source: e,
    })
}

fn deserialize(merged: toml::Value, origin: &str) -> ConfigResult<Config> {
    merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: origin.to_owned(),
            source: e,
        })
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{CHANHOST_EXTENSION_DIRS, CHANHOST_LOG_LEVEL};

    #[test]
    fn test_defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = load_with_env(Some(dir.path()), &HashMap::new()).unwrap();
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(resolved.config, Config::default());
        assert_eq!(
            resolved.preferences_path(),
            dir.path().join("preferences.toml")
        );
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
            [registry]
            max_api_version = 3

            [preferences]
            path = "/var/lib/chanhost/prefs.toml"
            "#,
        )
        .unwrap();

        let resolved = load_with_env(Some(dir.path()), &HashMap::new()).unwrap();
        assert_eq!(resolved.loaded_files.len(), 1);
        assert_eq!(resolved.config.registry.max_api_version, 3);
        assert_eq!(resolved.config.registry.min_api_version, 1);
        assert_eq!(
            resolved.preferences_path(),
            PathBuf::from("/var/lib/chanhost/prefs.toml")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_env_overrides_user_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();
        let env = HashMap::from([
            (CHANHOST_LOG_LEVEL.to_owned(), "trace".to_owned()),
            (CHANHOST_EXTENSION_DIRS.to_owned(), "/a:/b".to_owned()),
        ]);

        let resolved = load_with_env(Some(dir.path()), &env).unwrap();
        assert_eq!(resolved.config.logging.level, "trace");
        assert_eq!(
            resolved.config.discovery.extension_dirs,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn test_home_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::from([(
            CHANHOST_HOME.to_owned(),
            dir.path().display().to_string(),
        )]);
        let resolved = load_with_env(None, &env).unwrap();
        assert_eq!(resolved.home, dir.path());
    }

    #[test]
    fn test_invalid_user_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[registry]\nmin_api_version = 5\n",
        )
        .unwrap();
        let err = load_with_env(Some(dir.path()), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[registry\n").unwrap();
        assert!(matches!(
            load_file(&path).unwrap_err(),
            ConfigError::ParseError { .. }
        ));
    }
}
