//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_registry(config)?;
    validate_discovery(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_registry(config: &Config) -> ConfigResult<()> {
    let r = &config.registry;

    if r.min_api_version > r.max_api_version {
        return Err(ConfigError::ValidationError {
            field: "registry.min_api_version".to_owned(),
            message: format!(
                "min_api_version {} is greater than max_api_version {}",
                r.min_api_version, r.max_api_version
            ),
        });
    }

    if r.event_queue_capacity == 0 {
        return Err(ConfigError::ValidationError {
            field: "registry.event_queue_capacity".to_owned(),
            message: "event_queue_capacity must be at least 1".to_owned(),
        });
    }

    if r.notification_capacity == 0 {
        return Err(ConfigError::ValidationError {
            field: "registry.notification_capacity".to_owned(),
            message: "notification_capacity must be at least 1".to_owned(),
        });
    }

    if r.replace_timeout_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "registry.replace_timeout_ms".to_owned(),
            message: "replace_timeout_ms must be at least 1".to_owned(),
        });
    }

    if r.reserved_names.iter().any(String::is_empty) {
        return Err(ConfigError::ValidationError {
            field: "registry.reserved_names".to_owned(),
            message: "reserved names must not be empty".to_owned(),
        });
    }

    if r.shared_library_names.iter().any(String::is_empty) {
        return Err(ConfigError::ValidationError {
            field: "registry.shared_library_names".to_owned(),
            message: "shared library names must not be empty".to_owned(),
        });
    }

    Ok(())
}

fn validate_discovery(config: &Config) -> ConfigResult<()> {
    if config.discovery.debounce_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "discovery.debounce_ms".to_owned(),
            message: "debounce_ms must be at least 1".to_owned(),
        });
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.level".to_owned(),
            message: format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        });
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.format".to_owned(),
            message: format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        });
    }

    Ok(())
}
