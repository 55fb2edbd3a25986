//! Environment variable overrides.
//!
//! Only `CHANHOST_*` variables are consulted. They are applied as the last
//! layer, on the merged TOML tree, before deserialization.

use std::collections::HashMap;

use tracing::debug;

/// Variable naming the chanhost home directory.
pub const CHANHOST_HOME: &str = "CHANHOST_HOME";
/// Overrides `logging.level`.
pub const CHANHOST_LOG_LEVEL: &str = "CHANHOST_LOG_LEVEL";
/// Overrides `logging.format`.
pub const CHANHOST_LOG_FORMAT: &str = "CHANHOST_LOG_FORMAT";
/// Overrides `discovery.extension_dirs` (platform path-list syntax).
pub const CHANHOST_EXTENSION_DIRS: &str = "CHANHOST_EXTENSION_DIRS";
/// Overrides `preferences.path`.
pub const CHANHOST_PREFERENCES: &str = "CHANHOST_PREFERENCES";

/// Snapshot the `CHANHOST_*` environment variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("CHANHOST_"))
        .collect()
}

/// Apply environment overrides to a merged tree.
///
/// Returns the number of fields that were overridden.
pub fn apply_env_overrides(merged: &mut toml::Value, env: &HashMap<String, String>) -> usize {
    let mut applied = 0usize;

    let mut set = |section: &str, key: &str, value: toml::Value| {
        if let Some(table) = merged.as_table_mut() {
            let entry = table
                .entry(section.to_owned())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            if let Some(section_table) = entry.as_table_mut() {
                section_table.insert(key.to_owned(), value);
                applied = applied.saturating_add(1);
                debug!(field = %format!("{section}.{key}"), "applied environment override");
            }
        }
    };

    if let Some(level) = env.get(CHANHOST_LOG_LEVEL) {
        set("logging", "level", toml::Value::String(level.clone()));
    }
    if let Some(format) = env.get(CHANHOST_LOG_FORMAT) {
        set("logging", "format", toml::Value::String(format.clone()));
    }
    if let Some(dirs) = env.get(CHANHOST_EXTENSION_DIRS) {
        let list = std::env::split_paths(dirs)
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| toml::Value::String(p.display().to_string()))
            .collect();
        set("discovery", "extension_dirs", toml::Value::Array(list));
    }
    if let Some(path) = env.get(CHANHOST_PREFERENCES) {
        set("preferences", "path", toml::Value::String(path.clone()));
    }

    applied
}
