//! Configuration types for the chanhost registry.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header in a user file produces a
//! working configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry limits and reserved names.
    pub registry: RegistrySection,
    /// Where extension packages are discovered.
    pub discovery: DiscoverySection,
    /// Persisted trust grants and ordering.
    pub preferences: PreferencesSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// RegistrySection
// ---------------------------------------------------------------------------

/// Registry behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Lowest extension API version the host can load.
    pub min_api_version: i64,
    /// Highest extension API version the host can load.
    pub max_api_version: i64,
    /// Capacity of the bounded lifecycle event queue.
    pub event_queue_capacity: usize,
    /// Capacity of the change-notification broadcast channel.
    pub notification_capacity: usize,
    /// How long a replacing removal waits for its matching add, in
    /// milliseconds. After that the package is looked up again.
    pub replace_timeout_ms: u64,
    /// Names no extension may claim.
    pub reserved_names: Vec<String>,
    /// Shared library names; reserved for content extensions only.
    pub shared_library_names: Vec<String>,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            min_api_version: 1,
            max_api_version: 1,
            event_queue_capacity: 64,
            notification_capacity: 1024,
            replace_timeout_ms: 30_000,
            reserved_names: ["client", "meta", "general", "cloudflare"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            shared_library_names: vec!["webm".to_owned()],
        }
    }
}

// ---------------------------------------------------------------------------
// DiscoverySection
// ---------------------------------------------------------------------------

/// Package discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Directories whose subdirectories are extension packages.
    pub extension_dirs: Vec<PathBuf>,
    /// Watch the extension directories for changes.
    pub watch: bool,
    /// Debounce window for filesystem events, in milliseconds.
    pub debounce_ms: u64,
    /// Certificate files the host itself is signed with.
    pub host_certificates: Vec<PathBuf>,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            extension_dirs: Vec::new(),
            watch: true,
            debounce_ms: 500,
            host_certificates: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// PreferencesSection
// ---------------------------------------------------------------------------

/// Persisted preferences location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesSection {
    /// Preferences file. Defaults to `preferences.toml` in the chanhost home.
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["chanhost_extensions=debug"]`).
    pub directives: Vec<String>,
    /// Write rolling log files here instead of stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            directory: None,
        }
    }
}
