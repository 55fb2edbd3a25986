#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Configuration for the chanhost extension registry.
//!
//! # Usage
//!
//! ```rust,no_run
//! use chanhost_config::Config;
//!
//! // defaults → user file → environment
//! let resolved = Config::load(None).unwrap();
//! println!("API range: {}..={}", resolved.config.registry.min_api_version,
//!     resolved.config.registry.max_api_version);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`CHANHOST_*`)
//! 2. **User** (`$CHANHOST_HOME/config.toml`, else `~/.chanhost/config.toml`)
//! 3. **Embedded defaults** (`defaults.toml` compiled into binary)

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Deep merging of TOML layers.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ResolvedConfig;
pub use types::*;

use std::path::Path;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// `home_override` replaces the chanhost home directory (normally
    /// `~/.chanhost` or `$CHANHOST_HOME`).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a file is malformed or the merged
    /// configuration fails validation.
    pub fn load(home_override: Option<&Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(home_override)
    }

    /// Load a single configuration file layered over the embedded defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn load_file(path: &Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
