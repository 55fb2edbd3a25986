//! Extension registry error types.

use std::path::PathBuf;

use crate::loader::LoadError;

/// Errors from registry operations.
///
/// Apart from [`ExtensionError::Preferences`] and
/// [`ExtensionError::RegistryClosed`], every variant is local to one
/// extension: it is logged and the extension is dropped or left unloaded,
/// while the scan or event carries on with the rest.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// Required metadata is missing or malformed.
    #[error("invalid metadata in package {package}: {message}")]
    Metadata {
        /// Package the metadata belongs to.
        package: String,
        /// What was wrong.
        message: String,
    },

    /// Another package already owns this extension name.
    #[error("extension name {name} of package {rejected} is already used by {existing}")]
    NameConflict {
        /// The contested name.
        name: String,
        /// Package currently holding the name.
        existing: String,
        /// Package that was rejected.
        rejected: String,
    },

    /// The declared API version is outside the supported range.
    #[error("extension {name} targets API version {version}, supported range is {min}..={max}")]
    UnsupportedVersion {
        /// Extension name.
        name: String,
        /// Declared version.
        version: i64,
        /// Lowest supported version.
        min: i64,
        /// Highest supported version.
        max: i64,
    },

    /// Module code could not be instantiated.
    #[error("failed to load extension {name}: {source}")]
    Load {
        /// Extension name.
        name: String,
        /// Underlying loader error.
        #[source]
        source: LoadError,
    },

    /// A package manifest could not be read or parsed.
    #[error("package manifest error in {path}: {message}")]
    Manifest {
        /// Path to the manifest.
        path: PathBuf,
        /// Parse or read error.
        message: String,
    },

    /// The preferences file could not be read or written.
    #[error("preferences error in {path}: {message}")]
    Preferences {
        /// Path to the preferences file.
        path: PathBuf,
        /// Failure reason.
        message: String,
    },

    /// The filesystem watcher could not be set up.
    #[error("watcher error: {0}")]
    Watcher(String),

    /// The lifecycle actor has stopped; no more events are accepted.
    #[error("registry lifecycle task is not running")]
    RegistryClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for registry operations.
pub type ExtensionResult<T> = Result<T, ExtensionError>;
