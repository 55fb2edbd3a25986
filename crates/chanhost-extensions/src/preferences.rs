//! Persistent user decisions: trust grants and extension order.
//!
//! [`FilePreferences`] keeps both in one TOML file next to the host
//! configuration:
//!
//! ```toml
//! schema_version = 1
//! order = ["foochan", "barchan"]
//!
//! [[trust]]
//! package = "org.example.foochan"
//! fingerprint = "3a7bd3e2…"
//! granted_at = "2026-01-01T00:00:00Z"
//! ```
//!
//! Writes go through a temporary file and an atomic rename while holding an
//! exclusive advisory lock on a `.lk` sibling.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExtensionError, ExtensionResult};

/// Current preferences schema version.
const SCHEMA_VERSION: u32 = 1;

/// Standard preferences file name.
pub const PREFERENCES_FILE_NAME: &str = "preferences.toml";

/// Persisted trust grants.
pub trait TrustStore: Send + Sync {
    /// Whether trust was granted to `package` signed with `fingerprint`.
    fn is_trusted(&self, package: &str, fingerprint: &str) -> bool;

    /// Record a trust grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant could not be persisted.
    fn grant(&self, package: &str, fingerprint: &str) -> ExtensionResult<()>;
}

/// Persisted user ordering of extension names.
pub trait OrderStore: Send + Sync {
    /// Stored order. Names may refer to extensions that no longer exist.
    fn order(&self) -> Vec<String>;

    /// Replace the stored order.
    ///
    /// # Errors
    ///
    /// Returns an error if the order could not be persisted.
    fn set_order(&self, names: &[String]) -> ExtensionResult<()>;
}

/// Everything the registry persists.
pub trait Preferences: TrustStore + OrderStore {}

impl<T: TrustStore + OrderStore> Preferences for T {}

// ---------------------------------------------------------------------------
// MemoryPreferences
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    grants: HashSet<(String, String)>,
    order: Vec<String>,
}

/// In-memory preferences. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    state: RwLock<MemoryState>,
}

impl MemoryPreferences {
    /// Empty preferences.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preferences with a trust grant already recorded.
    #[must_use]
    pub fn with_grant(self, package: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .grants
            .insert((package.into(), fingerprint.into()));
        self
    }

    /// Preferences with a stored order.
    #[must_use]
    pub fn with_order<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.write().unwrap_or_else(PoisonError::into_inner).order =
            names.into_iter().map(Into::into).collect();
        self
    }
}

impl TrustStore for MemoryPreferences {
    fn is_trusted(&self, package: &str, fingerprint: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .grants
            .contains(&(package.to_owned(), fingerprint.to_owned()))
    }

    fn grant(&self, package: &str, fingerprint: &str) -> ExtensionResult<()> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .grants
            .insert((package.to_owned(), fingerprint.to_owned()));
        Ok(())
    }
}

impl OrderStore for MemoryPreferences {
    fn order(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    fn set_order(&self, names: &[String]) -> ExtensionResult<()> {
        self.state.write().unwrap_or_else(PoisonError::into_inner).order = names.to_vec();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FilePreferences
// ---------------------------------------------------------------------------

/// One persisted trust grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustGrant {
    /// Package identity.
    pub package: String,
    /// Full fingerprint string of the trusted signer.
    pub fingerprint: String,
    /// When the grant was made.
    pub granted_at: DateTime<Utc>,
}

/// On-disk preferences document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesFile {
    schema_version: u32,
    #[serde(default)]
    order: Vec<String>,
    #[serde(default, rename = "trust")]
    grants: Vec<TrustGrant>,
}

impl Default for PreferencesFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            order: Vec::new(),
            grants: Vec::new(),
        }
    }
}

impl PreferencesFile {
    /// Load from disk, returning an empty document if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> ExtensionResult<Self> {
        let _lock_guard = acquire_lock_file(path, LockMode::Shared)?;
        Self::read(path)
    }

    /// Load, mutate, and save under a single exclusive lock.
    ///
    /// Returns the saved document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or written.
    pub fn update<F>(path: &Path, f: F) -> ExtensionResult<Self>
    where
        F: FnOnce(&mut Self),
    {
        let _lock_guard = acquire_lock_file(path, LockMode::Exclusive)?;
        let mut file = Self::read(path)?;
        f(&mut file);
        file.save_inner(path)?;
        Ok(file)
    }

    /// Stored trust grants.
    #[must_use]
    pub fn grants(&self) -> &[TrustGrant] {
        &self.grants
    }

    /// Stored order.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Whether a grant for exactly this package and fingerprint exists.
    #[must_use]
    pub fn is_trusted(&self, package: &str, fingerprint: &str) -> bool {
        self.grants
            .iter()
            .any(|g| g.package == package && g.fingerprint == fingerprint)
    }

    /// Add a grant unless an identical one exists.
    pub fn add_grant(&mut self, package: &str, fingerprint: &str) {
        if !self.is_trusted(package, fingerprint) {
            self.grants.push(TrustGrant {
                package: package.to_owned(),
                fingerprint: fingerprint.to_owned(),
                granted_at: Utc::now(),
            });
        }
    }

    /// Replace the stored order.
    pub fn set_order(&mut self, names: &[String]) {
        self.order = names.to_vec();
    }

    fn read(path: &Path) -> ExtensionResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(preferences_error(path, format!("failed to read: {e}"))),
        };

        let file: Self = toml::from_str(&content)
            .map_err(|e| preferences_error(path, format!("failed to parse: {e}")))?;

        if file.schema_version != SCHEMA_VERSION {
            warn!(
                path = %path.display(),
                found = file.schema_version,
                expected = SCHEMA_VERSION,
                "Preferences schema version mismatch, attempting best-effort load"
            );
        }

        Ok(file)
    }

    fn save_inner(&self, path: &Path) -> ExtensionResult<()> {
        let header = "# Auto-generated by chanhost. Do not edit manually.\n\n";
        let body = toml::to_string_pretty(self)
            .map_err(|e| preferences_error(path, format!("failed to serialize: {e}")))?;
        let content = format!("{header}{body}");

        let parent = path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| preferences_error(path, format!("failed to create temp file: {e}")))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| preferences_error(path, format!("failed to write temp file: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| preferences_error(path, format!("failed to sync temp file: {e}")))?;
        tmp.persist(path)
            .map_err(|e| preferences_error(path, format!("failed to replace file: {e}")))?;

        debug!(
            path = %path.display(),
            grants = self.grants.len(),
            order = self.order.len(),
            "Saved preferences"
        );
        Ok(())
    }
}

/// Preferences persisted to a TOML file.
///
/// The document is read once on open and cached; every write re-reads the
/// file under the exclusive lock so concurrent writers do not lose grants.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    cache: RwLock<PreferencesFile>,
}

impl FilePreferences {
    /// Open the preferences file at `path`. A missing file is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> ExtensionResult<Self> {
        let path = path.into();
        let file = PreferencesFile::load_or_default(&path)?;
        info!(
            path = %path.display(),
            grants = file.grants.len(),
            "Loaded extension preferences"
        );
        Ok(Self {
            path,
            cache: RwLock::new(file),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the cached document.
    #[must_use]
    pub fn document(&self) -> PreferencesFile {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut PreferencesFile)) -> ExtensionResult<()> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = PreferencesFile::update(&self.path, f)?;
        Ok(())
    }
}

impl TrustStore for FilePreferences {
    fn is_trusted(&self, package: &str, fingerprint: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_trusted(package, fingerprint)
    }

    fn grant(&self, package: &str, fingerprint: &str) -> ExtensionResult<()> {
        self.update(|file| file.add_grant(package, fingerprint))
    }
}

impl OrderStore for FilePreferences {
    fn order(&self) -> Vec<String> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    fn set_order(&self, names: &[String]) -> ExtensionResult<()> {
        self.update(|file| file.set_order(names))
    }
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

fn preferences_error(path: &Path, message: String) -> ExtensionError {
    ExtensionError::Preferences {
        path: path.to_path_buf(),
        message,
    }
}

enum LockMode {
    Shared,
    Exclusive,
}

/// Acquire an advisory lock on a `.lk` sibling of `path`.
///
/// Shared mode never creates the lock file; without one there is no
/// writer to coordinate with.
fn acquire_lock_file(path: &Path, mode: LockMode) -> ExtensionResult<Option<File>> {
    let lock_path = path.with_extension("lk");

    match mode {
        LockMode::Shared => match std::fs::OpenOptions::new().read(true).open(&lock_path) {
            Ok(lock_file) => {
                FileExt::lock_shared(&lock_file)
                    .map_err(|e| preferences_error(path, format!("failed to acquire shared lock: {e}")))?;
                Ok(Some(lock_file))
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(preferences_error(path, format!("failed to open lock file: {e}"))),
        },
        LockMode::Exclusive => {
            if let Some(parent) = lock_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    preferences_error(path, format!("failed to create parent directory: {e}"))
                })?;
            }
            let lock_file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .read(true)
                .open(&lock_path)
                .map_err(|e| preferences_error(path, format!("failed to open lock file: {e}")))?;
            FileExt::lock_exclusive(&lock_file).map_err(|e| {
                preferences_error(path, format!("failed to acquire exclusive lock: {e}"))
            })?;
            Ok(Some(lock_file))
        },
    }
}
