//! The host package environment.
//!
//! A [`PackageEnvironment`] enumerates installed packages together with
//! their feature markers, metadata, and raw signing certificates.
//! [`DirectoryEnvironment`] is the filesystem implementation: every
//! subdirectory of an extension root that holds a `package.toml` is one
//! package.
//!
//! # Manifest format
//!
//! ```toml
//! [package]
//! id = "org.example.foochan"
//! version_name = "1.2"
//! version_code = 12
//! features = ["chan.extension"]
//! certificates = ["signer.der"]
//! library = "libfoochan.so"
//! native_library_dir = "lib"
//!
//! [meta]
//! "chan.extension.name" = "foochan"
//! "chan.extension.version" = 1
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExtensionError, ExtensionResult};

/// Package manifest file name.
pub const PACKAGE_MANIFEST: &str = "package.toml";

/// A metadata value: string or integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Integer value.
    Int(i64),
    /// String value.
    Str(String),
}

impl MetaValue {
    /// The value if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    /// The value as an integer, parsing strings.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// One installed package as reported by the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInfo {
    /// Package identity.
    pub id: String,
    /// Human readable version.
    pub version_name: String,
    /// Monotonic version code.
    pub version_code: i64,
    /// Declared feature markers.
    pub features: BTreeSet<String>,
    /// Metadata key/value map.
    pub metadata: BTreeMap<String, MetaValue>,
    /// Raw signing certificate blobs.
    pub certificates: Vec<Vec<u8>>,
    /// Package directory.
    pub package_dir: Option<PathBuf>,
    /// Code artifact.
    pub code_path: Option<PathBuf>,
    /// Native library directory as declared (may not exist).
    pub native_library_dir: Option<PathBuf>,
}

impl PackageInfo {
    /// Whether the package declares `feature`.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// String metadata value.
    #[must_use]
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetaValue::as_str)
    }

    /// Integer metadata value.
    #[must_use]
    pub fn meta_int(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(MetaValue::as_int)
    }
}

/// Source of installed packages.
pub trait PackageEnvironment: Send + Sync {
    /// All installed packages, in a stable order.
    fn packages(&self) -> Vec<PackageInfo>;

    /// One package by identity, if installed.
    fn package(&self, id: &str) -> Option<PackageInfo> {
        self.packages().into_iter().find(|p| p.id == id)
    }
}

// ---------------------------------------------------------------------------
// DirectoryEnvironment
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PackageManifest {
    package: ManifestPackage,
    #[serde(default)]
    meta: BTreeMap<String, MetaValue>,
}

#[derive(Debug, Deserialize)]
struct ManifestPackage {
    id: String,
    #[serde(default)]
    version_name: String,
    #[serde(default)]
    version_code: i64,
    #[serde(default)]
    features: BTreeSet<String>,
    #[serde(default)]
    certificates: Vec<PathBuf>,
    library: Option<PathBuf>,
    native_library_dir: Option<PathBuf>,
}

/// Packages installed as directories under one or more roots.
#[derive(Debug, Clone)]
pub struct DirectoryEnvironment {
    roots: Vec<PathBuf>,
}

impl DirectoryEnvironment {
    /// Create an environment scanning `roots` in order.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// The scanned roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn scan_root(root: &Path) -> ExtensionResult<Vec<PackageInfo>> {
        let mut dirs = std::fs::read_dir(root)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.join(PACKAGE_MANIFEST).is_file())
            .collect::<Vec<_>>();
        dirs.sort();

        let mut packages = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match read_package(&dir) {
                Ok(package) => {
                    debug!(path = %dir.display(), package = %package.id, "Read package manifest");
                    packages.push(package);
                },
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Skipping unreadable package");
                },
            }
        }
        Ok(packages)
    }
}

impl PackageEnvironment for DirectoryEnvironment {
    fn packages(&self) -> Vec<PackageInfo> {
        let mut packages = Vec::new();
        for root in &self.roots {
            if !root.is_dir() {
                debug!(path = %root.display(), "Extension directory does not exist, skipping");
                continue;
            }
            match Self::scan_root(root) {
                Ok(found) => packages.extend(found),
                Err(e) => warn!(path = %root.display(), error = %e, "Failed to scan extension directory"),
            }
        }
        info!(count = packages.len(), "Enumerated installed packages");
        packages
    }
}

/// Read the package installed in `dir`.
///
/// Certificate, library, and native directory paths in the manifest are
/// resolved relative to `dir`.
///
/// # Errors
///
/// Returns [`ExtensionError::Manifest`] if the manifest or a certificate
/// file cannot be read or parsed.
pub fn read_package(dir: &Path) -> ExtensionResult<PackageInfo> {
    let manifest_path = dir.join(PACKAGE_MANIFEST);
    let manifest_err = |message: String| ExtensionError::Manifest {
        path: manifest_path.clone(),
        message,
    };

    let content = std::fs::read_to_string(&manifest_path).map_err(|e| manifest_err(e.to_string()))?;
    let manifest: PackageManifest =
        toml::from_str(&content).map_err(|e| manifest_err(e.to_string()))?;

    let mut certificates = Vec::with_capacity(manifest.package.certificates.len());
    for cert in &manifest.package.certificates {
        let path = dir.join(cert);
        let blob = std::fs::read(&path)
            .map_err(|e| manifest_err(format!("certificate {}: {e}", path.display())))?;
        certificates.push(blob);
    }

    Ok(PackageInfo {
        id: manifest.package.id,
        version_name: manifest.package.version_name,
        version_code: manifest.package.version_code,
        features: manifest.package.features,
        metadata: manifest.meta,
        certificates,
        package_dir: Some(dir.to_path_buf()),
        code_path: manifest.package.library.map(|p| dir.join(p)),
        native_library_dir: manifest.package.native_library_dir.map(|p| dir.join(p)),
    })
}
