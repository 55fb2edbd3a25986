//! Test fixtures: packages and an in-memory package environment.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use chanhost_crypto::Fingerprint;
use chanhost_extensions::discovery::{FEATURE_CHAN_EXTENSION, FEATURE_LIB_EXTENSION, meta};
use chanhost_extensions::{MetaValue, PackageEnvironment, PackageInfo};

/// Certificate used by [`PackageBuilder`] unless another signer is set.
pub const TEST_CERTIFICATE: &[u8] = b"chanhost-test-signer";

/// Install the test log subscriber once. Honours `RUST_LOG`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fingerprint of a single signing certificate.
#[must_use]
pub fn fingerprint_of(certificate: &[u8]) -> Fingerprint {
    Fingerprint::from_certificates([certificate])
}

/// Builder for [`PackageInfo`] fixtures.
///
/// Content packages declare the four capability classes relative to the
/// package id (`.Configuration`, `.Performer`, `.Locator`, `.Markup`), which
/// is what [`MockModule`](crate::MockModule) registers.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    info: PackageInfo,
}

impl PackageBuilder {
    /// A content extension package at API version 1.
    #[must_use]
    pub fn content(id: &str, name: &str) -> Self {
        Self::base(id, FEATURE_CHAN_EXTENSION)
            .meta(meta::CHAN_NAME, name)
            .meta(meta::CHAN_VERSION, 1_i64)
            .meta(meta::CHAN_CLASS_CONFIGURATION, ".Configuration")
            .meta(meta::CHAN_CLASS_PERFORMER, ".Performer")
            .meta(meta::CHAN_CLASS_LOCATOR, ".Locator")
            .meta(meta::CHAN_CLASS_MARKUP, ".Markup")
    }

    /// A library extension package.
    #[must_use]
    pub fn library(id: &str, name: &str) -> Self {
        Self::base(id, FEATURE_LIB_EXTENSION).meta(meta::LIB_NAME, name)
    }

    /// A package that is not an extension at all.
    #[must_use]
    pub fn plain(id: &str) -> Self {
        Self {
            info: PackageInfo {
                id: id.to_owned(),
                version_name: "1.0".to_owned(),
                version_code: 1,
                certificates: vec![TEST_CERTIFICATE.to_vec()],
                ..PackageInfo::default()
            },
        }
    }

    fn base(id: &str, feature: &str) -> Self {
        let mut builder = Self::plain(id);
        builder.info.features = BTreeSet::from([feature.to_owned()]);
        builder
    }

    /// Replace the signing certificates with one certificate.
    #[must_use]
    pub fn signed_by(mut self, certificate: &[u8]) -> Self {
        self.info.certificates = vec![certificate.to_vec()];
        self
    }

    /// Replace the signing certificates.
    #[must_use]
    pub fn signed_by_all(mut self, certificates: &[&[u8]]) -> Self {
        self.info.certificates = certificates.iter().map(|c| c.to_vec()).collect();
        self
    }

    /// Set the package version.
    #[must_use]
    pub fn version(mut self, name: &str, code: i64) -> Self {
        self.info.version_name = name.to_owned();
        self.info.version_code = code;
        self
    }

    /// Set the declared extension API version.
    #[must_use]
    pub fn api_version(self, version: i64) -> Self {
        self.meta(meta::CHAN_VERSION, version)
    }

    /// Set the display title.
    #[must_use]
    pub fn title(self, title: &str) -> Self {
        self.meta(meta::CHAN_TITLE, title)
    }

    /// Set a metadata value.
    #[must_use]
    pub fn meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.info.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// Remove a metadata value.
    #[must_use]
    pub fn without_meta(mut self, key: &str) -> Self {
        self.info.metadata.remove(key);
        self
    }

    /// Set the package directory.
    #[must_use]
    pub fn package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.info.package_dir = Some(dir.into());
        self
    }

    /// The package.
    #[must_use]
    pub fn build(self) -> PackageInfo {
        self.info
    }
}

/// Package environment held in memory.
///
/// Packages keep their installation order; reinstalling a package replaces
/// it in place.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    packages: RwLock<Vec<PackageInfo>>,
}

impl MemoryEnvironment {
    /// Empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment with `packages` installed in order.
    #[must_use]
    pub fn with_packages(packages: impl IntoIterator<Item = PackageInfo>) -> Self {
        let env = Self::new();
        for package in packages {
            env.install(package);
        }
        env
    }

    /// Install or replace a package.
    pub fn install(&self, package: PackageInfo) {
        let mut packages = self
            .packages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match packages.iter_mut().find(|p| p.id == package.id) {
            Some(slot) => *slot = package,
            None => packages.push(package),
        }
    }

    /// Remove a package. Returns whether it was installed.
    pub fn uninstall(&self, id: &str) -> bool {
        let mut packages = self
            .packages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = packages.len();
        packages.retain(|p| p.id != id);
        packages.len() != before
    }

    /// Package ids in installation order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }
}

impl PackageEnvironment for MemoryEnvironment {
    fn packages(&self) -> Vec<PackageInfo> {
        self.packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_package_declares_relative_classes() {
        let package = PackageBuilder::content("org.example.foochan", "foochan").build();
        assert!(package.has_feature(FEATURE_CHAN_EXTENSION));
        assert_eq!(package.meta_str(meta::CHAN_NAME), Some("foochan"));
        assert_eq!(package.meta_int(meta::CHAN_VERSION), Some(1));
        assert_eq!(
            package.meta_str(meta::CHAN_CLASS_LOCATOR),
            Some(".Locator")
        );
        assert_eq!(package.certificates, vec![TEST_CERTIFICATE.to_vec()]);
    }

    #[test]
    fn test_library_package() {
        let package = PackageBuilder::library("org.example.barlib", "barlib")
            .signed_by(b"other")
            .build();
        assert!(package.has_feature(FEATURE_LIB_EXTENSION));
        assert!(!package.has_feature(FEATURE_CHAN_EXTENSION));
        assert_eq!(package.meta_str(meta::LIB_NAME), Some("barlib"));
        assert_eq!(package.certificates, vec![b"other".to_vec()]);
    }

    #[test]
    fn test_memory_environment_replaces_in_place() {
        let env = MemoryEnvironment::with_packages([
            PackageBuilder::plain("a").build(),
            PackageBuilder::plain("b").build(),
        ]);
        env.install(PackageBuilder::plain("a").version("2.0", 2).build());
        assert_eq!(env.ids(), vec!["a", "b"]);
        assert_eq!(env.package("a").map(|p| p.version_code), Some(2));

        assert!(env.uninstall("a"));
        assert!(!env.uninstall("a"));
        assert_eq!(env.ids(), vec!["b"]);
    }
}
