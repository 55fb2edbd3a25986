//! Immutable registry snapshots.
//!
//! A [`Snapshot`] is built completely before it is published and never
//! changes afterwards. Readers hold an `Arc<Snapshot>` and see one
//! consistent view for as long as they keep it.
//!
//! The archive index asks module code which hosts it serves, so it is
//! derived by the first reader that needs it rather than by the lifecycle
//! task. It depends only on the snapshot's entries.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::archive::ArchiveIndex;
use crate::capability::CapabilityBundle;
use crate::descriptor::{ExtensionDescriptor, ExtensionKind, TrustState};

/// One known extension and, when loaded, its capability bundle.
#[derive(Debug, Clone)]
pub struct ExtensionEntry {
    /// Validated metadata with the current trust state.
    pub descriptor: Arc<ExtensionDescriptor>,
    /// Loaded bundle. `None` for libraries and for untrusted, unsupported,
    /// or failed content extensions.
    pub bundle: Option<Arc<CapabilityBundle>>,
    /// Whether the last load attempt failed.
    pub load_failed: bool,
    /// Whether a load is in flight for this descriptor.
    pub loading: bool,
}

impl ExtensionEntry {
    /// Entry without a bundle.
    #[must_use]
    pub fn unloaded(descriptor: ExtensionDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            bundle: None,
            load_failed: false,
            loading: false,
        }
    }

    pub(crate) fn loading(descriptor: Arc<ExtensionDescriptor>) -> Self {
        Self {
            descriptor,
            bundle: None,
            load_failed: false,
            loading: true,
        }
    }

    /// Extension name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Trust state.
    #[must_use]
    pub fn trust(&self) -> TrustState {
        self.descriptor.trust
    }

    /// Whether a capability bundle is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.bundle.is_some()
    }
}

/// Ordered, immutable view of every known extension.
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: Vec<ExtensionEntry>,
    index: HashMap<String, usize>,
    archive: OnceLock<ArchiveIndex>,
    restart_required: bool,
    generation: u64,
}

impl Snapshot {
    /// Build a snapshot.
    ///
    /// `entries` are in base order (discovery order, updates in place, new
    /// extensions appended). Names in `preferred` move to the front in that
    /// order; unknown preferred names are skipped.
    pub(crate) fn build(
        mut entries: Vec<ExtensionEntry>,
        preferred: &[String],
        restart_required: bool,
        generation: u64,
    ) -> Self {
        entries.sort_by_key(|entry| {
            preferred
                .iter()
                .position(|name| name == entry.name())
                .map_or((1, 0), |rank| (0, rank))
        });

        let index = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.name().to_owned(), i))
            .collect();

        Self {
            entries,
            index,
            archive: OnceLock::new(),
            restart_required,
            generation,
        }
    }

    /// All entries in registry order.
    #[must_use]
    pub fn entries(&self) -> &[ExtensionEntry] {
        &self.entries
    }

    /// Number of known extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no extension is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by name.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&ExtensionEntry> {
        self.index.get(name).and_then(|&i| self.entries.get(i))
    }

    /// Position of `name` in registry order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Loaded bundle by name.
    #[must_use]
    pub fn bundle(&self, name: &str) -> Option<&Arc<CapabilityBundle>> {
        self.entry(name).and_then(|e| e.bundle.as_ref())
    }

    /// Loaded entries in registry order.
    pub fn loaded(&self) -> impl Iterator<Item = &ExtensionEntry> {
        self.entries.iter().filter(|e| e.is_loaded())
    }

    /// Loaded bundles in registry order.
    #[must_use]
    pub fn available(&self) -> Vec<Arc<CapabilityBundle>> {
        self.entries.iter().filter_map(|e| e.bundle.clone()).collect()
    }

    /// Names of all entries in registry order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name().to_owned()).collect()
    }

    /// Order of two names by registry position.
    ///
    /// Absent names sort before present ones and equal to each other.
    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.position(a).cmp(&self.position(b))
    }

    /// Derived archive mapping, computed on first access.
    #[must_use]
    pub fn archive(&self) -> &ArchiveIndex {
        self.archive
            .get_or_init(|| ArchiveIndex::rebuild(&self.entries))
    }

    /// Whether a library replacement requires a restart.
    #[must_use]
    pub fn restart_required(&self) -> bool {
        self.restart_required
    }

    /// Publication counter, incremented on every swap.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// First loaded extension whose locator accepts `host`.
    #[must_use]
    pub fn chan_name_by_host(&self, host: &str) -> Option<&str> {
        chan_name_by_host(&self.entries, host)
    }

    /// First untrusted extension in registry order.
    #[must_use]
    pub fn first_untrusted(&self) -> Option<&ExtensionEntry> {
        self.entries
            .iter()
            .find(|e| e.trust() == TrustState::Untrusted)
    }

    /// Library descriptor by name.
    #[must_use]
    pub fn library(&self, name: &str) -> Option<&Arc<ExtensionDescriptor>> {
        self.entry(name)
            .map(|e| &e.descriptor)
            .filter(|d| d.kind == ExtensionKind::Library)
    }

    /// Entry owned by `package`.
    #[must_use]
    pub fn by_package(&self, package: &str) -> Option<&ExtensionEntry> {
        self.entries.iter().find(|e| e.descriptor.package == package)
    }
}

pub(crate) fn chan_name_by_host<'a>(entries: &'a [ExtensionEntry], host: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|e| {
            e.bundle
                .as_ref()
                .is_some_and(|bundle| bundle.locator().is_chan_host(host))
        })
        .map(ExtensionEntry::name)
}

#[cfg(test)]
mod tests {
    use chanhost_crypto::Fingerprint;

    use super::*;
    use crate::descriptor::PackageVersion;

    fn entry(name: &str) -> ExtensionEntry {
        ExtensionEntry::unloaded(ExtensionDescriptor {
            kind: ExtensionKind::Library,
            name: name.to_owned(),
            title: name.to_owned(),
            package: format!("pkg.{name}"),
            version: PackageVersion::default(),
            fingerprint: Fingerprint::empty(),
            trust: TrustState::Untrusted,
            update_source: None,
            package_dir: None,
            code_path: None,
            native_library_dir: None,
            content: None,
        })
    }

    fn snapshot(names: &[&str], preferred: &[&str]) -> Snapshot {
        let preferred: Vec<String> = preferred.iter().map(|s| (*s).to_owned()).collect();
        Snapshot::build(names.iter().map(|n| entry(n)).collect(), &preferred, false, 0)
    }

    #[test]
    fn test_preferred_order_first() {
        let s = snapshot(&["alpha", "beta", "gamma", "delta"], &["gamma", "gone", "alpha"]);
        assert_eq!(s.names(), vec!["gamma", "alpha", "beta", "delta"]);
        assert_eq!(s.position("beta"), Some(2));
    }

    #[test]
    fn test_rebuild_is_stable() {
        let first = snapshot(&["alpha", "beta", "gamma"], &["beta"]);
        let entries = first.entries().to_vec();
        let second = Snapshot::build(entries, &["beta".to_owned()], false, 1);
        assert_eq!(first.names(), second.names());
    }

    #[test]
    fn test_compare() {
        let s = snapshot(&["alpha", "beta"], &[]);
        assert_eq!(s.compare("alpha", "beta"), Ordering::Less);
        assert_eq!(s.compare("beta", "alpha"), Ordering::Greater);
        assert_eq!(s.compare("beta", "beta"), Ordering::Equal);
        assert_eq!(s.compare("missing", "alpha"), Ordering::Less);
        assert_eq!(s.compare("missing", "other"), Ordering::Equal);
    }

    #[test]
    fn test_lookups() {
        let s = snapshot(&["alpha", "beta"], &[]);
        assert_eq!(s.len(), 2);
        assert!(s.bundle("alpha").is_none());
        assert!(s.library("alpha").is_some());
        assert_eq!(s.first_untrusted().map(ExtensionEntry::name), Some("alpha"));
        assert_eq!(s.by_package("pkg.beta").map(ExtensionEntry::name), Some("beta"));
        assert!(s.chan_name_by_host("alpha.example").is_none());
        assert!(s.available().is_empty());
        assert!(s.archive().archive_names("alpha").is_empty());
    }
}
