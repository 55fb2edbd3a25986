//! Archive mapping: which extensions can mirror which.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};

use crate::snapshot::{ExtensionEntry, chan_name_by_host};

/// Source extension name → names of extensions that archive it.
///
/// Derived from the loaded set of one snapshot, on first access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveIndex {
    by_source: HashMap<String, Vec<String>>,
}

impl ArchiveIndex {
    /// Rebuild the mapping from `entries` (in registry order).
    ///
    /// Each loaded extension's archival hosts are resolved to a loaded
    /// extension; the archiver is appended to that extension's list.
    /// Failing or panicking archival queries count as "no archivation".
    #[must_use]
    pub fn rebuild(entries: &[ExtensionEntry]) -> Self {
        let mut by_source: HashMap<String, Vec<String>> = HashMap::new();

        for archiver in entries {
            let Some(bundle) = &archiver.bundle else {
                continue;
            };
            let Some(archivation) = bundle.archivation() else {
                continue;
            };

            for host in &archivation.hosts {
                let resolved = catch_unwind(AssertUnwindSafe(|| {
                    chan_name_by_host(entries, host).map(str::to_owned)
                }));
                match resolved {
                    Ok(Some(source)) => {
                        let archivers = by_source.entry(source).or_default();
                        if !archivers.iter().any(|n| n == archiver.name()) {
                            archivers.push(archiver.name().to_owned());
                        }
                    },
                    Ok(None) => {
                        debug!(archiver = %archiver.name(), host = %host, "Archive host matches no extension");
                    },
                    Err(_) => {
                        warn!(archiver = %archiver.name(), host = %host, "Host matching panicked");
                    },
                }
            }
        }

        Self { by_source }
    }

    /// Extensions that can archive `name`. Empty when there are none.
    #[must_use]
    pub fn archive_names(&self, name: &str) -> &[String] {
        self.by_source
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether any extension can archive `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_source.contains_key(name)
    }

    /// Whether no archive relation exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}
