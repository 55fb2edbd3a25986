//! Filesystem watcher feeding lifecycle events from extension directories.
//!
//! ```text
//! filesystem events (notify)
//!   → map to package directory (direct child of a watched root)
//!   → debounce per package directory
//!   → re-read package.toml, compare with the cached state
//!   → PackageAdded / PackageRemoved into the registry queue
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chanhost_config::DiscoverySection;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::environment::{PACKAGE_MANIFEST, PackageInfo, read_package};
use crate::error::{ExtensionError, ExtensionResult};
use crate::lifecycle::LifecycleEvent;
use crate::registry::ExtensionRegistry;

/// Default debounce interval.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Extension roots. Each direct subdirectory is one package.
    pub roots: Vec<PathBuf>,
    /// Changes within this window are coalesced per package.
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

impl From<&DiscoverySection> for WatcherConfig {
    fn from(section: &DiscoverySection) -> Self {
        Self {
            roots: section.extension_dirs.clone(),
            debounce: Duration::from_millis(section.debounce_ms),
        }
    }
}

/// Last seen state of one package directory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PackageState {
    info: PackageInfo,
    code_modified: Option<SystemTime>,
}

impl PackageState {
    fn read(dir: &Path) -> ExtensionResult<Self> {
        let info = read_package(dir)?;
        let code_modified = info
            .code_path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());
        Ok(Self {
            info,
            code_modified,
        })
    }
}

/// Watches extension roots and pushes lifecycle events into the registry.
pub struct DirectoryWatcher {
    roots: Vec<PathBuf>,
    debounce: Duration,
    registry: ExtensionRegistry,
    known: HashMap<PathBuf, PackageState>,
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("roots", &self.roots)
            .field("debounce", &self.debounce)
            .field("known", &self.known.len())
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    /// Create a watcher. Packages already installed are read now so that
    /// later removals can be mapped back to their package identity.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Watcher`] if the filesystem watcher cannot
    /// be initialized.
    pub fn new(config: WatcherConfig, registry: ExtensionRegistry) -> ExtensionResult<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| ExtensionError::Watcher(e.to_string()))?;

        let roots: Vec<PathBuf> = config
            .roots
            .iter()
            .map(|root| root.canonicalize().unwrap_or_else(|_| root.clone()))
            .collect();

        let mut known = HashMap::new();
        for root in &roots {
            let Ok(entries) = std::fs::read_dir(root) else {
                continue;
            };
            for dir in entries.filter_map(Result::ok).map(|e| e.path()) {
                if let Ok(state) = PackageState::read(&dir) {
                    known.insert(dir, state);
                }
            }
        }
        debug!(packages = known.len(), "Seeded directory watcher");

        Ok(Self {
            roots,
            debounce: config.debounce,
            registry,
            known,
            watcher,
            raw_rx,
        })
    }

    /// Watch until the registry closes or the filesystem watcher stops.
    pub async fn run(mut self) {
        for root in &self.roots {
            if !root.is_dir() {
                warn!(path = %root.display(), "Extension directory does not exist, skipping");
                continue;
            }
            match self.watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => info!(path = %root.display(), "Watching extension directory"),
                Err(e) => warn!(path = %root.display(), error = %e, "Failed to watch directory"),
            }
        }

        let mut pending: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();

        loop {
            let next_deadline = pending.values().copied().min();

            tokio::select! {
                biased;

                () = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let now = tokio::time::Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(dir, _)| dir.clone())
                        .collect();

                    for dir in ready {
                        pending.remove(&dir);
                        if !self.process(&dir).await {
                            debug!("Registry closed, stopping directory watcher");
                            return;
                        }
                    }
                }

                event = self.raw_rx.recv() => {
                    match event {
                        Some(Ok(ev)) => self.handle_raw_event(&ev, &mut pending),
                        Some(Err(e)) => warn!(error = %e, "Filesystem watcher error"),
                        None => {
                            debug!("Filesystem watcher channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_raw_event(&self, event: &Event, pending: &mut HashMap<PathBuf, tokio::time::Instant>) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {},
            _ => return,
        }

        for path in &event.paths {
            if let Some(dir) = package_dir(&self.roots, path) {
                debug!(path = %path.display(), package_dir = %dir.display(), kind = ?event.kind, "Package change detected");
                #[allow(clippy::arithmetic_side_effects)]
                // Instant + Duration cannot overflow in practice
                let deadline = tokio::time::Instant::now() + self.debounce;
                pending.insert(dir, deadline);
            }
        }
    }

    /// Compare `dir` with its cached state and enqueue the resulting events.
    ///
    /// Returns `false` once the registry is closed.
    async fn process(&mut self, dir: &Path) -> bool {
        let mut events = Vec::new();

        if dir.join(PACKAGE_MANIFEST).is_file() {
            let target = dir.to_path_buf();
            let read = match tokio::task::spawn_blocking(move || PackageState::read(&target)).await {
                Ok(read) => read,
                Err(e) => {
                    warn!(error = %e, "Manifest read task failed");
                    return true;
                },
            };
            let state = match read {
                Ok(state) => state,
                Err(e) => {
                    warn!(package_dir = %dir.display(), error = %e, "Ignoring unreadable package");
                    return true;
                },
            };

            match self.known.get(dir) {
                Some(previous) if *previous == state => {
                    debug!(package_dir = %dir.display(), "Package unchanged");
                    return true;
                },
                Some(previous) if previous.info.id != state.info.id => {
                    events.push(LifecycleEvent::PackageRemoved {
                        package: previous.info.id.clone(),
                        replacing: false,
                    });
                },
                _ => {},
            }
            events.push(LifecycleEvent::PackageAdded {
                package: state.info.id.clone(),
            });
            self.known.insert(dir.to_path_buf(), state);
        } else if let Some(previous) = self.known.remove(dir) {
            events.push(LifecycleEvent::PackageRemoved {
                package: previous.info.id,
                replacing: false,
            });
        }

        for event in events {
            info!(event = ?event, "Package change");
            if self.registry.enqueue(event).await.is_err() {
                return false;
            }
        }
        true
    }
}

/// The package directory `path` belongs to: the direct child of a root.
fn package_dir(roots: &[PathBuf], path: &Path) -> Option<PathBuf> {
    roots.iter().find_map(|root| {
        let relative = path.strip_prefix(root).ok()?;
        let first = relative.components().next()?;
        Some(root.join(first))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::loader::CatalogModuleLoader;
    use crate::preferences::MemoryPreferences;
    use crate::registry::RegistryBuilder;
    use crate::DirectoryEnvironment;

    #[test]
    fn test_package_dir_mapping() {
        let roots = vec![PathBuf::from("/ext/a"), PathBuf::from("/ext/b")];
        assert_eq!(
            package_dir(&roots, Path::new("/ext/a/foochan/package.toml")),
            Some(PathBuf::from("/ext/a/foochan"))
        );
        assert_eq!(
            package_dir(&roots, Path::new("/ext/b/barlib/lib/x/libbar.so")),
            Some(PathBuf::from("/ext/b/barlib"))
        );
        assert_eq!(
            package_dir(&roots, Path::new("/ext/b/removed")),
            Some(PathBuf::from("/ext/b/removed"))
        );
        assert_eq!(package_dir(&roots, Path::new("/ext/a")), None);
        assert_eq!(package_dir(&roots, Path::new("/elsewhere/foochan")), None);
    }

    fn write_library(dir: &Path, id: &str, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join(PACKAGE_MANIFEST),
            format!(
                "[package]\nid = \"{id}\"\nfeatures = [\"lib.extension\"]\n\n[meta]\n\"lib.extension.name\" = \"{name}\"\n"
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_process_emits_add_and_remove() {
        let root = tempfile::tempdir().unwrap();
        let root_path = root.path().canonicalize().unwrap();
        let environment = Arc::new(DirectoryEnvironment::new(vec![root_path.clone()]));
        let (registry, lifecycle) = RegistryBuilder::new(
            environment,
            Arc::new(CatalogModuleLoader::new()),
            Arc::new(MemoryPreferences::new()),
        )
        .build();
        tokio::spawn(lifecycle.run());

        let mut watcher = DirectoryWatcher::new(
            WatcherConfig {
                roots: vec![root_path.clone()],
                debounce: Duration::from_millis(10),
            },
            registry.clone(),
        )
        .unwrap();

        let dir = root_path.join("barlib");
        write_library(&dir, "org.example.barlib", "barlib");
        assert!(watcher.process(&dir).await);
        // Round-trip through the queue so the add has been applied.
        registry.set_order(Vec::new()).await.unwrap();
        assert!(registry.library("barlib").is_some());

        // Unchanged state enqueues nothing.
        assert!(watcher.process(&dir).await);

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(watcher.process(&dir).await);
        registry.set_order(Vec::new()).await.unwrap();
        assert!(registry.library("barlib").is_none());
    }
}
