//! The single writer: lifecycle events in, snapshots and notifications out.
//!
//! All mutations go through one bounded queue consumed by
//! [`LifecycleWatcher::run`]. Commands are applied one at a time: the next
//! snapshot is built off to the side, swapped in, and only then are
//! notifications published.
//!
//! Module code never runs on the lifecycle task. A trusted extension is
//! published as loading, its constructors run on the blocking pool, and the
//! finished bundle is applied later, but only if the entry still holds the
//! descriptor that was loaded. A hung constructor stalls its own extension
//! and nothing else.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::capability::CapabilityBundle;
use crate::descriptor::{ExtensionDescriptor, ExtensionKind, TrustState};
use crate::discovery::{Discovery, check_name_conflict};
use crate::environment::PackageEnvironment;
use crate::error::{ExtensionError, ExtensionResult};
use crate::event::RegistryEvent;
use crate::loader::{LoadError, ModuleLoader, panic_message};
use crate::preferences::Preferences;
use crate::registry::Shared;
use crate::snapshot::{ExtensionEntry, Snapshot};
use crate::trust::TrustEvaluator;

/// A change in the host package environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A package was installed or updated.
    PackageAdded {
        /// Package identity.
        package: String,
    },
    /// A package was removed.
    PackageRemoved {
        /// Package identity.
        package: String,
        /// Whether the removal is part of an update; the matching
        /// [`LifecycleEvent::PackageAdded`] follows.
        replacing: bool,
    },
}

impl LifecycleEvent {
    /// Package the event is about.
    #[must_use]
    pub fn package(&self) -> &str {
        match self {
            Self::PackageAdded { package } | Self::PackageRemoved { package, .. } => package,
        }
    }
}

pub(crate) enum Command {
    Lifecycle {
        event: LifecycleEvent,
        reply: Option<oneshot::Sender<()>>,
    },
    SetTrust {
        name: String,
        trusted: bool,
        reply: oneshot::Sender<ExtensionResult<()>>,
    },
    SetOrder {
        names: Vec<String>,
        reply: oneshot::Sender<ExtensionResult<()>>,
    },
    Settle {
        reply: oneshot::Sender<()>,
    },
}

/// A caller waiting for a background load to be applied.
enum Waiter {
    Event(oneshot::Sender<()>),
    Trust(oneshot::Sender<ExtensionResult<()>>),
}

impl Waiter {
    fn release(self) {
        match self {
            Self::Event(reply) => {
                let _ = reply.send(());
            },
            Self::Trust(reply) => {
                let _ = reply.send(Ok(()));
            },
        }
    }
}

/// Background work reporting back to the lifecycle task.
enum Completion {
    Loaded {
        descriptor: Arc<ExtensionDescriptor>,
        result: Result<Arc<CapabilityBundle>, LoadError>,
    },
    ReplaceExpired {
        package: String,
        ticket: u64,
    },
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Discovery and trust, shared by the initial scan and the watcher.
pub(crate) struct Pipeline {
    pub(crate) environment: Arc<dyn PackageEnvironment>,
    pub(crate) loader: Arc<dyn ModuleLoader>,
    pub(crate) preferences: Arc<dyn Preferences>,
    pub(crate) discovery: Discovery,
    pub(crate) trust: TrustEvaluator,
}

impl Pipeline {
    /// Trust state for a freshly described `descriptor`.
    ///
    /// A decision already made for the same package and signer carries over.
    pub(crate) fn evaluate(
        &self,
        descriptor: ExtensionDescriptor,
        previous: Option<&ExtensionDescriptor>,
    ) -> ExtensionDescriptor {
        let evaluated = self.trust.evaluate(&descriptor, self.preferences.as_ref());
        let trust = match previous {
            Some(prev) if evaluated == TrustState::Untrusted && prev.same_signer(&descriptor) => {
                prev.trust
            },
            Some(prev) if !prev.same_signer(&descriptor) && prev.trust != TrustState::Untrusted => {
                info!(
                    extension = %descriptor.name,
                    previous = %prev.fingerprint,
                    current = %descriptor.fingerprint,
                    "Extension signer changed"
                );
                evaluated
            },
            _ => evaluated,
        };
        ExtensionDescriptor {
            trust,
            ..descriptor
        }
    }
}

/// Entry for an evaluated descriptor: loading when its code may run,
/// unloaded otherwise.
pub(crate) fn pending_entry(descriptor: ExtensionDescriptor) -> ExtensionEntry {
    if should_load(&descriptor) {
        ExtensionEntry::loading(Arc::new(descriptor))
    } else {
        ExtensionEntry::unloaded(descriptor)
    }
}

fn should_load(descriptor: &ExtensionDescriptor) -> bool {
    descriptor.is_content() && descriptor.trust == TrustState::Trusted && descriptor.is_supported()
}

/// Runs on the blocking pool.
fn load_module(
    loader: &dyn ModuleLoader,
    descriptor: &ExtensionDescriptor,
) -> Result<Arc<CapabilityBundle>, LoadError> {
    catch_unwind(AssertUnwindSafe(|| loader.load(descriptor))).unwrap_or_else(|payload| {
        Err(LoadError::Panicked {
            class: descriptor.package.clone(),
            message: panic_message(payload.as_ref()),
        })
    })
}

// ---------------------------------------------------------------------------
// LifecycleWatcher
// ---------------------------------------------------------------------------

/// Consumes lifecycle events and applies them to the registry.
///
/// Created by [`RegistryBuilder::build`](crate::RegistryBuilder::build);
/// spawn [`run`](Self::run) on a Tokio runtime. It stops once every
/// [`ExtensionRegistry`](crate::ExtensionRegistry) handle is dropped.
pub struct LifecycleWatcher {
    shared: Arc<Shared>,
    pipeline: Pipeline,
    commands: mpsc::Receiver<Command>,
    tasks: JoinSet<Completion>,
    /// Packages with a load in flight, and who waits for it.
    loads: HashMap<String, Vec<Waiter>>,
    /// Replacing removals waiting for their add, by package.
    deferred_removals: HashMap<String, u64>,
    replace_timeout: Duration,
    next_ticket: u64,
    settle_waiters: Vec<oneshot::Sender<()>>,
}

impl std::fmt::Debug for LifecycleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleWatcher")
            .field("loading", &self.loads.keys().collect::<Vec<_>>())
            .field("deferred_removals", &self.deferred_removals.keys().collect::<Vec<_>>())
            .field("replace_timeout", &self.replace_timeout)
            .finish_non_exhaustive()
    }
}

impl LifecycleWatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        pipeline: Pipeline,
        commands: mpsc::Receiver<Command>,
        replace_timeout: Duration,
    ) -> Self {
        Self {
            shared,
            pipeline,
            commands,
            tasks: JoinSet::new(),
            loads: HashMap::new(),
            deferred_removals: HashMap::new(),
            replace_timeout,
            next_ticket: 0,
            settle_waiters: Vec::new(),
        }
    }

    /// Load the extensions the initial scan trusted, then process commands
    /// until every registry handle is gone.
    pub async fn run(mut self) {
        info!("Extension lifecycle task started");
        self.start_initial_loads();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle(command);
                },
                Some(done) = self.tasks.join_next(), if !self.tasks.is_empty() => match done {
                    Ok(completion) => self.complete(completion),
                    Err(e) => warn!(error = %e, "Lifecycle background task failed"),
                },
            }
        }
        info!(
            abandoned_loads = self.loads.len(),
            "Extension lifecycle task stopped"
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Lifecycle { event, reply } => {
                debug!(event = ?event, "Processing lifecycle event");
                let waiter = reply.map(Waiter::Event);
                match event {
                    LifecycleEvent::PackageAdded { package } => self.package_added(&package, waiter),
                    LifecycleEvent::PackageRemoved { package, replacing } => {
                        self.package_removed(&package, replacing);
                        if let Some(waiter) = waiter {
                            waiter.release();
                        }
                    },
                }
            },
            Command::SetTrust {
                name,
                trusted,
                reply,
            } => match self.set_trust(&name, trusted) {
                Ok(Some(descriptor)) => self.start_load(descriptor, Some(Waiter::Trust(reply))),
                Ok(None) => {
                    let _ = reply.send(Ok(()));
                },
                Err(e) => {
                    let _ = reply.send(Err(e));
                },
            },
            Command::SetOrder { names, reply } => {
                let result = self.set_order(&names);
                let _ = reply.send(result);
            },
            Command::Settle { reply } => self.settle_waiters.push(reply),
        }
        self.release_settled();
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Loaded { descriptor, result } => self.load_finished(&descriptor, result),
            Completion::ReplaceExpired { package, ticket } => {
                self.replace_expired(&package, ticket);
            },
        }
        self.release_settled();
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    fn start_initial_loads(&mut self) {
        let current = self.shared.snapshot.load_full();
        for entry in current.entries().iter().filter(|e| e.loading) {
            self.start_load(Arc::clone(&entry.descriptor), None);
        }
    }

    fn start_load(&mut self, descriptor: Arc<ExtensionDescriptor>, waiter: Option<Waiter>) {
        self.loads
            .entry(descriptor.package.clone())
            .or_default()
            .extend(waiter);

        debug!(extension = %descriptor.name, "Loading extension in the background");
        let loader = Arc::clone(&self.pipeline.loader);
        self.tasks.spawn_blocking(move || {
            let result = load_module(loader.as_ref(), &descriptor);
            Completion::Loaded { descriptor, result }
        });
    }

    fn load_finished(
        &mut self,
        descriptor: &Arc<ExtensionDescriptor>,
        result: Result<Arc<CapabilityBundle>, LoadError>,
    ) {
        let current = self.shared.snapshot.load_full();
        let still_wanted = current
            .by_package(&descriptor.package)
            .is_some_and(|e| e.loading && Arc::ptr_eq(&e.descriptor, descriptor));
        if !still_wanted {
            debug!(extension = %descriptor.name, "Discarding result of a superseded load");
            return;
        }

        let (bundle, restart) = match result {
            Ok(bundle) => {
                info!(extension = %descriptor.name, version = %descriptor.version.name, "Extension loaded");
                (Some(bundle), false)
            },
            Err(source) => {
                let restart = source.requires_restart();
                let e = ExtensionError::Load {
                    name: descriptor.name.clone(),
                    source,
                };
                warn!(extension = %descriptor.name, error = %e, "Extension stays unloaded");
                (None, restart)
            },
        };

        let entry = ExtensionEntry {
            descriptor: Arc::clone(descriptor),
            bundle: bundle.clone(),
            load_failed: bundle.is_none(),
            loading: false,
        };
        let entries = current
            .entries()
            .iter()
            .map(|e| {
                if e.descriptor.package == descriptor.package {
                    entry.clone()
                } else {
                    e.clone()
                }
            })
            .collect();
        self.publish(&current, entries, restart);

        if let Some(bundle) = bundle {
            self.emit(RegistryEvent::installed(bundle));
        }
        self.settle_load(&descriptor.package);
    }

    /// Forget the in-flight load of `package`, if any, and answer whoever
    /// waited for it.
    fn settle_load(&mut self, package: &str) {
        if let Some(waiters) = self.loads.remove(package) {
            for waiter in waiters {
                waiter.release();
            }
        }
    }

    fn release_settled(&mut self) {
        if self.loads.is_empty() {
            for reply in self.settle_waiters.drain(..) {
                let _ = reply.send(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle events
    // -----------------------------------------------------------------------

    fn package_added(&mut self, package: &str, waiter: Option<Waiter>) {
        self.deferred_removals.remove(package);
        self.apply_added(package);
        if let Some(waiter) = waiter {
            match self.loads.get_mut(package) {
                Some(waiters) => waiters.push(waiter),
                None => waiter.release(),
            }
        }
    }

    fn apply_added(&mut self, package: &str) {
        let current = self.shared.snapshot.load_full();
        let previous = current.by_package(package).cloned();

        let described = match self.pipeline.environment.package(package) {
            Some(info) => self.pipeline.discovery.describe(&info),
            None => {
                warn!(package = %package, "Added package is not in the environment");
                return;
            },
        };
        let descriptor = match described {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                debug!(package = %package, "Package is not an extension");
                self.remove_entry(&current, previous);
                return;
            },
            Err(e) => {
                warn!(package = %package, error = %e, "Dropping extension package");
                self.remove_entry(&current, previous);
                return;
            },
        };

        let others = current
            .entries()
            .iter()
            .map(|e| e.descriptor.as_ref())
            .filter(|d| d.package != package);
        if let Err(e) = check_name_conflict(&descriptor, others) {
            warn!(package = %package, error = %e, "Dropping extension package");
            return;
        }

        let descriptor = self
            .pipeline
            .evaluate(descriptor, previous.as_ref().map(|e| e.descriptor.as_ref()));
        let pending = descriptor.trust == TrustState::Untrusted;
        let name = descriptor.name.clone();
        let entry = pending_entry(descriptor);
        let to_load = entry.loading.then(|| Arc::clone(&entry.descriptor));

        // Supersedes any load still running for the old descriptor.
        self.settle_load(package);

        let restart = previous.as_ref().is_some_and(holds_native_code);
        let mut entries = current.entries().to_vec();
        match entries.iter_mut().find(|e| e.descriptor.package == package) {
            Some(slot) => *slot = entry,
            None => entries.push(entry),
        }
        self.publish(&current, entries, restart);

        if let Some(bundle) = previous.and_then(|e| e.bundle) {
            self.emit(RegistryEvent::uninstalled(bundle));
        }
        if pending {
            self.emit(RegistryEvent::untrusted_pending(name));
        }
        if let Some(descriptor) = to_load {
            self.start_load(descriptor, None);
        }
    }

    fn package_removed(&mut self, package: &str, replacing: bool) {
        if replacing {
            self.defer_removal(package);
            return;
        }
        self.deferred_removals.remove(package);

        let current = self.shared.snapshot.load_full();
        let previous = current.by_package(package).cloned();
        if previous.is_none() {
            debug!(package = %package, "Removed package was not an extension");
            return;
        }
        self.remove_entry(&current, previous);
    }

    fn defer_removal(&mut self, package: &str) {
        self.next_ticket = self.next_ticket.wrapping_add(1);
        let ticket = self.next_ticket;
        self.deferred_removals.insert(package.to_owned(), ticket);
        debug!(
            package = %package,
            timeout = ?self.replace_timeout,
            "Deferring removal until the update arrives"
        );

        let package = package.to_owned();
        let timeout = self.replace_timeout;
        self.tasks.spawn(async move {
            tokio::time::sleep(timeout).await;
            Completion::ReplaceExpired { package, ticket }
        });
    }

    /// The add that should follow a replacing removal never came. Look the
    /// package up again and settle on what is actually installed.
    fn replace_expired(&mut self, package: &str, ticket: u64) {
        if self.deferred_removals.get(package) != Some(&ticket) {
            return;
        }
        self.deferred_removals.remove(package);

        if self.pipeline.environment.package(package).is_some() {
            warn!(package = %package, "Update never announced; rescanning package");
            self.apply_added(package);
        } else {
            warn!(package = %package, "Update never arrived; completing removal");
            self.package_removed(package, false);
        }
    }

    fn remove_entry(&mut self, current: &Snapshot, previous: Option<ExtensionEntry>) {
        let Some(previous) = previous else {
            return;
        };
        info!(extension = %previous.name(), "Extension removed");

        let entries = current
            .entries()
            .iter()
            .filter(|e| e.descriptor.package != previous.descriptor.package)
            .cloned()
            .collect();
        self.publish(current, entries, holds_native_code(&previous));
        self.settle_load(&previous.descriptor.package);

        if let Some(bundle) = previous.bundle {
            self.emit(RegistryEvent::uninstalled(bundle));
        }
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    /// Apply a trust decision. Returns the descriptor to load when trust was
    /// granted to loadable code.
    fn set_trust(
        &self,
        name: &str,
        trusted: bool,
    ) -> ExtensionResult<Option<Arc<ExtensionDescriptor>>> {
        let current = self.shared.snapshot.load_full();
        let Some(entry) = current.entry(name) else {
            debug!(extension = %name, "Trust decision for unknown extension ignored");
            return Ok(None);
        };
        if entry.trust() != TrustState::Untrusted {
            debug!(extension = %name, trust = %entry.trust(), "Trust already decided");
            return Ok(None);
        }

        let descriptor = entry.descriptor.as_ref();
        let entry = if trusted {
            self.pipeline
                .preferences
                .grant(&descriptor.package, &descriptor.fingerprint.to_string())?;
            info!(extension = %name, fingerprint = %descriptor.fingerprint, "Extension trusted");
            pending_entry(descriptor.with_trust(TrustState::Trusted))
        } else {
            info!(extension = %name, "Extension discarded");
            ExtensionEntry::unloaded(descriptor.with_trust(TrustState::Discarded))
        };
        let to_load = entry.loading.then(|| Arc::clone(&entry.descriptor));

        let entries = current
            .entries()
            .iter()
            .map(|e| {
                if e.name() == name {
                    entry.clone()
                } else {
                    e.clone()
                }
            })
            .collect();
        self.publish(&current, entries, false);
        Ok(to_load)
    }

    fn set_order(&self, names: &[String]) -> ExtensionResult<()> {
        self.pipeline.preferences.set_order(names)?;
        let current = self.shared.snapshot.load_full();
        self.publish(&current, current.entries().to_vec(), false);
        Ok(())
    }

    /// Build and swap in the next snapshot.
    ///
    /// The restart flag never goes back to false.
    fn publish(&self, current: &Snapshot, entries: Vec<ExtensionEntry>, restart: bool) {
        let restart_required = current.restart_required() || restart;
        let next = Snapshot::build(
            entries,
            &self.pipeline.preferences.order(),
            restart_required,
            current.generation().wrapping_add(1),
        );
        debug!(
            generation = next.generation(),
            extensions = next.len(),
            "Publishing registry snapshot"
        );
        self.shared.snapshot.store(Arc::new(next));

        if restart_required && !current.restart_required() {
            warn!("Native code in use was replaced; restart required");
            self.emit(RegistryEvent::restart_required());
        }
    }

    fn emit(&self, event: RegistryEvent) {
        self.shared.events.publish(event);
    }
}

/// Whether replacing `entry` leaves stale native code in the process.
fn holds_native_code(entry: &ExtensionEntry) -> bool {
    entry.descriptor.kind == ExtensionKind::Library && entry.trust() == TrustState::Trusted
}
