//! The registry read handle and its builder.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chanhost_config::RegistrySection;
use chanhost_crypto::Fingerprint;
use chanhost_events::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver, EventSubscriber, SubscriberId,
};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::capability::CapabilityBundle;
use crate::descriptor::ExtensionDescriptor;
use crate::discovery::Discovery;
use crate::environment::PackageEnvironment;
use crate::error::{ExtensionError, ExtensionResult};
use crate::event::RegistryEvent;
use crate::lifecycle::{Command, LifecycleEvent, LifecycleWatcher, Pipeline, pending_entry};
use crate::loader::ModuleLoader;
use crate::preferences::Preferences;
use crate::snapshot::{ExtensionEntry, Snapshot};
use crate::trust::TrustEvaluator;

/// Default capacity of the lifecycle command queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default time a replacing removal waits for the matching add.
pub const DEFAULT_REPLACE_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared by every registry handle and the lifecycle task.
pub(crate) struct Shared {
    pub(crate) snapshot: ArcSwap<Snapshot>,
    pub(crate) fallback: Arc<CapabilityBundle>,
    pub(crate) events: EventBus<RegistryEvent>,
}

/// Cheap, cloneable handle to the extension registry.
///
/// Reads load the current [`Snapshot`] atomically and never block on the
/// lifecycle task. Writes are sent to the [`LifecycleWatcher`] and applied
/// one at a time.
#[derive(Clone)]
pub struct ExtensionRegistry {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.shared.snapshot.load();
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &snapshot.len())
            .field("generation", &snapshot.generation())
            .field("restart_required", &snapshot.restart_required())
            .finish_non_exhaustive()
    }
}

impl ExtensionRegistry {
    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.snapshot.load_full()
    }

    /// Bundle of `name`, or the fallback bundle when `name` is unknown or
    /// not loaded. Never fails.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CapabilityBundle> {
        self.shared
            .snapshot
            .load()
            .bundle(name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.shared.fallback))
    }

    /// The fallback bundle.
    #[must_use]
    pub fn fallback(&self) -> Arc<CapabilityBundle> {
        Arc::clone(&self.shared.fallback)
    }

    /// Loaded bundles in registry order.
    #[must_use]
    pub fn available(&self) -> Vec<Arc<CapabilityBundle>> {
        self.shared.snapshot.load().available()
    }

    /// Whether `name` is a known content extension, loaded or not.
    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        self.shared
            .snapshot
            .load()
            .entry(name)
            .is_some_and(|e| e.descriptor.is_content())
    }

    /// Descriptor of `name`.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.shared
            .snapshot
            .load()
            .entry(name)
            .map(|e| Arc::clone(&e.descriptor))
    }

    /// All descriptors in registry order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Arc<ExtensionDescriptor>> {
        self.shared
            .snapshot
            .load()
            .entries()
            .iter()
            .map(|e| Arc::clone(&e.descriptor))
            .collect()
    }

    /// Order of two names in the registry.
    ///
    /// Unknown names sort before known ones and equal to each other.
    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.shared.snapshot.load().compare(a, b)
    }

    /// Extensions that can archive `name`. Empty when there are none.
    #[must_use]
    pub fn archive_names(&self, name: &str) -> Vec<String> {
        self.shared
            .snapshot
            .load()
            .archive()
            .archive_names(name)
            .to_vec()
    }

    /// Whether content of `name` can be archived at all.
    ///
    /// True when another extension archives it, or when its configuration
    /// is not purely local.
    #[must_use]
    pub fn can_be_archived(&self, name: &str) -> bool {
        let snapshot = self.shared.snapshot.load();
        snapshot.archive().contains(name)
            || snapshot
                .bundle(name)
                .is_some_and(|b| !b.configuration().is_local_mode())
    }

    /// Whether at least two bundles are loaded.
    #[must_use]
    pub fn has_multiple_available(&self) -> bool {
        self.shared.snapshot.load().loaded().nth(1).is_some()
    }

    /// Whether a replaced library requires a process restart.
    #[must_use]
    pub fn is_restart_required(&self) -> bool {
        self.shared.snapshot.load().restart_required()
    }

    /// First loaded extension in registry order.
    #[must_use]
    pub fn default_name(&self) -> Option<String> {
        self.shared
            .snapshot
            .load()
            .loaded()
            .next()
            .map(|e| e.name().to_owned())
    }

    /// First loaded extension whose locator accepts `host`.
    #[must_use]
    pub fn chan_name_by_host(&self, host: &str) -> Option<String> {
        self.shared
            .snapshot
            .load()
            .chan_name_by_host(host)
            .map(str::to_owned)
    }

    /// First extension waiting for a trust decision.
    #[must_use]
    pub fn first_untrusted(&self) -> Option<Arc<ExtensionDescriptor>> {
        self.shared
            .snapshot
            .load()
            .first_untrusted()
            .map(|e| Arc::clone(&e.descriptor))
    }

    /// Library descriptor by name.
    #[must_use]
    pub fn library(&self, name: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.shared.snapshot.load().library(name).cloned()
    }

    /// Whether `package` provides a known extension.
    #[must_use]
    pub fn is_extension_package(&self, package: &str) -> bool {
        self.shared.snapshot.load().by_package(package).is_some()
    }

    /// Package providing `name`.
    #[must_use]
    pub fn package_of(&self, name: &str) -> Option<String> {
        self.shared
            .snapshot
            .load()
            .entry(name)
            .map(|e| e.descriptor.package.clone())
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Receive registry notifications published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver<RegistryEvent> {
        self.shared.events.subscribe()
    }

    /// Register a synchronous subscriber, called on the lifecycle task.
    pub fn register_subscriber(
        &self,
        subscriber: Arc<dyn EventSubscriber<RegistryEvent>>,
    ) -> SubscriberId {
        self.shared.events.registry().register(subscriber)
    }

    /// Remove a synchronous subscriber.
    pub fn unregister_subscriber(&self, id: SubscriberId) -> bool {
        self.shared.events.registry().unregister(id)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Record a trust decision for an untrusted extension and wait until it
    /// is applied.
    ///
    /// A no-op unless `name` exists and is untrusted. Granting trust
    /// persists the grant and loads the extension; the call returns once
    /// the load finished. Other commands are processed meanwhile.
    ///
    /// # Errors
    ///
    /// [`ExtensionError::Preferences`] if the grant could not be persisted,
    /// [`ExtensionError::RegistryClosed`] if the lifecycle task is gone.
    pub async fn set_trust(&self, name: &str, trusted: bool) -> ExtensionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetTrust {
            name: name.to_owned(),
            trusted,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ExtensionError::RegistryClosed)?
    }

    /// Persist a new preferred order and wait until it is applied.
    ///
    /// # Errors
    ///
    /// [`ExtensionError::Preferences`] if the order could not be persisted,
    /// [`ExtensionError::RegistryClosed`] if the lifecycle task is gone.
    pub async fn set_order(&self, names: Vec<String>) -> ExtensionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetOrder { names, reply }).await?;
        rx.await.map_err(|_| ExtensionError::RegistryClosed)?
    }

    /// Push a lifecycle event and wait until it has been processed,
    /// including the load it started. Other commands are processed
    /// meanwhile.
    ///
    /// # Errors
    ///
    /// [`ExtensionError::RegistryClosed`] if the lifecycle task is gone.
    pub async fn notify(&self, event: LifecycleEvent) -> ExtensionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Lifecycle {
            event,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| ExtensionError::RegistryClosed)
    }

    /// Push a lifecycle event without waiting for it to be processed.
    ///
    /// Waits only while the queue is full.
    ///
    /// # Errors
    ///
    /// [`ExtensionError::RegistryClosed`] if the lifecycle task is gone.
    pub async fn enqueue(&self, event: LifecycleEvent) -> ExtensionResult<()> {
        self.send(Command::Lifecycle { event, reply: None }).await
    }

    /// Wait until no extension load is in flight.
    ///
    /// Right after [`RegistryBuilder::build`] trusted extensions are still
    /// loading; this resolves once the lifecycle task has applied every
    /// result. Never resolves while a constructor hangs.
    ///
    /// # Errors
    ///
    /// [`ExtensionError::RegistryClosed`] if the lifecycle task is gone.
    pub async fn settled(&self) -> ExtensionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Settle { reply }).await?;
        rx.await.map_err(|_| ExtensionError::RegistryClosed)
    }

    async fn send(&self, command: Command) -> ExtensionResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ExtensionError::RegistryClosed)
    }
}

// ---------------------------------------------------------------------------
// RegistryBuilder
// ---------------------------------------------------------------------------

/// Assembles the registry and runs the initial full scan.
pub struct RegistryBuilder {
    environment: Arc<dyn PackageEnvironment>,
    loader: Arc<dyn ModuleLoader>,
    preferences: Arc<dyn Preferences>,
    discovery: Discovery,
    trust: TrustEvaluator,
    queue_capacity: usize,
    notification_capacity: usize,
    replace_timeout: Duration,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("discovery", &self.discovery)
            .field("trust", &self.trust)
            .field("queue_capacity", &self.queue_capacity)
            .field("notification_capacity", &self.notification_capacity)
            .field("replace_timeout", &self.replace_timeout)
            .finish_non_exhaustive()
    }
}

impl RegistryBuilder {
    /// Builder with default discovery rules and an unsigned host.
    #[must_use]
    pub fn new(
        environment: Arc<dyn PackageEnvironment>,
        loader: Arc<dyn ModuleLoader>,
        preferences: Arc<dyn Preferences>,
    ) -> Self {
        Self {
            environment,
            loader,
            preferences,
            discovery: Discovery::new(),
            trust: TrustEvaluator::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            notification_capacity: DEFAULT_CHANNEL_CAPACITY,
            replace_timeout: DEFAULT_REPLACE_TIMEOUT,
        }
    }

    /// Apply the `[registry]` configuration section.
    #[must_use]
    pub fn config(mut self, section: &RegistrySection) -> Self {
        self.discovery = Discovery::from_config(section);
        self.queue_capacity = section.event_queue_capacity;
        self.notification_capacity = section.notification_capacity;
        self.replace_timeout = Duration::from_millis(section.replace_timeout_ms);
        self
    }

    /// Use custom discovery rules.
    #[must_use]
    pub fn discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// The host's own signer; extensions signed by it are trusted.
    #[must_use]
    pub fn host_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.trust = TrustEvaluator::new(fingerprint);
        self
    }

    /// Capacity of the lifecycle command queue.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Capacity of the notification broadcast channel.
    #[must_use]
    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// How long a replacing removal waits for its add before the package
    /// is looked up again.
    #[must_use]
    pub fn replace_timeout(mut self, timeout: Duration) -> Self {
        self.replace_timeout = timeout;
        self
    }

    /// Scan the environment and return the read handle together with the
    /// lifecycle task that owns all writes.
    ///
    /// No module code runs here. Trusted extensions are published as
    /// loading and are loaded once the [`LifecycleWatcher`] runs; see
    /// [`ExtensionRegistry::settled`]. Events sent before that wait in the
    /// queue.
    #[must_use]
    pub fn build(self) -> (ExtensionRegistry, LifecycleWatcher) {
        let pipeline = Pipeline {
            environment: self.environment,
            loader: self.loader,
            preferences: self.preferences,
            discovery: self.discovery,
            trust: self.trust,
        };

        let entries: Vec<ExtensionEntry> = pipeline
            .discovery
            .scan(&pipeline.environment.packages())
            .into_iter()
            .map(|descriptor| pending_entry(pipeline.evaluate(descriptor, None)))
            .collect();
        let snapshot = Snapshot::build(entries, &pipeline.preferences.order(), false, 0);

        info!(
            extensions = snapshot.len(),
            loading = snapshot.entries().iter().filter(|e| e.loading).count(),
            "Extension registry initialized"
        );

        let shared = Arc::new(Shared {
            snapshot: ArcSwap::from_pointee(snapshot),
            fallback: Arc::new(CapabilityBundle::fallback()),
            events: EventBus::with_capacity(self.notification_capacity),
        });
        let (commands, receiver) = mpsc::channel(self.queue_capacity.max(1));

        let registry = ExtensionRegistry {
            shared: Arc::clone(&shared),
            commands,
        };
        let watcher = LifecycleWatcher::new(shared, pipeline, receiver, self.replace_timeout);
        (registry, watcher)
    }
}
