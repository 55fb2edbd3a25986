//! A registry wired to in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use chanhost_crypto::Fingerprint;
use chanhost_events::SubscriberId;
use chanhost_extensions::{
    CatalogModuleLoader, Discovery, ExtensionRegistry, LifecycleEvent, LifecycleWatcher,
    MemoryPreferences, ModuleCatalog, ModuleLoader, PackageEnvironment, PackageInfo, Preferences,
    RegistryBuilder, TrustStore,
};
use tokio::task::JoinHandle;

use crate::fixtures::MemoryEnvironment;
use crate::mocks::{MockModule, RecordingSubscriber};

/// Collaborators for a registry under test.
///
/// Stage packages with [`with_package`](Self::with_package), then call
/// [`start`](Self::start) to run the initial scan, spawn the lifecycle
/// task, and wait for the initial loads. The returned [`RunningHarness`] drives lifecycle events the way the
/// host would: it updates the environment first and then notifies the
/// registry.
#[derive(Debug, Default)]
pub struct RegistryHarness {
    environment: Arc<MemoryEnvironment>,
    loader: Arc<CatalogModuleLoader>,
    preferences: Arc<MemoryPreferences>,
    discovery: Option<Discovery>,
    host_fingerprint: Option<Fingerprint>,
    queue_capacity: Option<usize>,
    replace_timeout: Option<Duration>,
}

impl RegistryHarness {
    /// Harness with no packages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Harness whose loader resolves `host` classes.
    #[must_use]
    pub fn with_host_catalog(host: ModuleCatalog) -> Self {
        Self {
            loader: Arc::new(CatalogModuleLoader::with_host(host)),
            ..Self::default()
        }
    }

    /// Install a package, with its module if it has code.
    #[must_use]
    pub fn with_package(self, package: PackageInfo, module: Option<&MockModule>) -> Self {
        if let Some(module) = module {
            self.loader.register(package.id.clone(), module.catalog());
        }
        self.environment.install(package);
        self
    }

    /// Use `preferences` as the trust and order store.
    #[must_use]
    pub fn with_preferences(mut self, preferences: MemoryPreferences) -> Self {
        self.preferences = Arc::new(preferences);
        self
    }

    /// Grant trust to `package` as currently signed.
    #[must_use]
    pub fn trusting(self, package: &PackageInfo) -> Self {
        trust(self.preferences.as_ref(), package);
        self
    }

    /// Use custom discovery rules.
    #[must_use]
    pub fn with_discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Treat `fingerprint` as the host's own signer.
    #[must_use]
    pub fn with_host_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.host_fingerprint = Some(fingerprint);
        self
    }

    /// Bound the lifecycle queue.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Give up waiting for the add after a replacing removal after `timeout`.
    #[must_use]
    pub fn with_replace_timeout(mut self, timeout: Duration) -> Self {
        self.replace_timeout = Some(timeout);
        self
    }

    /// Run the initial scan without spawning the lifecycle task.
    #[must_use]
    pub fn build(self) -> (RunningHarness, LifecycleWatcher) {
        let environment: Arc<dyn PackageEnvironment> = self.environment.clone();
        let loader: Arc<dyn ModuleLoader> = self.loader.clone();
        let preferences: Arc<dyn Preferences> = self.preferences.clone();
        let mut builder = RegistryBuilder::new(environment, loader, preferences);
        if let Some(discovery) = self.discovery {
            builder = builder.discovery(discovery);
        }
        if let Some(fingerprint) = self.host_fingerprint {
            builder = builder.host_fingerprint(fingerprint);
        }
        if let Some(capacity) = self.queue_capacity {
            builder = builder.queue_capacity(capacity);
        }
        if let Some(timeout) = self.replace_timeout {
            builder = builder.replace_timeout(timeout);
        }
        let (registry, watcher) = builder.build();

        let recorder = RecordingSubscriber::new();
        let subscriber = registry.register_subscriber(Arc::new(recorder.clone()));

        let running = RunningHarness {
            environment: self.environment,
            loader: self.loader,
            preferences: self.preferences,
            registry,
            recorder,
            subscriber,
            task: None,
        };
        (running, watcher)
    }

    /// Run the initial scan, spawn the lifecycle task, and wait until the
    /// initial loads are applied. Notifications from those loads are not
    /// recorded.
    ///
    /// # Panics
    ///
    /// Panics if the lifecycle task stops before the loads settle.
    pub async fn start(self) -> RunningHarness {
        let (mut running, watcher) = self.build();
        running.task = Some(tokio::spawn(watcher.run()));
        if let Err(e) = running.registry.settled().await {
            panic!("lifecycle task stopped during startup: {e}");
        }
        running.recorder.clear();
        running
    }
}

/// A started registry and its collaborators.
#[derive(Debug)]
pub struct RunningHarness {
    environment: Arc<MemoryEnvironment>,
    loader: Arc<CatalogModuleLoader>,
    preferences: Arc<MemoryPreferences>,
    registry: ExtensionRegistry,
    recorder: RecordingSubscriber,
    subscriber: SubscriberId,
    task: Option<JoinHandle<()>>,
}

impl RunningHarness {
    /// The registry handle.
    #[must_use]
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// The package environment.
    #[must_use]
    pub fn environment(&self) -> &MemoryEnvironment {
        &self.environment
    }

    /// The trust and order store.
    #[must_use]
    pub fn preferences(&self) -> &MemoryPreferences {
        &self.preferences
    }

    /// Notifications recorded since the initial loads settled.
    #[must_use]
    pub fn recorder(&self) -> &RecordingSubscriber {
        &self.recorder
    }

    /// Grant trust to `package` as currently signed, bypassing the registry.
    pub fn trust(&self, package: &PackageInfo) {
        trust(self.preferences.as_ref(), package);
    }

    /// Install or update a package and wait until the registry processed it.
    ///
    /// # Panics
    ///
    /// Panics if the lifecycle task is gone.
    pub async fn install(&self, package: PackageInfo, module: Option<&MockModule>) {
        let id = self.stage(package, module);
        self.send(LifecycleEvent::PackageAdded { package: id }).await;
    }

    /// Put a package and its module in place without telling the registry.
    /// Returns the package id.
    pub fn stage(&self, package: PackageInfo, module: Option<&MockModule>) -> String {
        let id = package.id.clone();
        match module {
            Some(module) => self.loader.register(id.clone(), module.catalog()),
            None => {
                self.loader.unregister(&id);
            },
        }
        self.environment.install(package);
        id
    }

    /// Update a package the way the host does: a replacing removal followed
    /// by the add.
    ///
    /// # Panics
    ///
    /// Panics if the lifecycle task is gone.
    pub async fn update(&self, package: PackageInfo, module: Option<&MockModule>) {
        self.send(LifecycleEvent::PackageRemoved {
            package: package.id.clone(),
            replacing: true,
        })
        .await;
        self.install(package, module).await;
    }

    /// Remove a package and wait until the registry processed it.
    ///
    /// # Panics
    ///
    /// Panics if the lifecycle task is gone.
    pub async fn uninstall(&self, id: &str) {
        self.environment.uninstall(id);
        self.loader.unregister(id);
        self.send(LifecycleEvent::PackageRemoved {
            package: id.to_owned(),
            replacing: false,
        })
        .await;
    }

    /// Push a raw lifecycle event and wait until it is processed.
    ///
    /// # Panics
    ///
    /// Panics if the lifecycle task is gone.
    pub async fn send(&self, event: LifecycleEvent) {
        if let Err(e) = self.registry.notify(event).await {
            panic!("lifecycle task stopped: {e}");
        }
    }

    /// Drop the registry handle and wait for the lifecycle task to stop.
    pub async fn shutdown(mut self) {
        self.registry.unregister_subscriber(self.subscriber);
        let task = self.task.take();
        drop(self);
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

fn trust(store: &dyn TrustStore, package: &PackageInfo) {
    let fingerprint = Fingerprint::from_certificates(&package.certificates);
    if let Err(e) = store.grant(&package.id, &fingerprint.to_string()) {
        panic!("memory trust store refused grant: {e}");
    }
}
