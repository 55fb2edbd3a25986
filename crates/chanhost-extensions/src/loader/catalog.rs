//! Class-id → constructor tables.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::capability::{
    CapabilityBundle, CapabilityResult, ChanConfiguration, ChanLocator, ChanMarkup, ChanPerformer,
};
use crate::descriptor::ExtensionDescriptor;
use crate::init::{Initializer, SharedClasses, SharedObject, SharedTable};
use crate::loader::{BundleBuilder, LoadError, ModuleLoader};

/// Class id of the shared template parser. Always resolved from the host
/// catalog first so that every module sees the same implementation, both
/// as a capability class and through
/// [`InitHolder::resolve_shared`](crate::InitHolder::resolve_shared).
pub const TEMPLATE_PARSER_CLASS: &str = "chan.text.TemplateParser";

/// Classes the host resolves before looking at the module.
const HOST_PREFERRED_CLASSES: &[&str] = &[TEMPLATE_PARSER_CLASS];

pub(crate) type Constructor<T> =
    Arc<dyn Fn(&Initializer) -> CapabilityResult<Box<T>> + Send + Sync>;

/// Constructors a module (or the host) provides, keyed by class id.
///
/// ```rust
/// use chanhost_extensions::{ChanConfiguration, ModuleCatalog};
///
/// struct Config;
/// impl ChanConfiguration for Config {}
///
/// let mut catalog = ModuleCatalog::new();
/// catalog.register_configuration("org.example.foochan.Configuration", |init| {
///     let _holder = init.consume()?;
///     Ok(Config)
/// });
/// assert!(catalog.contains("org.example.foochan.Configuration"));
/// ```
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    configurations: HashMap<String, Constructor<dyn ChanConfiguration>>,
    performers: HashMap<String, Constructor<dyn ChanPerformer>>,
    locators: HashMap<String, Constructor<dyn ChanLocator>>,
    markups: HashMap<String, Constructor<dyn ChanMarkup>>,
    shared: SharedTable,
}

impl ModuleCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration constructor.
    pub fn register_configuration<T, F>(&mut self, class: impl Into<String>, ctor: F) -> &mut Self
    where
        T: ChanConfiguration + 'static,
        F: Fn(&Initializer) -> CapabilityResult<T> + Send + Sync + 'static,
    {
        self.configurations.insert(
            class.into(),
            Arc::new(move |init| ctor(init).map(|c| Box::new(c) as Box<dyn ChanConfiguration>)),
        );
        self
    }

    /// Register a performer constructor.
    pub fn register_performer<T, F>(&mut self, class: impl Into<String>, ctor: F) -> &mut Self
    where
        T: ChanPerformer + 'static,
        F: Fn(&Initializer) -> CapabilityResult<T> + Send + Sync + 'static,
    {
        self.performers.insert(
            class.into(),
            Arc::new(move |init| ctor(init).map(|c| Box::new(c) as Box<dyn ChanPerformer>)),
        );
        self
    }

    /// Register a locator constructor.
    pub fn register_locator<T, F>(&mut self, class: impl Into<String>, ctor: F) -> &mut Self
    where
        T: ChanLocator + 'static,
        F: Fn(&Initializer) -> CapabilityResult<T> + Send + Sync + 'static,
    {
        self.locators.insert(
            class.into(),
            Arc::new(move |init| ctor(init).map(|c| Box::new(c) as Box<dyn ChanLocator>)),
        );
        self
    }

    /// Register a markup constructor.
    pub fn register_markup<T, F>(&mut self, class: impl Into<String>, ctor: F) -> &mut Self
    where
        T: ChanMarkup + 'static,
        F: Fn(&Initializer) -> CapabilityResult<T> + Send + Sync + 'static,
    {
        self.markups.insert(
            class.into(),
            Arc::new(move |init| ctor(init).map(|c| Box::new(c) as Box<dyn ChanMarkup>)),
        );
        self
    }

    /// Register a shared utility object under `class`.
    ///
    /// Constructors reach it with
    /// [`InitHolder::resolve_shared`](crate::InitHolder::resolve_shared).
    pub fn register_shared<T>(&mut self, class: impl Into<String>, object: T) -> &mut Self
    where
        T: Any + Send + Sync,
    {
        let object: SharedObject = Arc::new(object);
        Arc::make_mut(&mut self.shared).insert(class.into(), object);
        self
    }

    /// Whether any role has a constructor, or a shared object, for `class`.
    #[must_use]
    pub fn contains(&self, class: &str) -> bool {
        self.configurations.contains_key(class)
            || self.performers.contains_key(class)
            || self.locators.contains_key(class)
            || self.markups.contains_key(class)
            || self.shared.contains_key(class)
    }

    /// Total number of registered constructors.
    #[must_use]
    pub fn len(&self) -> usize {
        [
            self.configurations.len(),
            self.performers.len(),
            self.locators.len(),
            self.markups.len(),
            self.shared.len(),
        ]
        .iter()
        .sum()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("configurations", &self.configurations.keys().collect::<Vec<_>>())
            .field("performers", &self.performers.keys().collect::<Vec<_>>())
            .field("locators", &self.locators.keys().collect::<Vec<_>>())
            .field("markups", &self.markups.keys().collect::<Vec<_>>())
            .field("shared", &self.shared.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Layered resolution
// ---------------------------------------------------------------------------

/// A module catalog backed by the host catalog.
///
/// Classes resolve from the module first, then the host, except for
/// host-preferred classes which resolve the other way round.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LayeredCatalog<'a> {
    module: &'a ModuleCatalog,
    host: &'a ModuleCatalog,
}

impl<'a> LayeredCatalog<'a> {
    pub(crate) fn new(module: &'a ModuleCatalog, host: &'a ModuleCatalog) -> Self {
        Self { module, host }
    }

    fn resolve<T: ?Sized>(
        &self,
        class: &str,
        table: impl Fn(&ModuleCatalog) -> &HashMap<String, Constructor<T>>,
    ) -> Option<Constructor<T>> {
        let (first, second) = if HOST_PREFERRED_CLASSES.contains(&class) {
            (self.host, self.module)
        } else {
            (self.module, self.host)
        };
        table(first)
            .get(class)
            .or_else(|| table(second).get(class))
            .cloned()
    }

    pub(crate) fn configuration(&self, class: &str) -> Option<Constructor<dyn ChanConfiguration>> {
        self.resolve(class, |c| &c.configurations)
    }

    pub(crate) fn performer(&self, class: &str) -> Option<Constructor<dyn ChanPerformer>> {
        self.resolve(class, |c| &c.performers)
    }

    pub(crate) fn locator(&self, class: &str) -> Option<Constructor<dyn ChanLocator>> {
        self.resolve(class, |c| &c.locators)
    }

    pub(crate) fn markup(&self, class: &str) -> Option<Constructor<dyn ChanMarkup>> {
        self.resolve(class, |c| &c.markups)
    }

    pub(crate) fn shared(&self) -> SharedClasses {
        SharedClasses::new(Arc::clone(&self.host.shared), Arc::clone(&self.module.shared))
    }
}

// ---------------------------------------------------------------------------
// CatalogModuleLoader
// ---------------------------------------------------------------------------

/// Loader serving in-process catalogs keyed by package identity.
///
/// Useful for modules linked into the host binary and for tests.
#[derive(Debug, Default)]
pub struct CatalogModuleLoader {
    modules: RwLock<HashMap<String, ModuleCatalog>>,
    host: ModuleCatalog,
}

impl CatalogModuleLoader {
    /// Loader with an empty host catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with `host` as the shared host catalog.
    #[must_use]
    pub fn with_host(host: ModuleCatalog) -> Self {
        Self {
            modules: RwLock::default(),
            host,
        }
    }

    /// Register (or replace) the catalog of `package`.
    pub fn register(&self, package: impl Into<String>, catalog: ModuleCatalog) {
        let package = package.into();
        debug!(package = %package, constructors = catalog.len(), "Registered module catalog");
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(package, catalog);
    }

    /// Remove the catalog of `package`.
    pub fn unregister(&self, package: &str) -> bool {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(package)
            .is_some()
    }
}

impl ModuleLoader for CatalogModuleLoader {
    fn load(&self, descriptor: &ExtensionDescriptor) -> Result<Arc<CapabilityBundle>, LoadError> {
        let module = self
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&descriptor.package)
            .cloned()
            .unwrap_or_default();
        BundleBuilder::new(descriptor, &module, &self.host).build()
    }
}
