//! Construction-time handoff between the loader and capability constructors.
//!
//! While a capability object is being constructed, the loader parks an
//! [`InitHolder`] in the [`Initializer`]. The constructor may take it exactly
//! once. Taking it twice, or asking when nothing is being constructed, is a
//! programming error and fails with [`InitError`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tracing::error;

use crate::capability::CapabilityBundle;

/// Misuse of the [`Initializer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    /// No capability object is under construction.
    #[error("initializer used outside of capability construction")]
    NotConstructing,

    /// The holder for the current construction was already taken.
    #[error("initializer holder already consumed for this construction")]
    AlreadyConsumed,
}

/// Environment resources a module may need while constructing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceHandle {
    /// Owning package identity.
    pub package: String,
    /// Package directory, when installed from the filesystem.
    pub package_dir: Option<PathBuf>,
    /// The module's code artifact.
    pub code_path: Option<PathBuf>,
    /// Directory holding the module's bundled native libraries.
    pub native_library_dir: Option<PathBuf>,
}

/// Forward reference to the bundle a capability object will belong to.
///
/// Unbound while the bundle is being assembled; bound exactly once after
/// all four capabilities were constructed and initialized. Holds a weak
/// reference so that capabilities keeping it do not keep their own bundle
/// alive.
#[derive(Clone, Default)]
pub struct BundleRef(Arc<OnceLock<Weak<CapabilityBundle>>>);

impl BundleRef {
    /// The finished bundle, once bound and while it is still alive.
    #[must_use]
    pub fn get(&self) -> Option<Arc<CapabilityBundle>> {
        self.0.get().and_then(Weak::upgrade)
    }

    /// Whether the bundle has been assembled.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.0.get().is_some()
    }

    pub(crate) fn bind(&self, bundle: &Arc<CapabilityBundle>) -> bool {
        self.0.set(Arc::downgrade(bundle)).is_ok()
    }
}

impl fmt::Debug for BundleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleRef")
            .field("bound", &self.is_bound())
            .finish()
    }
}

pub(crate) type SharedObject = Arc<dyn Any + Send + Sync>;
pub(crate) type SharedTable = Arc<HashMap<String, SharedObject>>;

/// Utility objects registered as shared classes, host catalog first.
#[derive(Clone, Default)]
pub struct SharedClasses {
    host: SharedTable,
    module: SharedTable,
}

impl SharedClasses {
    pub(crate) fn new(host: SharedTable, module: SharedTable) -> Self {
        Self { host, module }
    }

    /// The object registered for `class`, from the host if it has one of
    /// type `T`, otherwise from the module.
    #[must_use]
    pub fn resolve<T: Any + Send + Sync>(&self, class: &str) -> Option<Arc<T>> {
        [&self.host, &self.module]
            .into_iter()
            .filter_map(|table| table.get(class))
            .find_map(|object| Arc::clone(object).downcast::<T>().ok())
    }
}

impl fmt::Debug for SharedClasses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClasses")
            .field("host", &self.host.keys().collect::<Vec<_>>())
            .field("module", &self.module.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Shared state handed to a capability constructor.
#[derive(Debug, Clone)]
pub struct InitHolder {
    /// Name of the extension being loaded.
    pub extension_name: String,
    /// Forward reference to the bundle under construction.
    pub bundle: BundleRef,
    /// Package resources.
    pub resources: ResourceHandle,
    /// Shared utility classes visible to this module.
    pub shared: SharedClasses,
}

impl InitHolder {
    /// Resolve a shared utility class such as
    /// [`TEMPLATE_PARSER_CLASS`](crate::TEMPLATE_PARSER_CLASS).
    ///
    /// The host's registration wins over one bundled by the module, so
    /// every module sees the same implementation.
    #[must_use]
    pub fn resolve_shared<T: Any + Send + Sync>(&self, class: &str) -> Option<Arc<T>> {
        self.shared.resolve(class)
    }
}

enum Slot {
    Idle,
    Pending(InitHolder),
    Consumed,
}

/// One-shot holder store scoped to a single capability construction.
pub struct Initializer {
    slot: Mutex<Slot>,
}

impl Initializer {
    /// Create an idle initializer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Take the holder for the object currently being constructed.
    ///
    /// # Errors
    ///
    /// [`InitError::NotConstructing`] outside of a construction,
    /// [`InitError::AlreadyConsumed`] on a second request.
    pub fn consume(&self) -> Result<InitHolder, InitError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, Slot::Consumed) {
            Slot::Pending(holder) => Ok(holder),
            Slot::Consumed => {
                error!("Initializer holder requested twice during one construction");
                Err(InitError::AlreadyConsumed)
            },
            Slot::Idle => {
                *slot = Slot::Idle;
                error!("Initializer holder requested outside of construction");
                Err(InitError::NotConstructing)
            },
        }
    }

    /// Whether a construction is in progress.
    #[must_use]
    pub fn is_constructing(&self) -> bool {
        !matches!(
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner),
            Slot::Idle
        )
    }

    /// Run `f` with `holder` available for exactly one [`consume`](Self::consume).
    ///
    /// The slot is reset when `f` returns or unwinds.
    pub(crate) fn scope<T>(&self, holder: InitHolder, f: impl FnOnce(&Self) -> T) -> T {
        struct Reset<'a>(&'a Initializer);

        impl Drop for Reset<'_> {
            fn drop(&mut self) {
                *self.0.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Idle;
            }
        }

        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Pending(holder);
        let _reset = Reset(self);
        f(self)
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initializer")
            .field("constructing", &self.is_constructing())
            .finish()
    }
}
