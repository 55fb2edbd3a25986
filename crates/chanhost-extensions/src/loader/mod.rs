//! Turning trusted descriptors into capability bundles.
//!
//! A [`ModuleLoader`] resolves the four capability classes named by a
//! descriptor to constructors, runs them through a [`BundleBuilder`], and
//! returns the finished bundle. Two loaders ship with the crate:
//!
//! - [`NativeModuleLoader`] opens the package's code artifact as a dynamic
//!   library and asks it to register its constructors.
//! - [`CatalogModuleLoader`] serves constructors registered in-process,
//!   keyed by package identity.

mod builder;
mod catalog;
mod native;

pub use builder::BundleBuilder;
pub use catalog::{CatalogModuleLoader, ModuleCatalog, TEMPLATE_PARSER_CLASS};
pub use native::{ABI_VERSION_SYMBOL, NativeModuleLoader, REGISTER_SYMBOL};

use std::path::PathBuf;
use std::sync::Arc;

use crate::capability::CapabilityBundle;
use crate::descriptor::ExtensionDescriptor;
use crate::init::InitError;

/// Version of the native module interface. Bumped on any incompatible
/// change to [`ModuleCatalog`] or the capability traits.
pub const MODULE_ABI_VERSION: u32 = 1;

/// Why a module could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The descriptor is not a supported content extension.
    #[error("extension is not a loadable content extension")]
    NotLoadable,

    /// No constructor is registered for a declared class.
    #[error("no {role} constructor registered for class {class}")]
    MissingClass {
        /// Class identifier.
        class: String,
        /// Capability role.
        role: &'static str,
    },

    /// A constructor returned an error.
    #[error("constructing {class} failed: {message}")]
    Construction {
        /// Class identifier.
        class: String,
        /// Error reported by module code.
        message: String,
    },

    /// Module code panicked.
    #[error("{class} panicked: {message}")]
    Panicked {
        /// Class identifier.
        class: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// An `init` hook returned an error.
    #[error("initializing {class} failed: {message}")]
    Init {
        /// Class identifier.
        class: String,
        /// Error reported by module code.
        message: String,
    },

    /// A constructor misused the initializer.
    #[error("{class} misused the initializer: {source}")]
    Initializer {
        /// Class identifier.
        class: String,
        /// The misuse.
        #[source]
        source: InitError,
    },

    /// The dynamic library could not be opened or is missing a symbol.
    #[error("failed to open module library {path}: {message}")]
    Library {
        /// Library path.
        path: PathBuf,
        /// Loader error.
        message: String,
    },

    /// The library was built against a different module interface.
    #[error("module library {path} has ABI version {found}, expected {expected}")]
    AbiMismatch {
        /// Library path.
        path: PathBuf,
        /// Host ABI version.
        expected: u32,
        /// Library ABI version.
        found: u32,
    },

    /// The package has no code to load.
    #[error("extension {name} has no code artifact")]
    NoCode {
        /// Extension name.
        name: String,
    },

    /// A library already mapped into the process changed on disk. The new
    /// code can only be picked up by a restart.
    #[error("module library {path} changed on disk after it was opened")]
    LibraryReplaced {
        /// Library path.
        path: PathBuf,
    },
}

impl LoadError {
    /// Whether only a restart can resolve this failure.
    #[must_use]
    pub fn requires_restart(&self) -> bool {
        matches!(self, Self::LibraryReplaced { .. })
    }
}

/// Instantiates capability bundles for trusted content extensions.
///
/// Called on the lifecycle task's blocking pool, never concurrently for the
/// same descriptor. Implementations must not let module panics escape.
pub trait ModuleLoader: Send + Sync {
    /// Load the bundle for `descriptor`.
    ///
    /// # Errors
    ///
    /// Any failure, including panics in module code, is a [`LoadError`].
    fn load(&self, descriptor: &ExtensionDescriptor) -> Result<Arc<CapabilityBundle>, LoadError>;
}

/// Render a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
