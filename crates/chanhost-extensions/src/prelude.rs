//! Prelude module - commonly used types for convenient import.
//!
//! Use `use chanhost_extensions::prelude::*;` to import all essential types.

// Errors
pub use crate::{ExtensionError, ExtensionResult, LoadError};

// Capabilities
pub use crate::{
    Archivation, CapabilityBundle, CapabilityResult, ChanConfiguration, ChanLocator, ChanMarkup,
    ChanPerformer, Initializer,
};

// Descriptors
pub use crate::{ExtensionDescriptor, ExtensionKind, TrustState};

// Environment and persistence
pub use crate::{
    DirectoryEnvironment, FilePreferences, MemoryPreferences, PackageEnvironment, PackageInfo,
    Preferences,
};

// Loading
pub use crate::{CatalogModuleLoader, ModuleCatalog, ModuleLoader, NativeModuleLoader};

// Registry
pub use crate::{
    ExtensionRegistry, LifecycleEvent, LifecycleWatcher, RegistryBuilder, RegistryEvent, Snapshot,
};

// Watching
pub use crate::{DirectoryWatcher, WatcherConfig};
