//! Chanhost Extensions - the extension registry.
//!
//! Board-specific behaviour is delegated to independently signed packages.
//! This crate discovers them, decides whether their code may run, loads the
//! four capability objects every content extension provides, and keeps an
//! ordered, immutable snapshot of the result up to date while packages are
//! installed, updated, and removed.
//!
//! # Architecture
//!
//! ```text
//! PackageEnvironment → Discovery → TrustEvaluator → ModuleLoader → Snapshot → ArchiveIndex
//!                          ▲                                          │
//!                 LifecycleWatcher (single consumer) ◄── LifecycleEvent queue
//! ```
//!
//! - [`ExtensionRegistry`] is a cheap, cloneable read handle. Every read is
//!   one atomic load of the current [`Snapshot`].
//! - [`LifecycleWatcher`] owns all writes. Events are processed one at a
//!   time; the next snapshot is built off to the side and published with a
//!   single swap before notifications go out. Module constructors run on
//!   the blocking pool and their results come back as later steps.
//! - [`ModuleLoader`] implementations turn a trusted descriptor into a
//!   [`CapabilityBundle`]. Failures, including panics in module code, end up
//!   as [`LoadError`] and never escape.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chanhost_extensions::prelude::*;
//!
//! # async fn example() -> ExtensionResult<()> {
//! let environment = Arc::new(DirectoryEnvironment::new(vec!["/opt/chanhost/extensions".into()]));
//! let loader = Arc::new(NativeModuleLoader::new());
//! let preferences = Arc::new(MemoryPreferences::new());
//!
//! let (registry, watcher) = RegistryBuilder::new(environment, loader, preferences).build();
//! tokio::spawn(watcher.run());
//! registry.settled().await?;
//!
//! let bundle = registry.get("foochan");
//! println!("fallback: {}", bundle.is_fallback());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod archive;
pub mod capability;
pub mod descriptor;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod event;
pub mod init;
pub mod lifecycle;
pub mod loader;
pub mod preferences;
pub mod registry;
pub mod snapshot;
pub mod trust;
pub mod watcher;

pub use archive::ArchiveIndex;
pub use capability::{
    Archivation, CapabilityBundle, CapabilityError, CapabilityResult, ChanConfiguration,
    ChanLocator, ChanMarkup, ChanPerformer,
};
pub use descriptor::{
    CapabilityClasses, ContentAttributes, ExtensionDescriptor, ExtensionKind, PackageVersion,
    TrustState,
};
pub use discovery::Discovery;
pub use environment::{DirectoryEnvironment, MetaValue, PackageEnvironment, PackageInfo};
pub use error::{ExtensionError, ExtensionResult};
pub use event::RegistryEvent;
pub use init::{BundleRef, InitError, InitHolder, Initializer, ResourceHandle, SharedClasses};
pub use lifecycle::{LifecycleEvent, LifecycleWatcher};
pub use loader::{
    BundleBuilder, CatalogModuleLoader, LoadError, MODULE_ABI_VERSION, ModuleCatalog,
    ModuleLoader, NativeModuleLoader, TEMPLATE_PARSER_CLASS,
};
pub use preferences::{
    FilePreferences, MemoryPreferences, OrderStore, PREFERENCES_FILE_NAME, Preferences,
    PreferencesFile, TrustGrant, TrustStore,
};
pub use registry::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REPLACE_TIMEOUT, ExtensionRegistry, RegistryBuilder,
};
pub use snapshot::{ExtensionEntry, Snapshot};
pub use trust::TrustEvaluator;
pub use watcher::{DirectoryWatcher, WatcherConfig};
