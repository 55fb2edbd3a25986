//! Dynamic-library modules.
//!
//! A module library exports two symbols, normally via [`declare_module!`]:
//!
//! - `chanhost_module_abi_version`: `extern "C" fn() -> u32`, compared
//!   against [`MODULE_ABI_VERSION`];
//! - `chanhost_module_register`: `fn(&mut ModuleCatalog)`, which fills in
//!   the module's constructors.
//!
//! The catalog crosses the boundary as a Rust type, so modules must be
//! built with the same toolchain and `chanhost-extensions` version as the
//! host. Libraries are opened once per path and never closed: capability
//! objects handed out earlier may still point into their code. A library
//! that changes on disk after it was opened fails to load with
//! [`LoadError::LibraryReplaced`] until the host restarts.
//!
//! [`declare_module!`]: crate::declare_module

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

use crate::capability::CapabilityBundle;
use crate::descriptor::ExtensionDescriptor;
use crate::loader::{
    BundleBuilder, LoadError, MODULE_ABI_VERSION, ModuleCatalog, ModuleLoader, panic_message,
};

/// Symbol reporting the module's ABI version.
pub const ABI_VERSION_SYMBOL: &[u8] = b"chanhost_module_abi_version";

/// Symbol registering the module's constructors.
pub const REGISTER_SYMBOL: &[u8] = b"chanhost_module_register";

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type RegisterFn = unsafe fn(&mut ModuleCatalog);

struct OpenedModule {
    modified: Option<SystemTime>,
    catalog: Arc<ModuleCatalog>,
}

/// Loads modules from the descriptor's code artifact.
#[derive(Default)]
pub struct NativeModuleLoader {
    opened: Mutex<HashMap<PathBuf, OpenedModule>>,
    host: ModuleCatalog,
}

impl NativeModuleLoader {
    /// Loader with an empty host catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with `host` as the shared host catalog.
    #[must_use]
    pub fn with_host(host: ModuleCatalog) -> Self {
        Self {
            opened: Mutex::default(),
            host,
        }
    }

    /// Number of libraries opened so far.
    #[must_use]
    pub fn opened_count(&self) -> usize {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn catalog(&self, path: &Path) -> Result<Arc<ModuleCatalog>, LoadError> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(module) = opened.get(path) {
            if module.modified != modified {
                warn!(path = %path.display(), "Module library changed on disk after it was opened");
                return Err(LoadError::LibraryReplaced {
                    path: path.to_path_buf(),
                });
            }
            return Ok(Arc::clone(&module.catalog));
        }

        let catalog = Arc::new(open_library(path)?);
        opened.insert(
            path.to_path_buf(),
            OpenedModule {
                modified,
                catalog: Arc::clone(&catalog),
            },
        );
        Ok(catalog)
    }
}

impl std::fmt::Debug for NativeModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeModuleLoader")
            .field("opened", &self.opened_count())
            .field("host", &self.host)
            .finish()
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn load(&self, descriptor: &ExtensionDescriptor) -> Result<Arc<CapabilityBundle>, LoadError> {
        let path = descriptor
            .code_path
            .as_deref()
            .ok_or_else(|| LoadError::NoCode {
                name: descriptor.name.clone(),
            })?;
        let module = self.catalog(path)?;
        BundleBuilder::new(descriptor, &module, &self.host).build()
    }
}

fn library_error(path: &Path, message: impl std::fmt::Display) -> LoadError {
    LoadError::Library {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn open_library(path: &Path) -> Result<ModuleCatalog, LoadError> {
    // SAFETY: loading a library runs its initializers. Only trusted
    // packages reach this point.
    let library = unsafe { Library::new(path) }.map_err(|e| library_error(path, e))?;

    let mut catalog = ModuleCatalog::new();
    {
        // SAFETY: the symbol type matches the one `declare_module!` emits.
        let abi_version: Symbol<'_, AbiVersionFn> = unsafe { library.get(ABI_VERSION_SYMBOL) }
            .map_err(|e| library_error(path, format!("missing ABI version symbol: {e}")))?;
        // SAFETY: takes no arguments and only returns a constant.
        let found = unsafe { abi_version() };
        if found != MODULE_ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                path: path.to_path_buf(),
                expected: MODULE_ABI_VERSION,
                found,
            });
        }

        // SAFETY: the ABI version matched, so the catalog layout agrees.
        let register: Symbol<'_, RegisterFn> = unsafe { library.get(REGISTER_SYMBOL) }
            .map_err(|e| library_error(path, format!("missing register symbol: {e}")))?;
        catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: see above.
            unsafe { register(&mut catalog) }
        }))
        .map_err(|payload| LoadError::Panicked {
            class: path.display().to_string(),
            message: panic_message(payload.as_ref()),
        })?;
    }

    info!(
        path = %path.display(),
        constructors = catalog.len(),
        "Opened module library"
    );
    debug!(catalog = ?catalog, "Module catalog");

    // Never unloaded; constructors and vtables live in the library.
    std::mem::forget(library);
    Ok(catalog)
}

/// Export the entry points the native loader looks for.
///
/// ```rust,ignore
/// fn register(catalog: &mut chanhost_extensions::ModuleCatalog) {
///     catalog.register_configuration(".Configuration", |init| { /* … */ });
/// }
///
/// chanhost_extensions::declare_module!(register);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($register:path) => {
        /// Module ABI version.
        #[unsafe(no_mangle)]
        pub extern "C" fn chanhost_module_abi_version() -> u32 {
            $crate::MODULE_ABI_VERSION
        }

        /// Register this module's constructors.
        #[unsafe(no_mangle)]
        pub fn chanhost_module_register(catalog: &mut $crate::ModuleCatalog) {
            $register(catalog);
        }
    };
}

#[cfg(test)]
mod tests {
    use chanhost_crypto::Fingerprint;

    use super::*;
    use crate::descriptor::{
        CapabilityClasses, ContentAttributes, ExtensionKind, PackageVersion, TrustState,
    };

    fn descriptor(code_path: Option<PathBuf>) -> ExtensionDescriptor {
        ExtensionDescriptor {
            kind: ExtensionKind::Content,
            name: "foochan".to_owned(),
            title: "foochan".to_owned(),
            package: "org.example.foochan".to_owned(),
            version: PackageVersion::default(),
            fingerprint: Fingerprint::empty(),
            trust: TrustState::Trusted,
            update_source: None,
            package_dir: None,
            code_path,
            native_library_dir: None,
            content: Some(ContentAttributes {
                api_version: 1,
                supported: true,
                icon: None,
                classes: CapabilityClasses {
                    configuration: "a".to_owned(),
                    performer: "b".to_owned(),
                    locator: "c".to_owned(),
                    markup: "d".to_owned(),
                },
            }),
        }
    }

    #[test]
    fn test_no_code_path() {
        let err = NativeModuleLoader::new().load(&descriptor(None)).unwrap_err();
        assert!(matches!(err, LoadError::NoCode { .. }));
    }

    #[test]
    fn test_missing_library() {
        let loader = NativeModuleLoader::new();
        let err = loader
            .load(&descriptor(Some(PathBuf::from("/nonexistent/libfoochan.so"))))
            .unwrap_err();
        assert!(matches!(err, LoadError::Library { .. }));
        assert_eq!(loader.opened_count(), 0);
    }

    #[test]
    fn test_rewritten_library_requires_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libfoochan.so");
        std::fs::write(&path, b"v1").unwrap();
        let opened_at = std::fs::metadata(&path).unwrap().modified().ok();

        let loader = NativeModuleLoader::new();
        loader.opened.lock().unwrap().insert(
            path.clone(),
            OpenedModule {
                modified: opened_at,
                catalog: Arc::new(ModuleCatalog::new()),
            },
        );

        // Unchanged: served from the cache, then fails on the empty catalog.
        let err = loader.load(&descriptor(Some(path.clone()))).unwrap_err();
        assert!(matches!(err, LoadError::MissingClass { .. }));
        assert!(!err.requires_restart());

        std::fs::write(&path, b"v2").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(86_400))
            .unwrap();

        let err = loader.load(&descriptor(Some(path.clone()))).unwrap_err();
        assert!(matches!(err, LoadError::LibraryReplaced { ref path } if path.ends_with("libfoochan.so")));
        assert!(err.requires_restart());
        assert_eq!(loader.opened_count(), 1);
    }

    #[test]
    fn test_not_a_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libfoochan.so");
        std::fs::write(&path, b"definitely not ELF").unwrap();
        let err = NativeModuleLoader::new()
            .load(&descriptor(Some(path)))
            .unwrap_err();
        assert!(matches!(err, LoadError::Library { .. }));
    }
}
