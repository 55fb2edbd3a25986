//! Staged assembly of a capability bundle.
//!
//! Each capability is constructed with its own [`InitHolder`] parked in the
//! [`Initializer`]. The holders share one unbound [`BundleRef`]; it is bound
//! only after all four objects exist and every `init` hook succeeded, so a
//! failed load never exposes a half-built bundle.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::capability::{CapabilityBundle, CapabilityError, CapabilityResult, LazyIcon};
use crate::descriptor::ExtensionDescriptor;
use crate::init::{BundleRef, InitError, InitHolder, Initializer, ResourceHandle};
use crate::loader::catalog::{Constructor, LayeredCatalog};
use crate::loader::{LoadError, ModuleCatalog, panic_message};

/// Builds one [`CapabilityBundle`] from a module catalog.
#[derive(Debug)]
pub struct BundleBuilder<'a> {
    descriptor: &'a ExtensionDescriptor,
    catalog: LayeredCatalog<'a>,
    initializer: Initializer,
    bundle: BundleRef,
}

impl<'a> BundleBuilder<'a> {
    /// Builder resolving classes from `module`, then `host`.
    #[must_use]
    pub fn new(
        descriptor: &'a ExtensionDescriptor,
        module: &'a ModuleCatalog,
        host: &'a ModuleCatalog,
    ) -> Self {
        Self {
            descriptor,
            catalog: LayeredCatalog::new(module, host),
            initializer: Initializer::new(),
            bundle: BundleRef::default(),
        }
    }

    /// Construct, initialize, and freeze the bundle.
    ///
    /// # Errors
    ///
    /// Returns the first construction or initialization failure. Panics in
    /// module code are caught and reported as [`LoadError::Panicked`].
    pub fn build(self) -> Result<Arc<CapabilityBundle>, LoadError> {
        let descriptor = self.descriptor;
        let classes = descriptor
            .classes()
            .filter(|_| descriptor.is_supported())
            .ok_or(LoadError::NotLoadable)?;

        let configuration = self.construct(
            &classes.configuration,
            "configuration",
            self.catalog.configuration(&classes.configuration),
        )?;
        let performer = self.construct(
            &classes.performer,
            "performer",
            self.catalog.performer(&classes.performer),
        )?;
        let locator = self.construct(
            &classes.locator,
            "locator",
            self.catalog.locator(&classes.locator),
        )?;
        let markup = self.construct(
            &classes.markup,
            "markup",
            self.catalog.markup(&classes.markup),
        )?;

        run_init(&classes.configuration, || configuration.init())?;
        run_init(&classes.performer, || performer.init())?;
        run_init(&classes.locator, || locator.init())?;
        run_init(&classes.markup, || markup.init())?;

        let bundle = Arc::new(CapabilityBundle::new(
            descriptor.name.clone(),
            configuration,
            performer,
            locator,
            markup,
            LazyIcon::new(self.icon_path()),
        ));
        if !self.bundle.bind(&bundle) {
            warn!(extension = %descriptor.name, "Bundle reference was already bound");
        }
        // Cache module answers while still on the loading thread.
        let _ = bundle.archivation();
        debug!(extension = %descriptor.name, "Capability bundle assembled");
        Ok(bundle)
    }

    fn holder(&self) -> InitHolder {
        InitHolder {
            extension_name: self.descriptor.name.clone(),
            bundle: self.bundle.clone(),
            resources: ResourceHandle {
                package: self.descriptor.package.clone(),
                package_dir: self.descriptor.package_dir.clone(),
                code_path: self.descriptor.code_path.clone(),
                native_library_dir: self.descriptor.native_library_dir.clone(),
            },
            shared: self.catalog.shared(),
        }
    }

    fn icon_path(&self) -> Option<PathBuf> {
        let icon = self.descriptor.content.as_ref()?.icon.as_deref()?;
        Some(match &self.descriptor.package_dir {
            Some(dir) => dir.join(icon),
            None => PathBuf::from(icon),
        })
    }

    fn construct<T: ?Sized>(
        &self,
        class: &str,
        role: &'static str,
        ctor: Option<Constructor<T>>,
    ) -> Result<Box<T>, LoadError> {
        let ctor = ctor.ok_or_else(|| LoadError::MissingClass {
            class: class.to_owned(),
            role,
        })?;

        let holder = self.holder();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.initializer.scope(holder, |init| ctor(init))
        }));

        match outcome {
            Ok(Ok(object)) => Ok(object),
            Ok(Err(e)) => Err(construction_error(class, e)),
            Err(payload) => Err(LoadError::Panicked {
                class: class.to_owned(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn construction_error(class: &str, error: CapabilityError) -> LoadError {
    match error.downcast::<InitError>() {
        Ok(misuse) => LoadError::Initializer {
            class: class.to_owned(),
            source: *misuse,
        },
        Err(other) => LoadError::Construction {
            class: class.to_owned(),
            message: other.to_string(),
        },
    }
}

fn run_init(class: &str, init: impl FnOnce() -> CapabilityResult<()>) -> Result<(), LoadError> {
    match catch_unwind(AssertUnwindSafe(init)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(LoadError::Init {
            class: class.to_owned(),
            message: e.to_string(),
        }),
        Err(payload) => Err(LoadError::Panicked {
            class: class.to_owned(),
            message: panic_message(payload.as_ref()),
        }),
    }
}
