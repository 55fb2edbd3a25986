//! The four capability contracts and the bundle that holds them.
//!
//! The registry does not implement board behaviour. It only constructs,
//! verifies, and hands out instances of these traits. Each trait carries
//! the small part of its contract the registry itself consumes.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

/// Error type returned by capability code.
pub type CapabilityError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by capability code.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Archival settings declared by a content extension.
///
/// `hosts` are the hosts whose content this extension can mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archivation {
    /// Mirror target hosts.
    pub hosts: Vec<String>,
    /// Free-form archival options (key, value).
    pub options: Vec<(String, String)>,
    /// Whether the archive only answers queries and cannot store new content.
    pub query_only: bool,
}

/// Board configuration rules.
pub trait ChanConfiguration: Send + Sync {
    /// Finalization hook, called once all four capabilities exist.
    ///
    /// # Errors
    ///
    /// Any error aborts the load of the whole bundle.
    fn init(&self) -> CapabilityResult<()> {
        Ok(())
    }

    /// Archival settings, if this board can archive others.
    ///
    /// # Errors
    ///
    /// Errors are treated as "no archival settings".
    fn archivation(&self) -> CapabilityResult<Option<Archivation>> {
        Ok(None)
    }

    /// Whether the board works purely locally and cannot be archived.
    fn is_local_mode(&self) -> bool {
        false
    }
}

/// Network performer.
pub trait ChanPerformer: Send + Sync {
    /// Finalization hook, called once all four capabilities exist.
    ///
    /// # Errors
    ///
    /// Any error aborts the load of the whole bundle.
    fn init(&self) -> CapabilityResult<()> {
        Ok(())
    }
}

/// URL locator.
pub trait ChanLocator: Send + Sync {
    /// Finalization hook, called once all four capabilities exist.
    ///
    /// # Errors
    ///
    /// Any error aborts the load of the whole bundle.
    fn init(&self) -> CapabilityResult<()> {
        Ok(())
    }

    /// Whether `host` belongs to this board.
    fn is_chan_host(&self, host: &str) -> bool {
        let _ = host;
        false
    }
}

/// Markup rules.
pub trait ChanMarkup: Send + Sync {
    /// Finalization hook, called once all four capabilities exist.
    ///
    /// # Errors
    ///
    /// Any error aborts the load of the whole bundle.
    fn init(&self) -> CapabilityResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fallback capabilities
// ---------------------------------------------------------------------------

struct FallbackConfiguration;
impl ChanConfiguration for FallbackConfiguration {}

struct FallbackPerformer;
impl ChanPerformer for FallbackPerformer {}

struct FallbackLocator;
impl ChanLocator for FallbackLocator {}

struct FallbackMarkup;
impl ChanMarkup for FallbackMarkup {}

// ---------------------------------------------------------------------------
// Icon
// ---------------------------------------------------------------------------

/// Icon resource read on first access.
///
/// A missing or unreadable file resolves to `None` and is never an error.
pub(crate) struct LazyIcon {
    path: Option<PathBuf>,
    data: OnceLock<Option<Arc<[u8]>>>,
}

impl LazyIcon {
    pub(crate) fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            data: OnceLock::new(),
        }
    }

    fn get(&self) -> Option<Arc<[u8]>> {
        self.data
            .get_or_init(|| {
                let path = self.path.as_ref()?;
                match std::fs::read(path) {
                    Ok(bytes) => Some(Arc::from(bytes)),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Extension icon unavailable");
                        None
                    },
                }
            })
            .clone()
    }
}

// ---------------------------------------------------------------------------
// CapabilityBundle
// ---------------------------------------------------------------------------

/// The four capability objects of one loaded content extension.
///
/// Bundles are immutable once built. The fallback bundle has no extension
/// name and inert capabilities; [`ExtensionRegistry::get`] returns it for
/// unknown or unloaded names so that callers never see `None`.
///
/// [`ExtensionRegistry::get`]: crate::ExtensionRegistry::get
pub struct CapabilityBundle {
    name: Option<String>,
    configuration: Box<dyn ChanConfiguration>,
    performer: Box<dyn ChanPerformer>,
    locator: Box<dyn ChanLocator>,
    markup: Box<dyn ChanMarkup>,
    icon: LazyIcon,
    archivation: OnceLock<Option<Archivation>>,
}

impl CapabilityBundle {
    pub(crate) fn new(
        name: String,
        configuration: Box<dyn ChanConfiguration>,
        performer: Box<dyn ChanPerformer>,
        locator: Box<dyn ChanLocator>,
        markup: Box<dyn ChanMarkup>,
        icon: LazyIcon,
    ) -> Self {
        Self {
            name: Some(name),
            configuration,
            performer,
            locator,
            markup,
            icon,
            archivation: OnceLock::new(),
        }
    }

    /// The bundle handed out when no extension is available.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            name: None,
            configuration: Box::new(FallbackConfiguration),
            performer: Box::new(FallbackPerformer),
            locator: Box::new(FallbackLocator),
            markup: Box::new(FallbackMarkup),
            icon: LazyIcon::new(None),
            archivation: OnceLock::new(),
        }
    }

    /// Extension name, or `None` for the fallback bundle.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this is the fallback bundle.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.name.is_none()
    }

    /// Configuration capability.
    #[must_use]
    pub fn configuration(&self) -> &dyn ChanConfiguration {
        self.configuration.as_ref()
    }

    /// Performer capability.
    #[must_use]
    pub fn performer(&self) -> &dyn ChanPerformer {
        self.performer.as_ref()
    }

    /// Locator capability.
    #[must_use]
    pub fn locator(&self) -> &dyn ChanLocator {
        self.locator.as_ref()
    }

    /// Markup capability.
    #[must_use]
    pub fn markup(&self) -> &dyn ChanMarkup {
        self.markup.as_ref()
    }

    /// Archival settings, asked of the configuration once and cached.
    ///
    /// A failing or panicking query counts as "no archivation".
    #[must_use]
    pub fn archivation(&self) -> Option<&Archivation> {
        self.archivation
            .get_or_init(|| {
                let name = self.name.as_deref().unwrap_or_default();
                match catch_unwind(AssertUnwindSafe(|| self.configuration.archivation())) {
                    Ok(Ok(archivation)) => archivation,
                    Ok(Err(e)) => {
                        warn!(extension = %name, error = %e, "Archivation query failed");
                        None
                    },
                    Err(_) => {
                        warn!(extension = %name, "Archivation query panicked");
                        None
                    },
                }
            })
            .as_ref()
    }

    /// Icon bytes, read lazily. `None` when the extension has no icon.
    #[must_use]
    pub fn icon(&self) -> Option<Arc<[u8]>> {
        self.icon.get()
    }
}

impl fmt::Debug for CapabilityBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBundle")
            .field("name", &self.name)
            .field("icon", &self.icon.path)
            .finish_non_exhaustive()
    }
}
