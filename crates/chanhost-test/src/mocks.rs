//! Mock extension modules and notification recorders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chanhost_events::{Event, EventSubscriber};
use chanhost_extensions::{
    Archivation, CapabilityResult, ChanConfiguration, ChanLocator, ChanMarkup, ChanPerformer,
    InitHolder, ModuleCatalog, RegistryEvent, TEMPLATE_PARSER_CLASS,
};

/// What a [`MockModule`] should get wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Fault {
    #[default]
    None,
    /// No markup constructor is registered.
    MissingMarkup,
    /// The locator constructor returns an error.
    ConstructorError,
    /// The performer constructor panics.
    ConstructorPanic,
    /// The configuration asks for its holder twice.
    ConsumeTwice,
    /// `ChanConfiguration::init` fails.
    InitError,
}

/// A fake extension module.
///
/// [`catalog`](Self::catalog) registers constructors for the classes that
/// [`PackageBuilder::content`](crate::PackageBuilder::content) declares.
/// Clones share the construction counter.
#[derive(Debug, Clone)]
pub struct MockModule {
    package: String,
    archive_hosts: Vec<String>,
    hosts: Vec<String>,
    local_mode: bool,
    fault: Fault,
    construct_delay: Option<Duration>,
    bundles_parser: bool,
    constructed: Arc<AtomicUsize>,
    resolved_parser: Arc<Mutex<Option<String>>>,
}

impl MockModule {
    /// A well-behaved module for `package`.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            archive_hosts: Vec::new(),
            hosts: Vec::new(),
            local_mode: false,
            fault: Fault::None,
            construct_delay: None,
            bundles_parser: false,
            constructed: Arc::new(AtomicUsize::new(0)),
            resolved_parser: Arc::default(),
        }
    }

    /// Hosts the locator claims.
    #[must_use]
    pub fn serving(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    /// Hosts the configuration can archive.
    #[must_use]
    pub fn archiving(mut self, host: impl Into<String>) -> Self {
        self.archive_hosts.push(host.into());
        self
    }

    /// Mark the configuration as purely local.
    #[must_use]
    pub fn local_mode(mut self) -> Self {
        self.local_mode = true;
        self
    }

    /// Omit the markup constructor.
    #[must_use]
    pub fn missing_markup(self) -> Self {
        self.with_fault(Fault::MissingMarkup)
    }

    /// Make the locator constructor fail.
    #[must_use]
    pub fn failing_constructor(self) -> Self {
        self.with_fault(Fault::ConstructorError)
    }

    /// Make the performer constructor panic.
    #[must_use]
    pub fn panicking_constructor(self) -> Self {
        self.with_fault(Fault::ConstructorPanic)
    }

    /// Make the configuration consume its initializer holder twice.
    #[must_use]
    pub fn consuming_twice(self) -> Self {
        self.with_fault(Fault::ConsumeTwice)
    }

    /// Make configuration init fail.
    #[must_use]
    pub fn failing_init(self) -> Self {
        self.with_fault(Fault::InitError)
    }

    /// Make the configuration constructor block its thread for `delay`.
    #[must_use]
    pub fn blocking_constructor(mut self, delay: Duration) -> Self {
        self.construct_delay = Some(delay);
        self
    }

    /// Ship the module's own [`MockTemplateParser`].
    #[must_use]
    pub fn bundling_template_parser(mut self) -> Self {
        self.bundles_parser = true;
        self
    }

    fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }

    /// Number of configuration objects constructed so far.
    #[must_use]
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    /// Origin of the template parser the configuration constructor
    /// resolved, if any.
    #[must_use]
    pub fn resolved_parser(&self) -> Option<String> {
        self.resolved_parser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fully qualified class id for `role` (`"Configuration"`, ...).
    #[must_use]
    pub fn class(&self, role: &str) -> String {
        format!("{}.{role}", self.package)
    }

    /// Constructor catalog for this module.
    #[must_use]
    pub fn catalog(&self) -> ModuleCatalog {
        let mut catalog = ModuleCatalog::new();

        let config = self.clone();
        catalog.register_configuration(self.class("Configuration"), move |init| {
            let holder = init.consume()?;
            if config.fault == Fault::ConsumeTwice {
                init.consume()?;
            }
            if let Some(delay) = config.construct_delay {
                std::thread::sleep(delay);
            }
            if let Some(parser) = holder.resolve_shared::<MockTemplateParser>(TEMPLATE_PARSER_CLASS) {
                *config
                    .resolved_parser
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(parser.origin().to_owned());
            }
            config.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(MockConfiguration {
                holder,
                archive_hosts: config.archive_hosts.clone(),
                local_mode: config.local_mode,
                fail_init: config.fault == Fault::InitError,
            })
        });

        let fault = self.fault;
        catalog.register_performer(self.class("Performer"), move |_| {
            if fault == Fault::ConstructorPanic {
                panic!("mock performer constructor panicked");
            }
            Ok(MockPerformer)
        });

        let hosts = self.hosts.clone();
        catalog.register_locator(self.class("Locator"), move |_| {
            if fault == Fault::ConstructorError {
                return Err("mock locator refused to construct".into());
            }
            Ok(MockLocator {
                hosts: hosts.clone(),
            })
        });

        if self.fault != Fault::MissingMarkup {
            catalog.register_markup(self.class("Markup"), |_| Ok(MockMarkup));
        }

        if self.bundles_parser {
            catalog.register_shared(TEMPLATE_PARSER_CLASS, MockTemplateParser::new(&self.package));
        }

        catalog
    }
}

/// Template parser shared through [`TEMPLATE_PARSER_CLASS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTemplateParser {
    origin: String,
}

impl MockTemplateParser {
    /// Parser tagged with where it came from.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    /// Who registered this parser.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// Configuration built by [`MockModule`].
#[derive(Debug)]
pub struct MockConfiguration {
    holder: InitHolder,
    archive_hosts: Vec<String>,
    local_mode: bool,
    fail_init: bool,
}

impl MockConfiguration {
    /// Holder received during construction.
    #[must_use]
    pub fn holder(&self) -> &InitHolder {
        &self.holder
    }
}

impl ChanConfiguration for MockConfiguration {
    fn init(&self) -> CapabilityResult<()> {
        if self.fail_init {
            return Err(format!("{} refused to initialize", self.holder.extension_name).into());
        }
        Ok(())
    }

    fn archivation(&self) -> CapabilityResult<Option<Archivation>> {
        if self.archive_hosts.is_empty() {
            return Ok(None);
        }
        Ok(Some(Archivation {
            hosts: self.archive_hosts.clone(),
            ..Archivation::default()
        }))
    }

    fn is_local_mode(&self) -> bool {
        self.local_mode
    }
}

/// Performer built by [`MockModule`].
#[derive(Debug)]
pub struct MockPerformer;

impl ChanPerformer for MockPerformer {}

/// Locator built by [`MockModule`].
#[derive(Debug)]
pub struct MockLocator {
    hosts: Vec<String>,
}

impl ChanLocator for MockLocator {
    fn is_chan_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }
}

/// Markup built by [`MockModule`].
#[derive(Debug)]
pub struct MockMarkup;

impl ChanMarkup for MockMarkup {}

// ---------------------------------------------------------------------------
// RecordingSubscriber
// ---------------------------------------------------------------------------

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Event type string.
    pub event_type: &'static str,
    /// Extension the event is about.
    pub extension: Option<String>,
}

impl RecordedEvent {
    /// Recorded event with an extension name.
    #[must_use]
    pub fn new(event_type: &'static str, extension: &str) -> Self {
        Self {
            event_type,
            extension: Some(extension.to_owned()),
        }
    }
}

/// Subscriber that records every registry notification.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSubscriber {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingSubscriber {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events of one type, by extension name.
    #[must_use]
    pub fn names_of(&self, event_type: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .filter_map(|e| e.extension)
            .collect()
    }

    /// Number of recorded events of one type.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSubscriber<RegistryEvent> for RecordingSubscriber {
    fn on_event(&self, event: &RegistryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                event_type: event.event_type(),
                extension: event.extension_name().map(str::to_owned),
            });
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_registers_all_roles() {
        let module = MockModule::new("org.example.foochan");
        let catalog = module.catalog();
        assert_eq!(catalog.len(), 4);
        for role in ["Configuration", "Performer", "Locator", "Markup"] {
            assert!(catalog.contains(&module.class(role)), "{role}");
        }
    }

    #[test]
    fn test_missing_markup() {
        let module = MockModule::new("org.example.foochan").missing_markup();
        let catalog = module.catalog();
        assert_eq!(catalog.len(), 3);
        assert!(!catalog.contains(&module.class("Markup")));
    }

    #[test]
    fn test_bundled_parser_is_shared() {
        let module = MockModule::new("org.example.foochan").bundling_template_parser();
        let catalog = module.catalog();
        assert_eq!(catalog.len(), 5);
        assert!(catalog.contains(TEMPLATE_PARSER_CLASS));
    }

    #[test]
    fn test_clones_share_counter() {
        let module = MockModule::new("p");
        let clone = module.clone();
        clone.constructed.fetch_add(1, Ordering::SeqCst);
        assert_eq!(module.constructed(), 1);
    }
}
