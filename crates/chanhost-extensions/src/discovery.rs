//! Candidate discovery and metadata validation.
//!
//! Rules, in order; any failure drops the package with a logged reason:
//!
//! 1. the name matches `[a-z][a-z0-9]{3,14}`;
//! 2. the name is not reserved (content extensions additionally may not
//!    take a shared library name);
//! 3. no other package already claimed the name;
//! 4. content extensions declare all four capability classes;
//! 5. content extensions declare an integer API version. Versions outside
//!    the supported range keep the descriptor but mark it unsupported.

use std::collections::BTreeSet;

use chanhost_config::RegistrySection;
use chanhost_crypto::Fingerprint;
use tracing::{debug, info, warn};

use crate::descriptor::{
    CapabilityClasses, ContentAttributes, ExtensionDescriptor, ExtensionKind, PackageVersion,
    TrustState,
};
use crate::environment::PackageInfo;
use crate::error::{ExtensionError, ExtensionResult};

/// Feature marker of content extensions.
pub const FEATURE_CHAN_EXTENSION: &str = "chan.extension";
/// Feature marker of library extensions.
pub const FEATURE_LIB_EXTENSION: &str = "lib.extension";

/// Metadata keys.
pub mod meta {
    /// Content extension name.
    pub const CHAN_NAME: &str = "chan.extension.name";
    /// Content extension display title.
    pub const CHAN_TITLE: &str = "chan.extension.title";
    /// Content extension API version.
    pub const CHAN_VERSION: &str = "chan.extension.version";
    /// Content extension icon path.
    pub const CHAN_ICON: &str = "chan.extension.icon";
    /// Content extension update source.
    pub const CHAN_SOURCE: &str = "chan.extension.source";
    /// Configuration class.
    pub const CHAN_CLASS_CONFIGURATION: &str = "chan.extension.class.configuration";
    /// Performer class.
    pub const CHAN_CLASS_PERFORMER: &str = "chan.extension.class.performer";
    /// Locator class.
    pub const CHAN_CLASS_LOCATOR: &str = "chan.extension.class.locator";
    /// Markup class.
    pub const CHAN_CLASS_MARKUP: &str = "chan.extension.class.markup";
    /// Library extension name.
    pub const LIB_NAME: &str = "lib.extension.name";
    /// Library extension update source.
    pub const LIB_SOURCE: &str = "lib.extension.source";
}

/// Minimum and maximum length of an extension name.
const NAME_MIN_LEN: usize = 4;
const NAME_MAX_LEN: usize = 15;

/// Whether `name` is a syntactically valid extension name.
#[must_use]
pub fn is_valid_extension_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (NAME_MIN_LEN..=NAME_MAX_LEN).contains(&name.len())
        && first.is_ascii_lowercase()
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Qualify a class identifier starting with `.` against the package.
#[must_use]
pub fn qualify_class_name(class: &str, package: &str) -> String {
    if class.starts_with('.') {
        format!("{package}{class}")
    } else {
        class.to_owned()
    }
}

/// Reject `candidate` if a different package already owns its name.
///
/// # Errors
///
/// Returns [`ExtensionError::NameConflict`] on a conflict.
pub fn check_name_conflict<'a>(
    candidate: &ExtensionDescriptor,
    existing: impl IntoIterator<Item = &'a ExtensionDescriptor>,
) -> ExtensionResult<()> {
    match existing
        .into_iter()
        .find(|d| d.name == candidate.name && d.package != candidate.package)
    {
        Some(owner) => Err(ExtensionError::NameConflict {
            name: candidate.name.clone(),
            existing: owner.package.clone(),
            rejected: candidate.package.clone(),
        }),
        None => Ok(()),
    }
}

/// Turns environment packages into validated descriptors.
#[derive(Debug, Clone)]
pub struct Discovery {
    reserved_names: BTreeSet<String>,
    shared_library_names: BTreeSet<String>,
    min_api_version: i64,
    max_api_version: i64,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::from_config(&RegistrySection::default())
    }
}

impl Discovery {
    /// Discovery with the default reserved names and API range.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovery configured from the registry section.
    #[must_use]
    pub fn from_config(section: &RegistrySection) -> Self {
        Self {
            reserved_names: section.reserved_names.iter().cloned().collect(),
            shared_library_names: section.shared_library_names.iter().cloned().collect(),
            min_api_version: section.min_api_version,
            max_api_version: section.max_api_version,
        }
    }

    /// Set the supported API version range.
    #[must_use]
    pub fn with_api_range(mut self, min: i64, max: i64) -> Self {
        self.min_api_version = min;
        self.max_api_version = max;
        self
    }

    /// Reserve an additional name.
    #[must_use]
    pub fn with_reserved_name(mut self, name: impl Into<String>) -> Self {
        self.reserved_names.insert(name.into());
        self
    }

    /// Supported API version range.
    #[must_use]
    pub fn api_range(&self) -> (i64, i64) {
        (self.min_api_version, self.max_api_version)
    }

    /// Describe every extension package, in environment order.
    ///
    /// Invalid packages and name conflicts are logged and skipped. All
    /// descriptors start out [`TrustState::Untrusted`].
    #[must_use]
    pub fn scan(&self, packages: &[PackageInfo]) -> Vec<ExtensionDescriptor> {
        let mut accepted: Vec<ExtensionDescriptor> = Vec::new();

        for package in packages {
            let descriptor = match self.describe(package) {
                Ok(Some(d)) => d,
                Ok(None) => continue,
                Err(e) => {
                    warn!(package = %package.id, error = %e, "Dropping extension package");
                    continue;
                },
            };

            if let Err(e) = check_name_conflict(&descriptor, &accepted) {
                warn!(package = %package.id, error = %e, "Dropping extension package");
                continue;
            }

            // Same package listed twice: the later listing wins.
            if let Some(slot) = accepted.iter_mut().find(|d| d.package == descriptor.package) {
                *slot = descriptor;
            } else {
                accepted.push(descriptor);
            }
        }

        info!(count = accepted.len(), "Discovered extensions");
        accepted
    }

    /// Describe one package.
    ///
    /// Returns `Ok(None)` when the package carries no extension marker.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Metadata`] when a validation rule fails.
    pub fn describe(&self, package: &PackageInfo) -> ExtensionResult<Option<ExtensionDescriptor>> {
        let kind = if package.has_feature(FEATURE_CHAN_EXTENSION) {
            ExtensionKind::Content
        } else if package.has_feature(FEATURE_LIB_EXTENSION) {
            ExtensionKind::Library
        } else {
            return Ok(None);
        };

        let metadata_err = |message: String| ExtensionError::Metadata {
            package: package.id.clone(),
            message,
        };

        let name_key = match kind {
            ExtensionKind::Content => meta::CHAN_NAME,
            ExtensionKind::Library => meta::LIB_NAME,
        };
        let name = package
            .meta_str(name_key)
            .ok_or_else(|| metadata_err(format!("missing {name_key}")))?;
        if !is_valid_extension_name(name) {
            return Err(metadata_err(format!("invalid extension name '{name}'")));
        }
        if self.reserved_names.contains(name)
            || (kind == ExtensionKind::Content && self.shared_library_names.contains(name))
        {
            return Err(metadata_err(format!("reserved extension name '{name}'")));
        }

        let content = match kind {
            ExtensionKind::Content => Some(self.content_attributes(package, name)?),
            ExtensionKind::Library => None,
        };

        let update_source = match kind {
            ExtensionKind::Content => package.meta_str(meta::CHAN_SOURCE),
            ExtensionKind::Library => package.meta_str(meta::LIB_SOURCE),
        }
        .map(str::to_owned);

        let title = package
            .meta_str(meta::CHAN_TITLE)
            .filter(|t| kind == ExtensionKind::Content && !t.is_empty())
            .unwrap_or(name)
            .to_owned();

        let native_library_dir = package.native_library_dir.clone().filter(|dir| {
            let exists = dir.is_dir();
            if !exists {
                debug!(package = %package.id, path = %dir.display(), "Native library directory missing");
            }
            exists
        });

        Ok(Some(ExtensionDescriptor {
            kind,
            name: name.to_owned(),
            title,
            package: package.id.clone(),
            version: PackageVersion {
                name: package.version_name.clone(),
                code: package.version_code,
            },
            fingerprint: Fingerprint::from_certificates(&package.certificates),
            trust: TrustState::Untrusted,
            update_source,
            package_dir: package.package_dir.clone(),
            code_path: package.code_path.clone(),
            native_library_dir,
            content,
        }))
    }

    fn content_attributes(&self, package: &PackageInfo, name: &str) -> ExtensionResult<ContentAttributes> {
        let class = |key: &str| -> ExtensionResult<String> {
            package
                .meta_str(key)
                .filter(|c| !c.is_empty())
                .map(|c| qualify_class_name(c, &package.id))
                .ok_or_else(|| ExtensionError::Metadata {
                    package: package.id.clone(),
                    message: format!("undefined capability class {key}"),
                })
        };
        let classes = CapabilityClasses {
            configuration: class(meta::CHAN_CLASS_CONFIGURATION)?,
            performer: class(meta::CHAN_CLASS_PERFORMER)?,
            locator: class(meta::CHAN_CLASS_LOCATOR)?,
            markup: class(meta::CHAN_CLASS_MARKUP)?,
        };

        let api_version =
            package
                .meta_int(meta::CHAN_VERSION)
                .ok_or_else(|| ExtensionError::Metadata {
                    package: package.id.clone(),
                    message: format!("missing or non-integer {}", meta::CHAN_VERSION),
                })?;

        let supported = (self.min_api_version..=self.max_api_version).contains(&api_version);
        if !supported {
            let e = ExtensionError::UnsupportedVersion {
                name: name.to_owned(),
                version: api_version,
                min: self.min_api_version,
                max: self.max_api_version,
            };
            warn!(package = %package.id, error = %e, "Extension will not be loaded");
        }

        Ok(ContentAttributes {
            api_version,
            supported,
            icon: package.meta_str(meta::CHAN_ICON).map(str::to_owned),
            classes,
        })
    }
}
