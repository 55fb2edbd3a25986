//! Validated static metadata of discovered extensions.

use std::fmt;
use std::path::PathBuf;

use chanhost_crypto::Fingerprint;
use serde::Serialize;

/// What an extension package provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    /// A board capability bundle.
    Content,
    /// A shared native/runtime dependency with no capability bundle.
    Library,
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content => write!(f, "content"),
            Self::Library => write!(f, "library"),
        }
    }
}

/// Whether an extension's code may be instantiated.
///
/// Only `Untrusted → Trusted` and `Untrusted → Discarded` happen through a
/// decision. A reinstall with a different fingerprint starts over at
/// `Untrusted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustState {
    /// Waiting for a decision.
    Untrusted,
    /// Allowed to run.
    Trusted,
    /// Rejected by the user.
    Discarded,
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untrusted => write!(f, "untrusted"),
            Self::Trusted => write!(f, "trusted"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

/// Package version: display name plus monotonic code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageVersion {
    /// Human readable version.
    pub name: String,
    /// Monotonic version code.
    pub code: i64,
}

/// Fully qualified identifiers of the four capability constructors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityClasses {
    /// Configuration class.
    pub configuration: String,
    /// Performer class.
    pub performer: String,
    /// Locator class.
    pub locator: String,
    /// Markup class.
    pub markup: String,
}

/// Attributes only content extensions have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentAttributes {
    /// Declared extension API version.
    pub api_version: i64,
    /// Whether `api_version` is inside the host's supported range.
    pub supported: bool,
    /// Icon path, relative to the package directory.
    pub icon: Option<String>,
    /// Capability constructors.
    pub classes: CapabilityClasses,
}

/// One discovered, validated extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    /// Content or library.
    pub kind: ExtensionKind,
    /// Unique extension name.
    pub name: String,
    /// Display title.
    pub title: String,
    /// Owning package identity.
    pub package: String,
    /// Package version.
    pub version: PackageVersion,
    /// Signer fingerprint.
    pub fingerprint: Fingerprint,
    /// Current trust decision.
    pub trust: TrustState,
    /// Where updates are published.
    pub update_source: Option<String>,
    /// Package directory.
    pub package_dir: Option<PathBuf>,
    /// Code artifact to load.
    pub code_path: Option<PathBuf>,
    /// Bundled native library directory, if it exists.
    pub native_library_dir: Option<PathBuf>,
    /// Content-only attributes; `None` for libraries.
    pub content: Option<ContentAttributes>,
}

impl ExtensionDescriptor {
    /// Whether this is a content extension.
    #[must_use]
    pub fn is_content(&self) -> bool {
        self.kind == ExtensionKind::Content
    }

    /// Whether this is a content extension the host can load.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.content.as_ref().is_some_and(|c| c.supported)
    }

    /// Capability classes of a content extension.
    #[must_use]
    pub fn classes(&self) -> Option<&CapabilityClasses> {
        self.content.as_ref().map(|c| &c.classes)
    }

    /// Copy of this descriptor with a different trust state.
    #[must_use]
    pub fn with_trust(&self, trust: TrustState) -> Self {
        Self {
            trust,
            ..self.clone()
        }
    }

    /// Whether `other` describes the same package signed by the same signer.
    #[must_use]
    pub fn same_signer(&self, other: &Self) -> bool {
        self.package == other.package && self.fingerprint == other.fingerprint
    }
}
