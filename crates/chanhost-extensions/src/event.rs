//! Change notifications published by the lifecycle task.
//!
//! Every notification is published after the snapshot reflecting it has
//! been swapped in, so handlers reading the registry see the change.

use std::sync::Arc;

use chanhost_events::{Event, EventMetadata};

use crate::capability::CapabilityBundle;

/// Source tag of registry notifications.
pub(crate) const EVENT_SOURCE: &str = "chanhost-extensions";

/// A registry change.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A capability bundle became available.
    Installed {
        /// Event metadata.
        metadata: EventMetadata,
        /// The new bundle.
        bundle: Arc<CapabilityBundle>,
    },

    /// A capability bundle stopped being available.
    Uninstalled {
        /// Event metadata.
        metadata: EventMetadata,
        /// The bundle that went away.
        bundle: Arc<CapabilityBundle>,
    },

    /// An extension is waiting for a trust decision.
    UntrustedPending {
        /// Event metadata.
        metadata: EventMetadata,
        /// Extension name.
        name: String,
    },

    /// The restart-required flag changed.
    RestartRequiredChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// New value. Only ever `true`.
        restart_required: bool,
    },
}

impl RegistryEvent {
    pub(crate) fn installed(bundle: Arc<CapabilityBundle>) -> Self {
        Self::Installed {
            metadata: EventMetadata::new(EVENT_SOURCE),
            bundle,
        }
    }

    pub(crate) fn uninstalled(bundle: Arc<CapabilityBundle>) -> Self {
        Self::Uninstalled {
            metadata: EventMetadata::new(EVENT_SOURCE),
            bundle,
        }
    }

    pub(crate) fn untrusted_pending(name: impl Into<String>) -> Self {
        Self::UntrustedPending {
            metadata: EventMetadata::new(EVENT_SOURCE),
            name: name.into(),
        }
    }

    pub(crate) fn restart_required() -> Self {
        Self::RestartRequiredChanged {
            metadata: EventMetadata::new(EVENT_SOURCE),
            restart_required: true,
        }
    }

    /// Event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::Installed { metadata, .. }
            | Self::Uninstalled { metadata, .. }
            | Self::UntrustedPending { metadata, .. }
            | Self::RestartRequiredChanged { metadata, .. } => metadata,
        }
    }

    /// Name of the extension the event is about, if any.
    #[must_use]
    pub fn extension_name(&self) -> Option<&str> {
        match self {
            Self::Installed { bundle, .. } | Self::Uninstalled { bundle, .. } => bundle.name(),
            Self::UntrustedPending { name, .. } => Some(name),
            Self::RestartRequiredChanged { .. } => None,
        }
    }
}

impl Event for RegistryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Installed { .. } => "extension_installed",
            Self::Uninstalled { .. } => "extension_uninstalled",
            Self::UntrustedPending { .. } => "extension_untrusted_pending",
            Self::RestartRequiredChanged { .. } => "restart_required_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let pending = RegistryEvent::untrusted_pending("foochan");
        assert_eq!(pending.event_type(), "extension_untrusted_pending");
        assert_eq!(pending.extension_name(), Some("foochan"));
        assert_eq!(pending.metadata().source, EVENT_SOURCE);

        let restart = RegistryEvent::restart_required();
        assert_eq!(restart.extension_name(), None);
        assert!(matches!(
            restart,
            RegistryEvent::RestartRequiredChanged {
                restart_required: true,
                ..
            }
        ));

        let fallback = RegistryEvent::installed(Arc::new(CapabilityBundle::fallback()));
        assert_eq!(fallback.event_type(), "extension_installed");
        assert_eq!(fallback.extension_name(), None);
    }
}
