//! Trust evaluation.
//!
//! A descriptor is trusted when it is signed by the host itself, or when
//! the user previously granted trust to exactly this package and signer.

use chanhost_crypto::Fingerprint;
use tracing::debug;

use crate::descriptor::{ExtensionDescriptor, TrustState};
use crate::preferences::TrustStore;

/// Decides the initial trust state of discovered descriptors.
#[derive(Debug, Clone, Default)]
pub struct TrustEvaluator {
    host: Fingerprint,
}

impl TrustEvaluator {
    /// Evaluator for a host signed with `host`.
    #[must_use]
    pub fn new(host: Fingerprint) -> Self {
        Self { host }
    }

    /// The host's own fingerprint.
    #[must_use]
    pub fn host_fingerprint(&self) -> &Fingerprint {
        &self.host
    }

    /// Trust state of `descriptor`.
    ///
    /// Grants are keyed on the package and the full fingerprint string, so a
    /// package re-signed with any other certificate set is untrusted again.
    #[must_use]
    pub fn evaluate(&self, descriptor: &ExtensionDescriptor, store: &dyn TrustStore) -> TrustState {
        if !self.host.is_empty() && descriptor.fingerprint == self.host {
            debug!(extension = %descriptor.name, "Extension signed by host");
            return TrustState::Trusted;
        }
        if store.is_trusted(&descriptor.package, &descriptor.fingerprint.to_string()) {
            return TrustState::Trusted;
        }
        TrustState::Untrusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ExtensionKind, PackageVersion};
    use crate::preferences::MemoryPreferences;

    fn library(certificate: &[u8]) -> ExtensionDescriptor {
        ExtensionDescriptor {
            kind: ExtensionKind::Library,
            name: "barlib".to_owned(),
            title: "barlib".to_owned(),
            package: "org.example.barlib".to_owned(),
            version: PackageVersion::default(),
            fingerprint: Fingerprint::from_certificates([certificate]),
            trust: TrustState::Untrusted,
            update_source: None,
            package_dir: None,
            code_path: None,
            native_library_dir: None,
            content: None,
        }
    }

    #[test]
    fn test_host_signed_is_trusted() {
        let evaluator = TrustEvaluator::new(Fingerprint::from_certificates([b"HOST".as_slice()]));
        let store = MemoryPreferences::new();
        assert_eq!(evaluator.evaluate(&library(b"HOST"), &store), TrustState::Trusted);
        assert_eq!(evaluator.evaluate(&library(b"OTHER"), &store), TrustState::Untrusted);
    }

    #[test]
    fn test_unsigned_host_trusts_nothing_implicitly() {
        let evaluator = TrustEvaluator::default();
        let mut descriptor = library(b"x");
        descriptor.fingerprint = Fingerprint::empty();
        assert_eq!(
            evaluator.evaluate(&descriptor, &MemoryPreferences::new()),
            TrustState::Untrusted
        );
    }

    #[test]
    fn test_grant_is_keyed_on_package_and_fingerprint() {
        let evaluator = TrustEvaluator::default();
        let store = MemoryPreferences::new();
        let signed_a = library(b"A");
        store
            .grant(&signed_a.package, &signed_a.fingerprint.to_string())
            .unwrap();

        assert_eq!(evaluator.evaluate(&signed_a, &store), TrustState::Trusted);
        assert_eq!(evaluator.evaluate(&library(b"B"), &store), TrustState::Untrusted);

        let mut other_package = library(b"A");
        other_package.package = "org.example.other".to_owned();
        assert_eq!(evaluator.evaluate(&other_package, &store), TrustState::Untrusted);
    }
}
