//! Package signer fingerprints.
//!
//! A fingerprint is the set of certificate digests a package was signed
//! with. Equality is set equality, and the canonical string form joins the
//! sorted hex digests with `.` so that it can be persisted as a trust key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::digest::CertificateDigest;
use crate::error::{CryptoError, CryptoResult};

/// Separator between digests in the canonical string form.
const SEPARATOR: char = '.';

/// Immutable set of signing-certificate digests.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint(BTreeSet<CertificateDigest>);

impl Fingerprint {
    /// Compute a fingerprint from raw certificate blobs.
    ///
    /// Duplicate certificates collapse into one digest.
    #[must_use]
    pub fn from_certificates<I, C>(certificates: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self(
            certificates
                .into_iter()
                .map(|cert| CertificateDigest::of(cert.as_ref()))
                .collect(),
        )
    }

    /// Build a fingerprint from already computed digests.
    #[must_use]
    pub fn from_digests(digests: impl IntoIterator<Item = CertificateDigest>) -> Self {
        Self(digests.into_iter().collect())
    }

    /// An empty fingerprint (unsigned package).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of distinct digests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no certificate contributed to this fingerprint.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the fingerprint contains the given digest.
    #[must_use]
    pub fn contains(&self, digest: &CertificateDigest) -> bool {
        self.0.contains(digest)
    }

    /// Iterate over the digests in sorted order.
    pub fn digests(&self) -> impl Iterator<Item = &CertificateDigest> {
        self.0.iter()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fingerprint").field(&self.0).finish()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, digest) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for Fingerprint {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        if s.is_empty() {
            return Ok(Self::empty());
        }
        s.split(SEPARATOR)
            .map(|segment| {
                if segment.is_empty() {
                    Err(CryptoError::EmptySegment)
                } else {
                    CertificateDigest::from_hex(segment)
                }
            })
            .collect::<CryptoResult<BTreeSet<_>>>()
            .map(Self)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
