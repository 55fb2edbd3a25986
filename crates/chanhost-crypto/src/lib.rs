//! Chanhost Crypto - signer identity for extension packages.
//!
//! This crate provides:
//! - SHA-256 digests of raw signing-certificate blobs
//! - Fingerprints: the set of digests identifying who signed a package
//!
//! Two packages signed by the same certificates have equal fingerprints,
//! regardless of the order in which the certificates were reported.
//!
//! # Example
//!
//! ```
//! use chanhost_crypto::{CertificateDigest, Fingerprint};
//!
//! let fingerprint = Fingerprint::from_certificates([b"first cert".as_slice(), b"second cert"]);
//! assert_eq!(fingerprint.len(), 2);
//! assert!(fingerprint.contains(&CertificateDigest::of(b"first cert")));
//!
//! let parsed: Fingerprint = fingerprint.to_string().parse().unwrap();
//! assert_eq!(parsed, fingerprint);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod digest;
mod error;
mod fingerprint;

pub use digest::CertificateDigest;
pub use error::{CryptoError, CryptoResult};
pub use fingerprint::Fingerprint;
