//! Prelude module - commonly used types for convenient import.
//!
//! Use `use chanhost_crypto::prelude::*;` to import all essential types.

// Errors
pub use crate::{CryptoError, CryptoResult};

// Identity
pub use crate::{CertificateDigest, Fingerprint};
