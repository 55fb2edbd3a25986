//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur while decoding digests and fingerprints.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Invalid hex encoding.
    #[error("invalid hex encoding")]
    InvalidHexEncoding,

    /// Invalid digest length.
    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidDigestLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// A fingerprint string contained an empty segment.
    #[error("empty digest segment in fingerprint")]
    EmptySegment,
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
