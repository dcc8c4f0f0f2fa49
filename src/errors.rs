//! Error types for the key-bundle and account-state core.
//!
//! Two tiers, mirroring the split the sync15 `key_bundle` module and the
//! teacher crate's own error module both use: an [`InternalError`] for
//! primitive-level failures (crypto, bad lengths), and a public
//! [`ProtocolError`] for everything a caller of this crate can observe.

use displaydoc::Display;

/// Errors from the underlying cryptographic primitives.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum InternalError {
    /// AES-CBC operation failed
    Crypto,
    /// expected a {0}-byte {1}, got {2}
    BadKeyLength(&'static str, usize, usize),
    /// RSA operation failed
    Rsa,
}

impl std::error::Error for InternalError {}

/// Errors surfaced by this crate's public API.
///
/// Per the propagation policy, most of these are never returned directly
/// to a caller performing record decryption or state parsing -- those
/// paths collapse failures into `None`/`Option`. `ProtocolError` exists
/// for the handful of operations (raw constructors, RSA/JWT capability
/// boundary) where a precondition violation is a programmer error worth
/// naming precisely.
#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ProtocolError {
    /// malformed input: {0}
    MalformedInput(String),
    /// HMAC integrity check failed
    IntegrityFailure,
    /// internal cryptographic error
    Library(InternalError),
    /// plaintext was not valid UTF-8
    InvalidUtf8,
    /// persisted state did not match the expected schema: {0}
    SchemaMismatch(String),
}

impl std::error::Error for ProtocolError {}

impl From<InternalError> for ProtocolError {
    fn from(e: InternalError) -> Self {
        ProtocolError::Library(e)
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(e: base64::DecodeError) -> Self {
        ProtocolError::MalformedInput(e.to_string())
    }
}

impl From<hex::FromHexError> for ProtocolError {
    fn from(e: hex::FromHexError) -> Self {
        ProtocolError::MalformedInput(e.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::MalformedInput(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
