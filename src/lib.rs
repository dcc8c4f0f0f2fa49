//! Cryptographic key-management and authentication-state core for a
//! Firefox-Accounts-style identity and sync client.
//!
//! This crate is a pure library of value types: it derives symmetric key
//! material from an account master secret, performs encrypt-then-MAC
//! record cryptography against the sync service's envelope format, and
//! models the signed-in account lifecycle as a closed set of labelled
//! states with versioned persistence. It owns no network I/O, no storage
//! back-end, and no CLI surface -- those are external collaborators.

mod encrypted_json;
pub mod errors;
mod jwt;
pub mod key_bundle;
pub mod keys;
pub mod rsa_keypair;
pub mod state;

pub use encrypted_json::EncryptedJson;
pub use errors::{InternalError, ProtocolError, Result};
pub use jwt::create_assertion;
pub use key_bundle::KeyBundle;
pub use keys::{Keys, KeysPayload};
pub use rsa_keypair::{RsaKeyPair, RsaKeyPairJson};
pub use state::{
    ActionNeeded, AccountState, CohabitingAfterKeyPairState, CohabitingBeforeKeyPairState,
    EngagedAfterVerifiedState, EngagedBeforeVerifiedState, MarriedState,
};
