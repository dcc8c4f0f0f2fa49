//! The account sign-in lifecycle, represented as a closed sum type with
//! per-variant data -- the Rust equivalent of the original's inheritance
//! chain (`WithLabel -> ReadyForKeys -> EngagedBeforeVerifiedState`, ...).
//! The abstract bases existed there only to share serialization helpers;
//! those are reimplemented here as free functions/methods over each
//! variant's own fields rather than inherited behaviour.
//!
//! State structs derive `Zeroize` but not `Zeroize(drop)`: transitions
//! move individual fields out of `self` (e.g. `session_token` carried
//! forward into the next state), which a `Drop` impl forbids. Callers
//! that discard a state without transitioning it onward (e.g. dropping a
//! `separated`-bound value) should call `.zeroize()` explicitly first.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::errors::{ProtocolError, Result};
use crate::rsa_keypair::{RsaKeyPair, RsaKeyPairJson};

const SCHEMA_VERSION: i64 = 1;

/// The action a driver must take before this account can make further
/// progress, a pure function of the state's label.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionNeeded {
    None,
    NeedsVerification,
    NeedsPassword,
    NeedsUpgrade,
}

#[derive(Clone, Debug, PartialEq, Zeroize)]
pub struct EngagedBeforeVerifiedState {
    pub session_token: Vec<u8>,
    pub key_fetch_token: Vec<u8>,
    pub unwrap_kb: Vec<u8>,
    pub known_unverified_at: i64,
    pub last_notified_user_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Zeroize)]
pub struct EngagedAfterVerifiedState {
    pub session_token: Vec<u8>,
    pub key_fetch_token: Vec<u8>,
    pub unwrap_kb: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Zeroize)]
pub struct CohabitingBeforeKeyPairState {
    pub session_token: Vec<u8>,
    pub k_a: Vec<u8>,
    pub k_b: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Zeroize)]
pub struct CohabitingAfterKeyPairState {
    pub session_token: Vec<u8>,
    pub k_a: Vec<u8>,
    pub k_b: Vec<u8>,
    #[zeroize(skip)]
    pub key_pair: RsaKeyPair,
    pub key_pair_expires_at: i64,
}

#[derive(Clone, Debug, PartialEq, Zeroize)]
pub struct MarriedState {
    pub session_token: Vec<u8>,
    pub k_a: Vec<u8>,
    pub k_b: Vec<u8>,
    #[zeroize(skip)]
    pub key_pair: RsaKeyPair,
    pub key_pair_expires_at: i64,
    pub certificate: String,
    pub certificate_expires_at: i64,
}

/// The seven labelled states of an account's sign-in lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum AccountState {
    EngagedBeforeVerified(EngagedBeforeVerifiedState),
    EngagedAfterVerified(EngagedAfterVerifiedState),
    CohabitingBeforeKeyPair(CohabitingBeforeKeyPairState),
    CohabitingAfterKeyPair(CohabitingAfterKeyPairState),
    Married(MarriedState),
    Separated,
    Doghouse,
}

impl AccountState {
    /// Construct the initial post-login state from a `separated` account.
    pub fn sign_in(
        session_token: Vec<u8>,
        key_fetch_token: Vec<u8>,
        unwrap_kb: Vec<u8>,
        verified: bool,
        known_unverified_at: i64,
    ) -> AccountState {
        if verified {
            AccountState::EngagedAfterVerified(EngagedAfterVerifiedState {
                session_token,
                key_fetch_token,
                unwrap_kb,
            })
        } else {
            AccountState::EngagedBeforeVerified(EngagedBeforeVerifiedState {
                session_token,
                key_fetch_token,
                unwrap_kb,
                known_unverified_at,
                last_notified_user_at: None,
            })
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AccountState::EngagedBeforeVerified(_) => "engagedBeforeVerified",
            AccountState::EngagedAfterVerified(_) => "engagedAfterVerified",
            AccountState::CohabitingBeforeKeyPair(_) => "cohabitingBeforeKeyPair",
            AccountState::CohabitingAfterKeyPair(_) => "cohabitingAfterKeyPair",
            AccountState::Married(_) => "married",
            AccountState::Separated => "separated",
            AccountState::Doghouse => "doghouse",
        }
    }

    /// The action a driver must take next, a pure function of the label.
    pub fn action_needed(&self) -> ActionNeeded {
        match self {
            AccountState::EngagedBeforeVerified(_) => ActionNeeded::NeedsVerification,
            AccountState::EngagedAfterVerified(_) => ActionNeeded::None,
            AccountState::CohabitingBeforeKeyPair(_) => ActionNeeded::None,
            AccountState::CohabitingAfterKeyPair(_) => ActionNeeded::None,
            AccountState::Married(_) => ActionNeeded::None,
            AccountState::Separated => ActionNeeded::NeedsPassword,
            AccountState::Doghouse => ActionNeeded::NeedsUpgrade,
        }
    }

    /// `any -> separated`, on an authentication failure indicating the
    /// session no longer holds.
    pub fn to_separated(self) -> AccountState {
        AccountState::Separated
    }

    /// `any -> doghouse`, on a server signal that the client version is
    /// unsupported.
    pub fn to_doghouse(self) -> AccountState {
        AccountState::Doghouse
    }

    /// Serialize to the versioned persistence dictionary of spec.md §4.4:
    /// `version = 1`, `label = <rawLabel>`, plus this label's fields.
    pub fn to_dictionary(&self) -> serde_json::Value {
        let mut fields = match self {
            AccountState::EngagedBeforeVerified(s) => serde_json::to_value(EngagedBeforeVerifiedDict::from(s)),
            AccountState::EngagedAfterVerified(s) => serde_json::to_value(EngagedAfterVerifiedDict::from(s)),
            AccountState::CohabitingBeforeKeyPair(s) => {
                serde_json::to_value(CohabitingBeforeKeyPairDict::from(s))
            }
            AccountState::CohabitingAfterKeyPair(s) => {
                serde_json::to_value(CohabitingAfterKeyPairDict::from(s))
            }
            AccountState::Married(s) => serde_json::to_value(MarriedDict::from(s)),
            AccountState::Separated | AccountState::Doghouse => {
                serde_json::to_value(serde_json::Map::new())
            }
        }
        .expect("state dicts always serialize");

        let map = fields
            .as_object_mut()
            .expect("state dicts always serialize to an object");
        map.insert("version".to_string(), serde_json::json!(SCHEMA_VERSION));
        map.insert("label".to_string(), serde_json::json!(self.label()));
        fields
    }

    /// Parse a persistence dictionary produced by [`Self::to_dictionary`].
    /// Rejects unknown schema versions, unknown labels, and any label
    /// whose declared fields are missing or ill-typed.
    pub fn from_dictionary(value: &serde_json::Value) -> Option<AccountState> {
        let version = value.get("version")?.as_i64()?;
        if version != SCHEMA_VERSION {
            return None;
        }
        let label = value.get("label")?.as_str()?;
        match label {
            "engagedBeforeVerified" => {
                // `Option<i64>` fields deserialize as `None` when the key
                // is simply absent, which would let a record that omits
                // `lastNotifiedUserAt` through. It's a declared field of
                // this label, so its key must be present (its *value* may
                // still be `null`).
                if !value
                    .as_object()
                    .is_some_and(|obj| obj.contains_key("lastNotifiedUserAt"))
                {
                    return None;
                }
                let dict: EngagedBeforeVerifiedDict = serde_json::from_value(value.clone()).ok()?;
                Some(AccountState::EngagedBeforeVerified(
                    EngagedBeforeVerifiedState::try_from(dict).ok()?,
                ))
            }
            "engagedAfterVerified" => {
                let dict: EngagedAfterVerifiedDict = serde_json::from_value(value.clone()).ok()?;
                Some(AccountState::EngagedAfterVerified(
                    EngagedAfterVerifiedState::try_from(dict).ok()?,
                ))
            }
            "cohabitingBeforeKeyPair" => {
                let dict: CohabitingBeforeKeyPairDict = serde_json::from_value(value.clone()).ok()?;
                Some(AccountState::CohabitingBeforeKeyPair(
                    CohabitingBeforeKeyPairState::try_from(dict).ok()?,
                ))
            }
            "cohabitingAfterKeyPair" => {
                let dict: CohabitingAfterKeyPairDict = serde_json::from_value(value.clone()).ok()?;
                Some(AccountState::CohabitingAfterKeyPair(
                    CohabitingAfterKeyPairState::try_from(dict).ok()?,
                ))
            }
            "married" => {
                let dict: MarriedDict = serde_json::from_value(value.clone()).ok()?;
                Some(AccountState::Married(MarriedState::try_from(dict).ok()?))
            }
            "separated" => Some(AccountState::Separated),
            "doghouse" => Some(AccountState::Doghouse),
            _ => None,
        }
    }
}

impl EngagedBeforeVerifiedState {
    /// `engagedBeforeVerified -> engagedAfterVerified`, on observing
    /// verification. Preserves the three tokens.
    pub fn verified(self) -> EngagedAfterVerifiedState {
        EngagedAfterVerifiedState {
            session_token: self.session_token,
            key_fetch_token: self.key_fetch_token,
            unwrap_kb: self.unwrap_kb,
        }
    }

    pub fn with_unwrap_key(mut self, unwrap_kb: Vec<u8>) -> Self {
        self.unwrap_kb = unwrap_kb;
        self
    }
}

impl EngagedAfterVerifiedState {
    pub fn with_unwrap_key(mut self, unwrap_kb: Vec<u8>) -> Self {
        self.unwrap_kb = unwrap_kb;
        self
    }

    /// `engagedAfterVerified -> cohabitingBeforeKeyPair`, after fetching
    /// `(kA, kB)`. `keyFetchToken` and `unwrapkB` are dropped.
    pub fn cohabit(self, k_a: Vec<u8>, k_b: Vec<u8>) -> CohabitingBeforeKeyPairState {
        CohabitingBeforeKeyPairState {
            session_token: self.session_token,
            k_a,
            k_b,
        }
    }
}

impl CohabitingBeforeKeyPairState {
    /// `cohabitingBeforeKeyPair -> cohabitingAfterKeyPair`, after
    /// generating a new RSA key pair.
    pub fn with_key_pair(
        self,
        key_pair: RsaKeyPair,
        key_pair_expires_at: i64,
    ) -> CohabitingAfterKeyPairState {
        CohabitingAfterKeyPairState {
            session_token: self.session_token,
            k_a: self.k_a,
            k_b: self.k_b,
            key_pair,
            key_pair_expires_at,
        }
    }
}

impl CohabitingAfterKeyPairState {
    pub fn is_key_pair_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.key_pair_expires_at
    }

    /// `cohabitingAfterKeyPair -> married`, after obtaining a signed
    /// certificate.
    pub fn with_certificate(self, certificate: String, certificate_expires_at: i64) -> MarriedState {
        MarriedState {
            session_token: self.session_token,
            k_a: self.k_a,
            k_b: self.k_b,
            key_pair: self.key_pair,
            key_pair_expires_at: self.key_pair_expires_at,
            certificate,
            certificate_expires_at,
        }
    }
}

impl MarriedState {
    pub fn is_certificate_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.certificate_expires_at
    }

    pub fn is_key_pair_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.key_pair_expires_at
    }

    /// `married -> cohabitingAfterKeyPair` via `withoutCertificate`, when
    /// [`Self::is_certificate_expired`] holds. The certificate and its
    /// expiry are dropped.
    pub fn without_certificate(self) -> CohabitingAfterKeyPairState {
        CohabitingAfterKeyPairState {
            session_token: self.session_token,
            k_a: self.k_a,
            k_b: self.k_b,
            key_pair: self.key_pair,
            key_pair_expires_at: self.key_pair_expires_at,
        }
    }

    /// `married -> cohabitingBeforeKeyPair` via `withoutKeyPair`, when
    /// [`Self::is_key_pair_expired`] holds. Both the key pair and
    /// certificate are dropped.
    pub fn without_key_pair(self) -> CohabitingBeforeKeyPairState {
        CohabitingBeforeKeyPairState {
            session_token: self.session_token,
            k_a: self.k_a,
            k_b: self.k_b,
        }
    }

    /// Build a JWT-style assertion binding this account's certificate to
    /// `audience`, signed with the key pair.
    pub fn generate_assertion(&self, audience: &str, now_ms: i64) -> Result<String> {
        crate::jwt::create_assertion(&self.key_pair, &self.certificate, audience, now_ms)
            .map_err(ProtocolError::from)
    }
}

// --- Persistence DTOs -------------------------------------------------
//
// One per labelled state, carrying exactly that label's declared fields
// under their wire names. Deserializing one of these directly from the
// persisted dictionary is what gives us "missing or ill-typed fields
// reject the whole record" for free: serde_json::from_value fails if any
// non-Option field is absent or the wrong type.

#[derive(Serialize, Deserialize)]
struct EngagedBeforeVerifiedDict {
    #[serde(rename = "sessionToken")]
    session_token: String,
    #[serde(rename = "keyFetchToken")]
    key_fetch_token: String,
    #[serde(rename = "unwrapkB")]
    unwrap_kb: String,
    #[serde(rename = "knownUnverifiedAt")]
    known_unverified_at: i64,
    #[serde(rename = "lastNotifiedUserAt")]
    last_notified_user_at: Option<i64>,
}

impl From<&EngagedBeforeVerifiedState> for EngagedBeforeVerifiedDict {
    fn from(s: &EngagedBeforeVerifiedState) -> Self {
        EngagedBeforeVerifiedDict {
            session_token: hex::encode(&s.session_token),
            key_fetch_token: hex::encode(&s.key_fetch_token),
            unwrap_kb: hex::encode(&s.unwrap_kb),
            known_unverified_at: s.known_unverified_at,
            last_notified_user_at: s.last_notified_user_at,
        }
    }
}

impl TryFrom<EngagedBeforeVerifiedDict> for EngagedBeforeVerifiedState {
    type Error = ProtocolError;
    fn try_from(d: EngagedBeforeVerifiedDict) -> Result<Self> {
        Ok(EngagedBeforeVerifiedState {
            session_token: hex::decode(d.session_token)?,
            key_fetch_token: hex::decode(d.key_fetch_token)?,
            unwrap_kb: hex::decode(d.unwrap_kb)?,
            known_unverified_at: d.known_unverified_at,
            last_notified_user_at: d.last_notified_user_at,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct EngagedAfterVerifiedDict {
    #[serde(rename = "sessionToken")]
    session_token: String,
    #[serde(rename = "keyFetchToken")]
    key_fetch_token: String,
    #[serde(rename = "unwrapkB")]
    unwrap_kb: String,
}

impl From<&EngagedAfterVerifiedState> for EngagedAfterVerifiedDict {
    fn from(s: &EngagedAfterVerifiedState) -> Self {
        EngagedAfterVerifiedDict {
            session_token: hex::encode(&s.session_token),
            key_fetch_token: hex::encode(&s.key_fetch_token),
            unwrap_kb: hex::encode(&s.unwrap_kb),
        }
    }
}

impl TryFrom<EngagedAfterVerifiedDict> for EngagedAfterVerifiedState {
    type Error = ProtocolError;
    fn try_from(d: EngagedAfterVerifiedDict) -> Result<Self> {
        Ok(EngagedAfterVerifiedState {
            session_token: hex::decode(d.session_token)?,
            key_fetch_token: hex::decode(d.key_fetch_token)?,
            unwrap_kb: hex::decode(d.unwrap_kb)?,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CohabitingBeforeKeyPairDict {
    #[serde(rename = "sessionToken")]
    session_token: String,
    #[serde(rename = "kA")]
    k_a: String,
    #[serde(rename = "kB")]
    k_b: String,
}

impl From<&CohabitingBeforeKeyPairState> for CohabitingBeforeKeyPairDict {
    fn from(s: &CohabitingBeforeKeyPairState) -> Self {
        CohabitingBeforeKeyPairDict {
            session_token: hex::encode(&s.session_token),
            k_a: hex::encode(&s.k_a),
            k_b: hex::encode(&s.k_b),
        }
    }
}

impl TryFrom<CohabitingBeforeKeyPairDict> for CohabitingBeforeKeyPairState {
    type Error = ProtocolError;
    fn try_from(d: CohabitingBeforeKeyPairDict) -> Result<Self> {
        Ok(CohabitingBeforeKeyPairState {
            session_token: hex::decode(d.session_token)?,
            k_a: hex::decode(d.k_a)?,
            k_b: hex::decode(d.k_b)?,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CohabitingAfterKeyPairDict {
    #[serde(rename = "sessionToken")]
    session_token: String,
    #[serde(rename = "kA")]
    k_a: String,
    #[serde(rename = "kB")]
    k_b: String,
    #[serde(rename = "keyPair")]
    key_pair: RsaKeyPairJson,
    #[serde(rename = "keyPairExpiresAt")]
    key_pair_expires_at: i64,
}

impl From<&CohabitingAfterKeyPairState> for CohabitingAfterKeyPairDict {
    fn from(s: &CohabitingAfterKeyPairState) -> Self {
        CohabitingAfterKeyPairDict {
            session_token: hex::encode(&s.session_token),
            k_a: hex::encode(&s.k_a),
            k_b: hex::encode(&s.k_b),
            key_pair: s.key_pair.to_json(),
            key_pair_expires_at: s.key_pair_expires_at,
        }
    }
}

impl TryFrom<CohabitingAfterKeyPairDict> for CohabitingAfterKeyPairState {
    type Error = ProtocolError;
    fn try_from(d: CohabitingAfterKeyPairDict) -> Result<Self> {
        Ok(CohabitingAfterKeyPairState {
            session_token: hex::decode(d.session_token)?,
            k_a: hex::decode(d.k_a)?,
            k_b: hex::decode(d.k_b)?,
            key_pair: RsaKeyPair::from_json(&d.key_pair)?,
            key_pair_expires_at: d.key_pair_expires_at,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct MarriedDict {
    #[serde(rename = "sessionToken")]
    session_token: String,
    #[serde(rename = "kA")]
    k_a: String,
    #[serde(rename = "kB")]
    k_b: String,
    #[serde(rename = "keyPair")]
    key_pair: RsaKeyPairJson,
    #[serde(rename = "keyPairExpiresAt")]
    key_pair_expires_at: i64,
    certificate: String,
    #[serde(rename = "certificateExpiresAt")]
    certificate_expires_at: i64,
}

impl From<&MarriedState> for MarriedDict {
    fn from(s: &MarriedState) -> Self {
        MarriedDict {
            session_token: hex::encode(&s.session_token),
            k_a: hex::encode(&s.k_a),
            k_b: hex::encode(&s.k_b),
            key_pair: s.key_pair.to_json(),
            key_pair_expires_at: s.key_pair_expires_at,
            certificate: s.certificate.clone(),
            certificate_expires_at: s.certificate_expires_at,
        }
    }
}

impl TryFrom<MarriedDict> for MarriedState {
    type Error = ProtocolError;
    fn try_from(d: MarriedDict) -> Result<Self> {
        Ok(MarriedState {
            session_token: hex::decode(d.session_token)?,
            k_a: hex::decode(d.k_a)?,
            k_b: hex::decode(d.k_b)?,
            key_pair: RsaKeyPair::from_json(&d.key_pair)?,
            key_pair_expires_at: d.key_pair_expires_at,
            certificate: d.certificate,
            certificate_expires_at: d.certificate_expires_at,
        })
    }
}
