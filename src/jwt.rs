//! Minimal BrowserID-style JWT assertion construction.
//!
//! This is the opaque capability `married` states use to prove
//! possession of the signed certificate to a relying party. Only RS256
//! compact serialization is implemented; algorithm negotiation, claim
//! validation, and verification are out of scope for this crate -- the
//! remote relying party verifies the assertion.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use serde_json::json;

use crate::errors::InternalError;
use crate::rsa_keypair::RsaKeyPair;

/// How long a freshly minted assertion is valid for, matching the sync
/// client's fixed sign duration.
pub const ASSERTION_DURATION_MS: i64 = 24 * 60 * 60 * 1000;

/// Build a signed assertion binding `certificate` to `audience`, valid
/// from `issued_at_ms` for [`ASSERTION_DURATION_MS`].
pub fn create_assertion(
    key_pair: &RsaKeyPair,
    certificate: &str,
    audience: &str,
    issued_at_ms: i64,
) -> std::result::Result<String, InternalError> {
    let header = json!({ "alg": "RS256" }).to_string();
    let payload = json!({
        "exp": issued_at_ms + ASSERTION_DURATION_MS,
        "aud": audience,
    })
    .to_string();

    let signing_input = format!(
        "{}.{}",
        BASE64URL.encode(header.as_bytes()),
        BASE64URL.encode(payload.as_bytes())
    );
    let signature = key_pair.sign(signing_input.as_bytes())?;
    let signed_object = format!("{}.{}", signing_input, BASE64URL.encode(signature));

    Ok(format!("{}~{}", certificate, signed_object))
}
