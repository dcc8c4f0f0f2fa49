//! Parsing and validation of the encrypted sync record envelope.
//!
//! The wire shape is `{ id, collection?, payload, modified? }` where
//! `payload` is itself a JSON-encoded string of
//! `{ ciphertext, IV, hmac }`. The `hmac` is computed over the
//! **base64-encoded ciphertext string**, not the raw ciphertext bytes --
//! see [`crate::key_bundle::KeyBundle::verify`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::key_bundle::KeyBundle;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[allow(dead_code)]
    id: Option<String>,
    #[allow(dead_code)]
    collection: Option<String>,
    payload: String,
    #[allow(dead_code)]
    modified: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InnerPayload {
    ciphertext: String,
    #[serde(rename = "IV")]
    iv: String,
    hmac: String,
}

/// A raw envelope string paired with the [`KeyBundle`] that should
/// decrypt it. Validity and cleartext are computed lazily and memoized,
/// since both require an HMAC pass and (for cleartext) an AES pass.
pub struct EncryptedJson<'a> {
    raw: String,
    bundle: &'a KeyBundle,
    valid: OnceCell<bool>,
    cleartext: OnceCell<Option<serde_json::Value>>,
}

impl<'a> EncryptedJson<'a> {
    pub fn new(raw: String, bundle: &'a KeyBundle) -> Self {
        EncryptedJson {
            raw,
            bundle,
            valid: OnceCell::new(),
            cleartext: OnceCell::new(),
        }
    }

    fn parse_inner(&self) -> Option<InnerPayload> {
        let envelope: Envelope = serde_json::from_str(&self.raw).ok()?;
        serde_json::from_str(&envelope.payload).ok()
    }

    /// Whether the envelope is at least structurally present -- it parses
    /// as the expected JSON shape with string `ciphertext`/`IV`/`hmac`
    /// fields -- regardless of whether its HMAC actually verifies.
    ///
    /// [`Keys::from_keys_record`] uses this to distinguish "no payload at
    /// all" (malformed JSON, wrong shape) from "payload present but HMAC
    /// mismatch", per the source's documented valid/invalid asymmetry.
    ///
    /// [`Keys::from_keys_record`]: crate::keys::Keys::from_keys_record
    pub(crate) fn envelope_present(&self) -> bool {
        self.parse_inner().is_some()
    }

    /// The envelope parses as JSON, carries string `ciphertext`/`IV`/`hmac`
    /// fields, and the bundle's HMAC over the base64 ciphertext matches.
    pub fn is_valid(&self) -> bool {
        *self.valid.get_or_init(|| {
            let Some(inner) = self.parse_inner() else {
                return false;
            };
            let Ok(expected_hmac) = hex::decode(&inner.hmac) else {
                log::warn!("encrypted envelope hmac was not valid hex");
                return false;
            };
            self.bundle
                .verify(&expected_hmac, inner.ciphertext.as_bytes())
                .unwrap_or(false)
        })
    }

    /// Decrypt to cleartext JSON. Only meaningful once [`Self::is_valid`]
    /// holds; returns `None` on any failure (malformed envelope, HMAC
    /// mismatch, decryption failure, non-UTF-8 plaintext, non-JSON
    /// plaintext).
    pub fn cleartext(&self) -> Option<serde_json::Value> {
        self.cleartext
            .get_or_init(|| {
                if !self.is_valid() {
                    return None;
                }
                let inner = self.parse_inner()?;
                let ciphertext = BASE64.decode(&inner.ciphertext).ok()?;
                let iv_bytes = BASE64.decode(&inner.iv).ok()?;
                let iv: [u8; 16] = iv_bytes.try_into().ok()?;
                let plaintext = self.bundle.decrypt(&ciphertext, &iv).ok()?;
                serde_json::from_str(&plaintext).ok()
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap_envelope(ciphertext_b64: &str, iv_b64: &str, hmac_hex: &str) -> String {
        let inner = serde_json::json!({
            "ciphertext": ciphertext_b64,
            "IV": iv_b64,
            "hmac": hmac_hex,
        })
        .to_string();
        serde_json::json!({
            "id": "rec1",
            "collection": "history",
            "payload": inner,
            "modified": 12345.0,
        })
        .to_string()
    }

    #[test]
    fn valid_envelope_decrypts() {
        let bundle = KeyBundle::random();
        let cleartext = serde_json::json!({"id": "abc", "n": 1});
        let (ciphertext, iv) = bundle.encrypt(cleartext.to_string().as_bytes(), None).unwrap();
        let ciphertext_b64 = base64::engine::general_purpose::STANDARD.encode(&ciphertext);
        let iv_b64 = base64::engine::general_purpose::STANDARD.encode(iv);
        let hmac_hex = bundle.hmac_hex(ciphertext_b64.as_bytes()).unwrap();

        let envelope = wrap_envelope(&ciphertext_b64, &iv_b64, &hmac_hex);
        let ej = EncryptedJson::new(envelope, &bundle);
        assert!(ej.is_valid());
        assert_eq!(ej.cleartext(), Some(cleartext));
    }

    #[test]
    fn tampered_hmac_is_invalid() {
        let bundle = KeyBundle::random();
        let (ciphertext, iv) = bundle.encrypt(b"{}", None).unwrap();
        let ciphertext_b64 = base64::engine::general_purpose::STANDARD.encode(&ciphertext);
        let iv_b64 = base64::engine::general_purpose::STANDARD.encode(iv);

        let envelope = wrap_envelope(&ciphertext_b64, &iv_b64, &"0".repeat(64));
        let ej = EncryptedJson::new(envelope, &bundle);
        assert!(!ej.is_valid());
        assert_eq!(ej.cleartext(), None);
    }

    #[test]
    fn malformed_envelope_is_invalid() {
        let bundle = KeyBundle::random();
        let ej = EncryptedJson::new("not json".to_string(), &bundle);
        assert!(!ej.is_valid());
        assert_eq!(ej.cleartext(), None);
    }

    #[test]
    fn non_json_plaintext_yields_none_cleartext_but_may_be_valid() {
        let bundle = KeyBundle::random();
        let (ciphertext, iv) = bundle.encrypt(b"not json at all", None).unwrap();
        let ciphertext_b64 = base64::engine::general_purpose::STANDARD.encode(&ciphertext);
        let iv_b64 = base64::engine::general_purpose::STANDARD.encode(iv);
        let hmac_hex = bundle.hmac_hex(ciphertext_b64.as_bytes()).unwrap();

        let envelope = wrap_envelope(&ciphertext_b64, &iv_b64, &hmac_hex);
        let ej = EncryptedJson::new(envelope, &bundle);
        assert!(ej.is_valid());
        assert_eq!(ej.cleartext(), None);
    }
}
