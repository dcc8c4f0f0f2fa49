//! A thin wrapper around an RSA key pair: the opaque capability the
//! `married`/`cohabitingAfterKeyPair` states carry to sign BrowserID-style
//! assertions. This crate does not negotiate JWS algorithms beyond RS256
//! and does not expose general RSA operations -- only what the account
//! state machine's certificate-signing flow needs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::errors::{InternalError, ProtocolError, Result};

const RSA_MODULUS_BITS: usize = 2048;

/// JSON representation of an RSA key pair, modulus/exponents as
/// unsigned-big-endian-byte, base64url-encoded strings -- the shape used
/// by the BrowserID JWK-ish key representation this crate's certificate
/// flow was modelled on.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaKeyPairJson {
    n: String,
    e: String,
    d: String,
    p: String,
    q: String,
}

/// An RSA key pair used to sign BrowserID-style assertions.
pub struct RsaKeyPair {
    private_key: RsaPrivateKey,
}

impl Clone for RsaKeyPair {
    fn clone(&self) -> Self {
        RsaKeyPair {
            private_key: self.private_key.clone(),
        }
    }
}

impl core::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RsaKeyPair").finish_non_exhaustive()
    }
}

/// Equality compares the serialized key material, since `RsaPrivateKey`
/// itself has no `PartialEq` impl.
impl PartialEq for RsaKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.to_json() == other.to_json()
    }
}

impl RsaKeyPair {
    /// Generate a fresh 2048-bit key pair from an OS CSPRNG.
    pub fn generate() -> std::result::Result<RsaKeyPair, InternalError> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_MODULUS_BITS)
            .map_err(|_| InternalError::Rsa)?;
        Ok(RsaKeyPair { private_key })
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// Reconstruct a key pair from its JSON representation.
    pub fn from_json(json: &RsaKeyPairJson) -> Result<RsaKeyPair> {
        let n = decode_uint(&json.n)?;
        let e = decode_uint(&json.e)?;
        let d = decode_uint(&json.d)?;
        let p = decode_uint(&json.p)?;
        let q = decode_uint(&json.q)?;
        let private_key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|_| ProtocolError::Library(InternalError::Rsa))?;
        Ok(RsaKeyPair { private_key })
    }

    /// Serialize this key pair to its JSON representation.
    pub fn to_json(&self) -> RsaKeyPairJson {
        let key = &self.private_key;
        let primes = key.primes();
        RsaKeyPairJson {
            n: encode_uint(key.n()),
            e: encode_uint(key.e()),
            d: encode_uint(key.d()),
            p: encode_uint(&primes[0]),
            q: encode_uint(&primes[1]),
        }
    }

    /// PKCS#1 v1.5 signature over `message` with SHA-256, used only by
    /// the JWT assertion builder.
    pub fn sign(&self, message: &[u8]) -> std::result::Result<Vec<u8>, InternalError> {
        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key
            .try_sign(message)
            .map_err(|_| InternalError::Rsa)?;
        Ok(signature.to_bytes().to_vec())
    }
}

fn encode_uint(value: &rsa::BigUint) -> String {
    BASE64URL.encode(value.to_bytes_be())
}

fn decode_uint(value: &str) -> Result<rsa::BigUint> {
    let bytes = Zeroizing::new(
        BASE64URL
            .decode(value)
            .map_err(|e| ProtocolError::MalformedInput(e.to_string()))?,
    );
    Ok(rsa::BigUint::from_bytes_be(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let pair = RsaKeyPair::generate().unwrap();
        let json = pair.to_json();
        let restored = RsaKeyPair::from_json(&json).unwrap();
        let sig1 = pair.sign(b"hello").unwrap();
        let sig2 = restored.sign(b"hello").unwrap();
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn signatures_verify_under_the_public_key() {
        use rsa::pkcs1v15::VerifyingKey;
        use rsa::signature::Verifier;

        let pair = RsaKeyPair::generate().unwrap();
        let signature_bytes = pair.sign(b"assertion payload").unwrap();
        let verifying_key = VerifyingKey::<Sha256>::new(pair.public_key());
        let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice()).unwrap();
        assert!(verifying_key
            .verify(b"assertion payload", &signature)
            .is_ok());
    }
}
