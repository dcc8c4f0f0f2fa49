//! The per-collection key registry built from a downloaded keys record.

use std::collections::HashMap;

use serde::Deserialize;

use crate::key_bundle::KeyBundle;

/// The decrypted cleartext shape of a keys record: a default bundle plus
/// optional per-collection overrides, each as a `[encKeyB64, hmacKeyB64]`
/// pair -- the shape the sync protocol's `crypto/keys` record actually
/// uses on the wire.
#[derive(Debug, Deserialize)]
pub struct KeysPayload {
    default: [String; 2],
    #[serde(default)]
    collections: HashMap<String, [String; 2]>,
}

impl KeysPayload {
    pub fn new(value: serde_json::Value) -> Option<KeysPayload> {
        serde_json::from_value(value).ok()
    }

    fn default_bundle(&self) -> KeyBundle {
        KeyBundle::from_base64(&self.default[0], &self.default[1])
    }

    fn collection_bundles(&self) -> HashMap<String, KeyBundle> {
        self.collections
            .iter()
            .map(|(name, pair)| (name.clone(), KeyBundle::from_base64(&pair[0], &pair[1])))
            .collect()
    }
}

/// The default bundle plus any per-collection overrides, rebuilt whenever
/// a new keys record is downloaded.
pub struct Keys {
    default_bundle: KeyBundle,
    collection_keys: HashMap<String, KeyBundle>,
    valid: bool,
}

impl Keys {
    /// Construct a registry with only a default bundle; no per-collection
    /// overrides.
    pub fn from_default_bundle(default_bundle: KeyBundle) -> Keys {
        Keys {
            default_bundle,
            collection_keys: HashMap::new(),
            valid: true,
        }
    }

    /// Build a registry from a downloaded keys record envelope and the
    /// master [`KeyBundle`] it was encrypted with.
    ///
    /// Three outcomes, matching the documented (if surprising) source
    /// behaviour: if the envelope fails to parse into any payload at all,
    /// `default_bundle` becomes [`KeyBundle::invalid`] and `valid` is
    /// `true`; if a payload parses but its envelope HMAC does not verify,
    /// `default_bundle` becomes invalid and `valid` is `false`; otherwise
    /// the payload's bundles populate the registry and `valid` is `true`.
    pub fn from_keys_record(envelope: &str, master: &KeyBundle) -> Keys {
        let ej = crate::encrypted_json::EncryptedJson::new(envelope.to_string(), master);

        if !ej.envelope_present() {
            return Keys {
                default_bundle: KeyBundle::invalid(),
                collection_keys: HashMap::new(),
                valid: true,
            };
        }

        if !ej.is_valid() {
            return Keys {
                default_bundle: KeyBundle::invalid(),
                collection_keys: HashMap::new(),
                valid: false,
            };
        }

        match ej.cleartext().and_then(KeysPayload::new) {
            Some(payload) => Keys {
                default_bundle: payload.default_bundle(),
                collection_keys: payload.collection_bundles(),
                valid: true,
            },
            None => Keys {
                default_bundle: KeyBundle::invalid(),
                collection_keys: HashMap::new(),
                valid: true,
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn default_bundle(&self) -> &KeyBundle {
        &self.default_bundle
    }

    /// The bundle for `collection`, falling back to the default bundle
    /// when no per-collection override exists.
    pub fn for_collection(&self, collection: &str) -> &KeyBundle {
        self.collection_keys
            .get(collection)
            .unwrap_or(&self.default_bundle)
    }

    /// [`Keys::for_collection`] composed with [`KeyBundle::factory`].
    pub fn factory<'a, T>(
        &'a self,
        collection: &str,
        parse: impl Fn(serde_json::Value) -> Option<T> + 'a,
    ) -> impl Fn(&str) -> Option<T> + 'a {
        self.for_collection(collection).factory(parse)
    }
}
