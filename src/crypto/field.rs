//! Encrypted field envelope and JSON document helpers.
//!
//! Sensitive fields are addressed by dot-separated paths (`user.ssn`,
//! `cards.0.number`). Each field is encrypted with `"{scope}:{path}"` as its
//! context, so an envelope copied to another field or dependency will not
//! open.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::manager::EncryptionManager;
use super::CryptoError;

/// Wire form of an encrypted value. Binary members are base64 (standard
/// alphabet) in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedField {
    pub key_id: String,
    pub alg: String,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
}

mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Encrypt each field in `paths` in place. Missing and null fields are
/// skipped. Returns how many fields were encrypted.
pub fn encrypt_fields(
    manager: &EncryptionManager,
    document: &mut Value,
    paths: &[String],
    scope: &str,
) -> Result<usize, CryptoError> {
    let mut count = 0;
    for path in paths {
        let Some(slot) = document.pointer_mut(&to_pointer(path)) else {
            continue;
        };
        if slot.is_null() {
            continue;
        }

        let plaintext = serde_json::to_vec(slot).map_err(|_| CryptoError::Malformed("unserializable field"))?;
        let field = manager.encrypt(&plaintext, &context(scope, path))?;
        *slot = serde_json::to_value(field).map_err(|_| CryptoError::Seal)?;
        count += 1;
    }
    Ok(count)
}

/// Decrypt each field in `paths` in place.
///
/// A present, non-null field that is not an envelope fails the whole
/// document: plaintext where ciphertext is expected is never passed through.
pub fn decrypt_fields(
    manager: &EncryptionManager,
    document: &mut Value,
    paths: &[String],
    scope: &str,
) -> Result<usize, CryptoError> {
    let mut count = 0;
    for path in paths {
        let Some(slot) = document.pointer_mut(&to_pointer(path)) else {
            continue;
        };
        if slot.is_null() {
            continue;
        }

        let field = EncryptedField::deserialize(&*slot).map_err(|_| CryptoError::Malformed("not an encrypted field"))?;
        let plaintext = manager.decrypt(&field, &context(scope, path))?;
        *slot = serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Malformed("decrypted value is not JSON"))?;
        count += 1;
    }
    Ok(count)
}

fn context(scope: &str, path: &str) -> String {
    format!("{}:{}", scope, path)
}

/// `a.b~c` → `/a/b~0c`
fn to_pointer(path: &str) -> String {
    let mut pointer = String::with_capacity(path.len() + 1);
    for segment in path.split('.') {
        pointer.push('/');
        pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
    }
    pointer
}
