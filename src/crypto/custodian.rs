//! Key custody.
//!
//! A [`KeyCustodian`] owns key material and performs the AEAD primitive on
//! the manager's behalf. [`LocalCustodian`] keeps material in process memory;
//! an HSM-backed custodian implements the same trait and keeps material on the
//! device.

use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use dashmap::DashMap;

use super::key::{KeyMaterial, NONCE_LEN, TAG_LEN};
use super::CryptoError;

/// Capability interface for key generation, sealing and destruction.
pub trait KeyCustodian: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Create fresh material under `key_id`.
    fn generate(&self, key_id: &str) -> Result<(), CryptoError>;

    /// AES-256-GCM encrypt; returns ciphertext and detached tag.
    fn seal(
        &self,
        key_id: &str,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError>;

    /// AES-256-GCM decrypt and verify.
    fn open(
        &self,
        key_id: &str,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Irrevocably discard the material for `key_id`.
    fn destroy(&self, key_id: &str) -> Result<(), CryptoError>;
}

/// In-process custodian. Material is zeroized when destroyed or dropped.
#[derive(Default)]
pub struct LocalCustodian {
    keys: DashMap<String, KeyMaterial>,
}

impl LocalCustodian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys whose material is currently held.
    pub fn held(&self) -> usize {
        self.keys.len()
    }

    fn cipher(&self, key_id: &str) -> Result<Aes256Gcm, CryptoError> {
        let material = self
            .keys
            .get(key_id)
            .ok_or_else(|| CryptoError::UnknownKey(key_id.to_string()))?;
        Aes256Gcm::new_from_slice(material.as_bytes()).map_err(|_| CryptoError::Custodian("invalid key length".into()))
    }
}

impl fmt::Debug for LocalCustodian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCustodian").field("held", &self.keys.len()).finish()
    }
}

impl KeyCustodian for LocalCustodian {
    fn name(&self) -> &'static str {
        "local"
    }

    fn generate(&self, key_id: &str) -> Result<(), CryptoError> {
        if self.keys.contains_key(key_id) {
            return Err(CryptoError::Custodian(format!("key id '{}' already exists", key_id)));
        }
        self.keys.insert(key_id.to_string(), KeyMaterial::generate());
        Ok(())
    }

    fn seal(
        &self,
        key_id: &str,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError> {
        let cipher = self.cipher(key_id)?;
        let mut sealed = cipher
            .encrypt(GenericArray::from_slice(&nonce[..]), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::Seal)?;

        if sealed.len() < TAG_LEN {
            return Err(CryptoError::Seal);
        }
        let split = sealed.len() - TAG_LEN;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&sealed[split..]);
        sealed.truncate(split);
        Ok((sealed, tag))
    }

    fn open(
        &self,
        key_id: &str,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher(key_id)?;
        let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(ciphertext);
        combined.extend_from_slice(tag);

        cipher
            .decrypt(GenericArray::from_slice(&nonce[..]), Payload { msg: &combined[..], aad })
            .map_err(|_| CryptoError::Authentication)
    }

    fn destroy(&self, key_id: &str) -> Result<(), CryptoError> {
        // Dropping KeyMaterial zeroizes it.
        match self.keys.remove(key_id) {
            Some(_) => Ok(()),
            None => Err(CryptoError::UnknownKey(key_id.to_string())),
        }
    }
}
