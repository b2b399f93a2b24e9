//! Key metadata, key material and the published key ring.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const ALGORITHM: &str = "AES-256-GCM";
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Lifecycle state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    /// Used for new encryptions.
    Active,
    /// Replaced, still fully readable during the grace window.
    Rotating,
    /// Decrypt-only until purged.
    Retired,
}

/// A lifecycle transition, as reported in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEvent {
    Generated,
    Rotating,
    Retired,
    Purged,
}

impl KeyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyEvent::Generated => "generated",
            KeyEvent::Rotating => "rotating",
            KeyEvent::Retired => "retired",
            KeyEvent::Purged => "purged",
        }
    }
}

/// Public metadata of an encryption key. Holds no material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub key_id: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub rotates_at: DateTime<Utc>,
    pub status: KeyStatus,
    pub status_changed_at: DateTime<Utc>,
}

impl EncryptionKey {
    pub fn new(key_id: String, created_at: DateTime<Utc>, rotates_at: DateTime<Utc>) -> Self {
        Self {
            key_id,
            algorithm: ALGORITHM.to_string(),
            created_at,
            rotates_at,
            status: KeyStatus::Active,
            status_changed_at: created_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == KeyStatus::Active && self.rotates_at <= now
    }
}

/// 256 bits of key material, zeroed on drop.
pub struct KeyMaterial(Zeroizing<[u8; KEY_LEN]>);

impl KeyMaterial {
    /// Fresh material from the operating system RNG.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(bytes.as_mut());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Key metadata plus its encryption counter.
///
/// The counter is shared between ring generations so copy-on-write
/// publishing never resets it.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key: EncryptionKey,
    usage: Arc<AtomicU64>,
}

impl KeyEntry {
    pub fn new(key: EncryptionKey) -> Self {
        Self {
            key,
            usage: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count one encryption; returns the count before this one.
    pub fn record_use(&self) -> u64 {
        self.usage.fetch_add(1, Ordering::Relaxed)
    }

    pub fn uses(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }
}

/// An immutable generation of the key set.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    entries: BTreeMap<String, KeyEntry>,
    active: Option<String>,
}

impl KeyRing {
    pub fn active(&self) -> Option<&KeyEntry> {
        self.active.as_ref().and_then(|id| self.entries.get(id))
    }

    pub fn get(&self, key_id: &str) -> Option<&KeyEntry> {
        self.entries.get(key_id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &EncryptionKey> {
        self.entries.values().map(|e| &e.key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a new ACTIVE key, demoting the previous one to ROTATING.
    ///
    /// Returns the demoted key id, if any.
    pub(crate) fn promote(&mut self, key: EncryptionKey, now: DateTime<Utc>) -> Option<String> {
        let previous = self.active.take();
        if let Some(id) = &previous {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.key.status = KeyStatus::Rotating;
                entry.key.status_changed_at = now;
            }
        }
        self.active = Some(key.key_id.clone());
        self.entries.insert(key.key_id.clone(), KeyEntry::new(key));
        previous
    }

    pub(crate) fn set_status(&mut self, key_id: &str, status: KeyStatus, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(key_id) {
            entry.key.status = status;
            entry.key.status_changed_at = now;
        }
    }

    pub(crate) fn remove(&mut self, key_id: &str) -> Option<EncryptionKey> {
        if self.active.as_deref() == Some(key_id) {
            self.active = None;
        }
        self.entries.remove(key_id).map(|e| e.key)
    }
}
