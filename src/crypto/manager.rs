//! Encryption manager: AEAD over the active key, plus key rotation.
//!
//! # Responsibilities
//! - Encrypt with the ACTIVE key and a fresh random nonce
//! - Decrypt with whichever key the ciphertext names, in any non-purged state
//! - Advance key lifecycle on `tick()`: ACTIVE → ROTATING → RETIRED → purged
//! - Force a rotation when a key reaches its message budget
//!
//! # Concurrency
//! Encrypt and decrypt read a lock-free snapshot of the key ring. Rotation
//! builds the next ring under a mutex and publishes it in one swap.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use super::custodian::KeyCustodian;
use super::field::EncryptedField;
use super::key::{EncryptionKey, KeyEvent, KeyRing, KeyStatus, ALGORITHM, NONCE_LEN, TAG_LEN};
use super::CryptoError;
use crate::clock::Clock;
use crate::config::EncryptionConfig;
use crate::observability::metrics;
use crate::observability::{EventSink, SecurityEvent};

/// Key lifecycle changes made by one [`EncryptionManager::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub generated: Option<String>,
    pub rotating: Vec<String>,
    pub retired: Vec<String>,
    pub purged: Vec<String>,
}

impl RotationReport {
    pub fn is_empty(&self) -> bool {
        self.generated.is_none() && self.rotating.is_empty() && self.retired.is_empty() && self.purged.is_empty()
    }
}

/// Field-level AES-256-GCM encryption with scheduled key rotation.
pub struct EncryptionManager {
    ring: ArcSwap<KeyRing>,
    rotation: Mutex<()>,
    custodian: Arc<dyn KeyCustodian>,
    config: EncryptionConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl EncryptionManager {
    /// Create a manager and generate its first ACTIVE key.
    pub fn new(
        config: EncryptionConfig,
        custodian: Arc<dyn KeyCustodian>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, CryptoError> {
        let manager = Self {
            ring: ArcSwap::from_pointee(KeyRing::default()),
            rotation: Mutex::new(()),
            custodian,
            config,
            clock,
            events,
        };
        manager.rotate()?;
        tracing::info!(
            custodian = manager.custodian.name(),
            rotation_days = manager.config.key_rotation_days,
            "Encryption manager initialized"
        );
        Ok(manager)
    }

    /// Encrypt `plaintext` under the ACTIVE key, binding `context` as
    /// associated data.
    pub fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<EncryptedField, CryptoError> {
        loop {
            let ring = self.ring.load();
            let entry = ring.active().ok_or(CryptoError::NoActiveKey)?;

            if entry.record_use() >= self.config.max_messages_per_key {
                let exhausted = entry.key.key_id.clone();
                drop(ring);
                tracing::warn!(key_id = %exhausted, "Key message budget reached, forcing rotation");
                self.rotate_from(Some(exhausted.as_str()))?;
                continue;
            }

            let key_id = entry.key.key_id.clone();
            let mut nonce = [0u8; NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            let aad = associated_data(&key_id, context);

            let (ciphertext, tag) = self.custodian.seal(&key_id, &nonce, &aad, plaintext)?;
            return Ok(EncryptedField {
                key_id,
                alg: ALGORITHM.to_string(),
                nonce: nonce.to_vec(),
                ciphertext,
                tag: tag.to_vec(),
            });
        }
    }

    /// Decrypt a field previously produced by [`encrypt`](Self::encrypt)
    /// with the same `context`.
    pub fn decrypt(&self, field: &EncryptedField, context: &str) -> Result<Vec<u8>, CryptoError> {
        if field.alg != ALGORITHM {
            return Err(CryptoError::Malformed("unsupported algorithm"));
        }
        let nonce: [u8; NONCE_LEN] = field
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Malformed("bad nonce length"))?;
        let tag: [u8; TAG_LEN] = field
            .tag
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Malformed("bad tag length"))?;

        if self.ring.load().get(&field.key_id).is_none() {
            return Err(CryptoError::UnknownKey(field.key_id.clone()));
        }

        let aad = associated_data(&field.key_id, context);
        self.custodian.open(&field.key_id, &nonce, &aad, &field.ciphertext, &tag)
    }

    /// Rotate immediately: generate a new ACTIVE key and demote the current
    /// one to ROTATING.
    pub fn rotate(&self) -> Result<EncryptionKey, CryptoError> {
        let _guard = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = KeyRing::clone(&self.ring.load());
        let key = self.promote_new(&mut next, self.clock.utc())?;
        self.ring.store(Arc::new(next));
        Ok(key)
    }

    /// Rotate only if `expected` is still the ACTIVE key.
    fn rotate_from(&self, expected: Option<&str>) -> Result<(), CryptoError> {
        let _guard = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.ring.load_full();
        if current.active().map(|e| e.key.key_id.as_str()) != expected {
            return Ok(());
        }
        let mut next = KeyRing::clone(&current);
        self.promote_new(&mut next, self.clock.utc())?;
        self.ring.store(Arc::new(next));
        Ok(())
    }

    /// Advance every key's lifecycle against the current time.
    pub fn tick(&self) -> Result<RotationReport, CryptoError> {
        let _guard = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.utc();
        let grace = chrono::Duration::days(i64::from(self.config.key_rotation_grace_days));
        let retention = chrono::Duration::days(i64::from(self.config.key_retention_days));

        let current = self.ring.load_full();
        let mut next = KeyRing::clone(&current);
        let mut report = RotationReport::default();
        let mut rotate_active = current.active().is_none();

        for key in current.keys() {
            match key.status {
                KeyStatus::Active => rotate_active |= key.is_due(now),
                KeyStatus::Rotating if key.status_changed_at + grace <= now => {
                    next.set_status(&key.key_id, KeyStatus::Retired, now);
                    report.retired.push(key.key_id.clone());
                }
                KeyStatus::Retired if key.status_changed_at + retention <= now => {
                    next.remove(&key.key_id);
                    report.purged.push(key.key_id.clone());
                }
                _ => {}
            }
        }

        if rotate_active {
            let demoted = current.active().map(|e| e.key.key_id.clone());
            let key = self.promote_new(&mut next, now)?;
            report.generated = Some(key.key_id);
            report.rotating.extend(demoted);
        }

        self.ring.store(Arc::new(next));

        for key_id in &report.retired {
            self.announce(key_id, KeyEvent::Retired);
        }

        // Material goes only after the key left the published ring.
        for key_id in &report.purged {
            match self.custodian.destroy(key_id) {
                Ok(()) => self.announce(key_id, KeyEvent::Purged),
                Err(e) => tracing::error!(key_id = %key_id, error = %e, "Failed to destroy key material"),
            }
        }

        if !report.is_empty() {
            tracing::info!(
                generated = ?report.generated,
                rotating = report.rotating.len(),
                retired = report.retired.len(),
                purged = report.purged.len(),
                "Key rotation tick applied"
            );
        }
        Ok(report)
    }

    /// Metadata of the current ACTIVE key.
    pub fn active_key(&self) -> Option<EncryptionKey> {
        self.ring.load().active().map(|e| e.key.clone())
    }

    /// Metadata of every held key, ordered by key id.
    pub fn keys(&self) -> Vec<EncryptionKey> {
        self.ring.load().keys().cloned().collect()
    }

    /// Encryptions performed under `key_id` so far.
    pub fn usage(&self, key_id: &str) -> Option<u64> {
        self.ring.load().get(key_id).map(|e| e.uses())
    }

    fn promote_new(&self, ring: &mut KeyRing, now: DateTime<Utc>) -> Result<EncryptionKey, CryptoError> {
        let key_id = format!("key-{}", Uuid::new_v4().simple());
        self.custodian.generate(&key_id)?;

        let rotates_at = now + chrono::Duration::days(i64::from(self.config.key_rotation_days));
        let key = EncryptionKey::new(key_id.clone(), now, rotates_at);
        self.announce(&key_id, KeyEvent::Generated);

        if let Some(previous) = ring.promote(key.clone(), now) {
            self.announce(&previous, KeyEvent::Rotating);
        }
        Ok(key)
    }

    fn announce(&self, key_id: &str, transition: KeyEvent) {
        metrics::record_key_event(transition.as_str());
        self.events.emit(SecurityEvent::KeyLifecycle {
            key_id: key_id.to_string(),
            transition,
        });
    }
}

impl std::fmt::Debug for EncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionManager")
            .field("keys", &self.ring.load().len())
            .field("custodian", &self.custodian.name())
            .finish()
    }
}

/// `key_id || 0x00 || context`
fn associated_data(key_id: &str, context: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(key_id.len() + 1 + context.len());
    aad.extend_from_slice(key_id.as_bytes());
    aad.push(0);
    aad.extend_from_slice(context.as_bytes());
    aad
}
