//! Field encryption subsystem.
//!
//! # Data Flow
//! ```text
//! Write path:
//!     sensitive field value
//!     → field.rs   (serialize to bytes, bind "dependency:path" as context)
//!     → manager.rs (ACTIVE key from the published KeyRing, fresh nonce)
//!     → custodian.rs (AES-256-GCM seal with the key material)
//!     → EncryptedField {key_id, alg, nonce, ciphertext, tag}
//!
//! Read path:
//!     EncryptedField
//!     → manager.rs (look up embedded key_id in any non-purged state)
//!     → custodian.rs (open + verify tag, fail closed)
//!     → field value
//! ```
//!
//! # Design Decisions
//! - The manager never touches key material; custodians own it
//! - The key ring is immutable and swapped whole (ArcSwap), so readers never
//!   observe a half-rotated key set
//! - Associated data binds key id and context, so ciphertext moved between
//!   fields or dependencies fails to open

pub mod custodian;
pub mod field;
pub mod key;
pub mod manager;

pub use custodian::{KeyCustodian, LocalCustodian};
pub use field::{decrypt_fields, encrypt_fields, EncryptedField};
pub use key::{EncryptionKey, KeyEvent, KeyMaterial, KeyRing, KeyStatus, ALGORITHM};
pub use manager::{EncryptionManager, RotationReport};

use thiserror::Error;

/// Encryption and key custody errors.
///
/// Messages never include key material or plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("no active encryption key")]
    NoActiveKey,

    #[error("unknown key id '{0}'")]
    UnknownKey(String),

    #[error("authentication failed")]
    Authentication,

    #[error("malformed encrypted field: {0}")]
    Malformed(&'static str),

    #[error("encryption failed")]
    Seal,

    #[error("key custodian error: {0}")]
    Custodian(String),
}
