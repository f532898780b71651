// crates/phi-gate-queue/src/keys.rs
// ============================================================================
// Module: Queue Key Holder
// Description: AES-256-GCM key material with copy-on-write rotation.
// Purpose: Keep queue entries unreadable at rest inside one trust zone.
// Dependencies: aes-gcm, rand
// ============================================================================

//! ## Overview
//! The key holder owns the symmetric keys that encrypt Input Queue entries.
//! Material is read-only after load; rotation installs a new current key
//! under a writer lock while retaining superseded keys for decryption until
//! their entries drain. Every ciphertext is bound to its entry identifier
//! through the associated data, so an entry cannot be replayed under another
//! identity. Keys never leave process memory.
//!
//! Security posture: ciphertexts and nonces are untrusted on load; a failed
//! tag check is a contract violation, not a retryable fault; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::RwLock;

use aes_gcm::Aes256Gcm;
use aes_gcm::Key;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use aes_gcm::aead::KeyInit;
use aes_gcm::aead::Payload;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the key holder.
///
/// # Invariants
/// - `Integrity` covers both unknown keys and failed tag checks; callers
///   treat it as non-retryable.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Ciphertext failed authentication or referenced an unknown key.
    #[error("queue entry failed decryption")]
    Integrity,
    /// Key holder lock was poisoned.
    #[error("key holder lock poisoned")]
    Lock,
}

// ============================================================================
// SECTION: Key Holder
// ============================================================================

/// Nonce length for AES-256-GCM.
const NONCE_LEN: usize = 12;

/// Sealed queue entry produced by [`QueueKeyHolder::seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEntry {
    /// Identifier of the key that sealed the entry.
    pub key_id: u32,
    /// Unique nonce for the entry.
    pub nonce: Vec<u8>,
    /// Ciphertext with the GCM tag appended.
    pub ciphertext: Vec<u8>,
}

/// Rotating holder for queue encryption keys.
///
/// # Invariants
/// - Exactly one current key; superseded keys remain for decryption only.
/// - Nonces are drawn fresh from the CSPRNG per entry.
pub struct QueueKeyHolder {
    /// Key ring guarded for rotation; reads vastly outnumber writes.
    ring: RwLock<KeyRing>,
}

/// Key material behind the rotation lock.
struct KeyRing {
    /// Identifier of the current sealing key.
    current: u32,
    /// All keys by identifier, including superseded ones.
    keys: BTreeMap<u32, [u8; 32]>,
}

impl QueueKeyHolder {
    /// Creates a holder with one freshly generated key.
    #[must_use]
    pub fn generate() -> Self {
        let mut material = [0_u8; 32];
        OsRng.fill_bytes(&mut material);
        Self {
            ring: RwLock::new(KeyRing {
                current: 1,
                keys: BTreeMap::from([(1, material)]),
            }),
        }
    }

    /// Installs a fresh current key, retaining prior keys for decryption.
    /// Returns the new key identifier.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Lock`] when the rotation lock is poisoned.
    pub fn rotate(&self) -> Result<u32, KeyError> {
        let mut ring = self.ring.write().map_err(|_| KeyError::Lock)?;
        let next_id = ring.current + 1;
        let mut material = [0_u8; 32];
        OsRng.fill_bytes(&mut material);
        ring.keys.insert(next_id, material);
        ring.current = next_id;
        Ok(next_id)
    }

    /// Seals a plaintext under the current key, binding the associated data.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when the lock is poisoned or sealing fails.
    pub fn seal(&self, plaintext: &[u8], associated_data: &[u8]) -> Result<SealedEntry, KeyError> {
        let ring = self.ring.read().map_err(|_| KeyError::Lock)?;
        let key_id = ring.current;
        let material = ring.keys.get(&key_id).ok_or(KeyError::Integrity)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(material));
        let mut nonce = [0_u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| KeyError::Integrity)?;
        Ok(SealedEntry {
            key_id,
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    /// Opens a sealed entry, verifying the tag and associated data.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Integrity`] on unknown keys, malformed nonces, or
    /// failed tag checks.
    pub fn open(&self, sealed: &SealedEntry, associated_data: &[u8]) -> Result<Vec<u8>, KeyError> {
        if sealed.nonce.len() != NONCE_LEN {
            return Err(KeyError::Integrity);
        }
        let ring = self.ring.read().map_err(|_| KeyError::Lock)?;
        let material = ring.keys.get(&sealed.key_id).ok_or(KeyError::Integrity)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(material));
        cipher
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| KeyError::Integrity)
    }
}
