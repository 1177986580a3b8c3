//! At-rest encryption for serialized records.
//!
//! Active only when the store is opened with a secret. Each record is sealed
//! independently: a fresh 16-byte salt feeds Argon2id to derive a 256-bit key
//! from the secret, and the serialized bytes are encrypted with AES-256-GCM
//! under a fresh 12-byte nonce. The persisted envelope is
//! `salt || nonce || ciphertext+tag`, base64-encoded. Salt and nonce must be
//! freshly random on every call; reuse under the same key breaks
//! confidentiality.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::AuthStateError;

const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12; // 96-bit nonce for AES-256-GCM
const KEY_LENGTH: usize = 32;

/// Seals and opens record payloads with a caller-supplied secret.
pub struct RecordCipher {
    secret: String,
}

impl RecordCipher {
    pub fn new(secret: impl Into<String>) -> Self {
        RecordCipher {
            secret: secret.into(),
        }
    }

    /// Derive a 32-byte key from the secret and a per-record salt via Argon2id.
    fn derive_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LENGTH]>, AuthStateError> {
        let params = argon2::Params::new(65536, 3, 4, Some(KEY_LENGTH))
            .map_err(|e| AuthStateError::Decryption(format!("key derivation failed: {e}")))?;
        let argon2 =
            argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut output = Zeroizing::new([0u8; KEY_LENGTH]);
        argon2
            .hash_password_into(self.secret.as_bytes(), salt, &mut *output)
            .map_err(|e| AuthStateError::Decryption(format!("key derivation failed: {e}")))?;
        Ok(output)
    }

    /// Seal `plaintext` into a base64 `salt || nonce || ciphertext+tag` envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, AuthStateError> {
        let mut salt = [0u8; SALT_LENGTH];
        rand::rng().fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new_from_slice(&*key)
            .map_err(|e| AuthStateError::Decryption(format!("cipher init failed: {e}")))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| AuthStateError::Decryption(format!("encryption failed: {e}")))?;

        let mut envelope = Vec::with_capacity(SALT_LENGTH + NONCE_LENGTH + ciphertext.len());
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(envelope))
    }

    /// Open a base64 envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// A wrong secret or a tampered envelope fails the GCM integrity check and
    /// surfaces as [`AuthStateError::Decryption`].
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, AuthStateError> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(envelope)
            .map_err(|e| AuthStateError::Decryption(format!("malformed envelope: {e}")))?;

        if data.len() < SALT_LENGTH + NONCE_LENGTH {
            return Err(AuthStateError::Decryption(
                "envelope too short to contain salt and nonce".into(),
            ));
        }
        let (salt, rest) = data.split_at(SALT_LENGTH);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LENGTH);

        let key = self.derive_key(salt)?;
        let cipher = Aes256Gcm::new_from_slice(&*key)
            .map_err(|e| AuthStateError::Decryption(format!("cipher init failed: {e}")))?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AuthStateError::Decryption("wrong secret or tampered envelope".into()))
    }
}
