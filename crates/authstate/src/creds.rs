//! Session credential bundle: the root secret material for one session.
//!
//! One mutable [`AuthenticationCreds`] exists per store, created fresh by
//! [`init_auth_creds`] when no stored bundle is found and rewritten in place on
//! every save. Fields serialize with camelCase names so the on-disk JSON
//! matches the record format the wider ecosystem produces.

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::buffer_json::Buffer;

/// A Curve25519 public/private keypair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: Buffer,
    pub private: Buffer,
}

impl KeyPair {
    /// Generate a fresh X25519 keypair for Diffie-Hellman use.
    pub fn generate() -> KeyPair {
        let secret = StaticSecret::from(random_bytes::<32>());
        let public = PublicKey::from(&secret);
        KeyPair {
            public: Buffer::from(*public.as_bytes()),
            private: Buffer::from(secret.to_bytes()),
        }
    }
}

/// A pre-key keypair together with the identity signature over its public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedKeyPair {
    pub key_pair: KeyPair,
    pub signature: Buffer,
    pub key_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    pub unarchive_chats: bool,
}

/// The root credential bundle for one session instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationCreds {
    pub noise_key: KeyPair,
    pub pairing_ephemeral_key_pair: KeyPair,
    /// Ed25519 identity keypair; signs the pre-keys this session publishes.
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedKeyPair,
    pub registration_id: u32,
    /// Account-data verification secret, base64.
    pub adv_secret_key: String,
    #[serde(default)]
    pub processed_history_messages: Vec<serde_json::Value>,
    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    pub account_sync_counter: u32,
    pub account_settings: AccountSettings,
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prop_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_info: Option<Buffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_app_state_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_account_sync_timestamp: Option<u64>,
}

/// Build a fresh default credential bundle for a brand-new session.
///
/// Generates independent noise and pairing X25519 keypairs, an Ed25519
/// identity keypair, and signed pre-key 1 carrying the identity's signature
/// over the pre-key public bytes. The registration ID is drawn from the
/// 14-bit range `1..=16380` the protocol requires.
pub fn init_auth_creds() -> AuthenticationCreds {
    let signing = SigningKey::from_bytes(&random_bytes::<32>());
    let signed_identity_key = KeyPair {
        public: Buffer::from(signing.verifying_key().to_bytes()),
        private: Buffer::from(signing.to_bytes()),
    };

    let pre_key = KeyPair::generate();
    let signature = signing.sign(pre_key.public.as_bytes());
    let signed_pre_key = SignedKeyPair {
        key_pair: pre_key,
        signature: Buffer::from(signature.to_bytes()),
        key_id: 1,
    };

    AuthenticationCreds {
        noise_key: KeyPair::generate(),
        pairing_ephemeral_key_pair: KeyPair::generate(),
        signed_identity_key,
        signed_pre_key,
        registration_id: rand::rng().random_range(1..=16380),
        adv_secret_key: base64::engine::general_purpose::STANDARD.encode(random_bytes::<32>()),
        processed_history_messages: Vec::new(),
        next_pre_key_id: 1,
        first_unuploaded_pre_key_id: 1,
        account_sync_counter: 0,
        account_settings: AccountSettings::default(),
        registered: false,
        pairing_code: None,
        last_prop_hash: None,
        routing_info: None,
        platform: None,
        my_app_state_key_id: None,
        last_account_sync_timestamp: None,
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}
