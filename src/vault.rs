//! Password-based authenticated encryption for locked notes.
//!
//! Keys are derived with PBKDF2-HMAC-SHA-256 and used with AES-256-GCM.
//! Every encryption draws a fresh salt and nonce from the OS RNG.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

/// Locked note content. All three parts are stored independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A derived 256-bit key. The raw bytes are not retained or exposed; the key
/// can only seal and open content.
pub struct VaultKey {
    cipher: Aes256Gcm,
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

impl VaultKey {
    pub fn seal(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        if iv.len() != IV_LEN {
            return Err(Error::InvalidDocument("nonce must be 12 bytes".to_string()));
        }
        self.cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| Error::InvalidDocument("content too large to encrypt".to_string()))
    }

    /// Any failure, including a malformed nonce, is an authentication failure.
    pub fn open(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if iv.len() != IV_LEN {
            return Err(Error::AuthenticationFailure);
        }
        self.cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| Error::AuthenticationFailure)
    }
}

pub fn derive_key(password: &str, salt: &[u8]) -> VaultKey {
    let mut raw = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut raw);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&raw));
    raw.fill(0);
    VaultKey { cipher }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

pub fn encrypt(content: &str, password: &str) -> Result<EncryptedPayload> {
    let salt = random_bytes(SALT_LEN);
    let iv = random_bytes(IV_LEN);
    let key = derive_key(password, &salt);
    let ciphertext = key.seal(&iv, content.as_bytes())?;
    Ok(EncryptedPayload {
        salt,
        iv,
        ciphertext,
    })
}

/// Wrong password, tampering and malformed payloads all yield
/// [`Error::AuthenticationFailure`].
pub fn decrypt(payload: &EncryptedPayload, password: &str) -> Result<String> {
    let key = derive_key(password, &payload.salt);
    let plaintext = key.open(&payload.iv, &payload.ciphertext)?;
    String::from_utf8(plaintext).map_err(|_| Error::AuthenticationFailure)
}
