// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encryption at rest for credential fields.
//!
//! A [`Secret`] is the stored form: hex of `nonce ‖ ciphertext` under
//! AES-256-GCM. The cipher key comes from daemon configuration; when no
//! key is configured a process-local random key is generated, which is
//! fine for tests and means secrets do not survive a restart.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// An encrypted string field. Opaque in snapshots and debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn ciphertext(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(…)")
    }
}

/// Process-wide cipher for encrypted-at-rest fields.
#[derive(Clone)]
pub struct SecretCipher {
    key: Arc<Key<Aes256Gcm>>,
}

impl SecretCipher {
    /// Build from 32 key bytes (hex-decoded from configuration).
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::DatabaseError(format!(
                "encryption key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { key: Arc::new(*Key::<Aes256Gcm>::from_slice(bytes)) })
    }

    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| Error::DatabaseError(format!("encryption key is not hex: {e}")))?;
        Self::from_key_bytes(&bytes)
    }

    /// Fresh random key. Secrets written with it die with the process.
    pub fn ephemeral() -> Self {
        Self { key: Arc::new(Aes256Gcm::generate_key(OsRng)) }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Secret> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::DatabaseError("secret encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(Secret(hex::encode(out)))
    }

    pub fn decrypt(&self, secret: &Secret) -> Result<String> {
        let raw = hex::decode(&secret.0)
            .map_err(|_| Error::DatabaseError("stored secret is not hex".into()))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::DatabaseError("stored secret is truncated".into()));
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::DatabaseError("secret decryption failed (wrong key?)".into()))?;
        String::from_utf8(plain)
            .map_err(|_| Error::DatabaseError("decrypted secret is not UTF-8".into()))
    }
}

/// Generate a random root password for a fresh container.
pub fn generate_password(len: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

#[cfg(test)]
#[path = "secret_tests.rs"]
mod tests;
