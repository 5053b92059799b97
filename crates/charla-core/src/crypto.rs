//! Encryption at rest for MCP headers and credential secrets.
//!
//! AES-256-GCM with a random 96-bit nonce prepended to the ciphertext,
//! base64-encoded. The key is derived once from the configured secret;
//! rotating it is a restart operation.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::error;

use crate::error::{CharlaError, Result};

const NONCE_LEN: usize = 12;

/// Process-wide symmetric cipher for sensitive persisted fields.
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Derive the AES key from an operator-supplied secret of any length.
    pub fn new(secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).expect("SHA-256 digest is a valid AES-256 key");
        Self { cipher }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CharlaError::Crypto(format!("encrypt failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|e| CharlaError::Crypto(format!("invalid base64: {e}")))?;
        if combined.len() <= NONCE_LEN {
            return Err(CharlaError::Crypto("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CharlaError::Crypto("decryption failed (wrong key or corrupt data)".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CharlaError::Crypto("decrypted payload is not UTF-8".to_string()))
    }

    /// Encrypt a header map as JSON.
    ///
    /// On failure the error is logged and an encrypted empty map is
    /// stored instead — plaintext never reaches the database.
    pub fn encrypt_map(&self, map: &HashMap<String, String>) -> String {
        let json = serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string());
        match self.encrypt(&json) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "header encryption failed, storing empty map");
                self.encrypt("{}").unwrap_or_default()
            }
        }
    }

    /// Decrypt a persisted header map.
    ///
    /// Returns `None` on any failure (wrong key, corrupt payload, bad
    /// JSON) — callers must treat the headers as absent, never garbled.
    pub fn decrypt_map(&self, encoded: &str) -> Option<HashMap<String, String>> {
        if encoded.is_empty() {
            return Some(HashMap::new());
        }
        let json = self.decrypt(encoded).ok()?;
        serde_json::from_str(&json).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_headers() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("Authorization".to_string(), "Bearer tok-123".to_string());
        map.insert("X-Workspace".to_string(), "acme".to_string());
        map
    }

    #[test]
    fn roundtrip() {
        let secret_box = SecretBox::new("unit-test-key");
        let encrypted = secret_box.encrypt("hola mundo").unwrap();
        assert_ne!(encrypted, "hola mundo");
        assert_eq!(secret_box.decrypt(&encrypted).unwrap(), "hola mundo");
    }

    #[test]
    fn nonce_makes_ciphertexts_differ() {
        let secret_box = SecretBox::new("unit-test-key");
        let a = secret_box.encrypt("same input").unwrap();
        let b = secret_box.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn map_roundtrip() {
        let secret_box = SecretBox::new("unit-test-key");
        let headers = sample_headers();
        let encrypted = secret_box.encrypt_map(&headers);
        assert_eq!(secret_box.decrypt_map(&encrypted), Some(headers));
    }

    #[test]
    fn wrong_key_yields_none_not_garbage() {
        let secret_box = SecretBox::new("right-key");
        let encrypted = secret_box.encrypt_map(&sample_headers());

        let other = SecretBox::new("wrong-key");
        assert!(other.decrypt(&encrypted).is_err());
        assert_eq!(other.decrypt_map(&encrypted), None);
    }

    #[test]
    fn empty_string_is_an_empty_map() {
        let secret_box = SecretBox::new("k");
        assert_eq!(secret_box.decrypt_map(""), Some(HashMap::new()));
    }
}
