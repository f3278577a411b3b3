//! Credential vault: AES-256-GCM encryption for third-party access tokens.
//!
//! Every secret that leaves this module is ciphertext; plaintext tokens are
//! decrypted on demand and never logged or persisted elsewhere.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use service_core::error::AppError;

const NONCE_LEN: usize = 12;

/// Process-wide encryption service. Constructed once at startup from a
/// 32-byte key and read-only afterwards.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("key", &"[REDACTED]").finish()
    }
}

impl Vault {
    pub fn new(key: &[u8]) -> Result<Self, AppError> {
        if key.len() != 32 {
            return Err(AppError::CryptoError(
                "vault key must be exactly 32 bytes".to_string(),
            ));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AppError::CryptoError(format!("failed to build cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Encrypt a plaintext token. Output is base64(nonce || ciphertext) with
    /// a fresh 96-bit nonce per call.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AppError::CryptoError(format!("encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    /// Decrypt a token produced by [`Vault::encrypt`]. An authentication-tag
    /// failure signals tampering or a wrong key and surfaces as
    /// `CryptoError`; garbage is never returned.
    pub fn decrypt(&self, token: &str) -> Result<String, AppError> {
        let payload = BASE64
            .decode(token)
            .map_err(|e| AppError::CryptoError(format!("invalid ciphertext encoding: {e}")))?;
        if payload.len() <= NONCE_LEN {
            return Err(AppError::CryptoError("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::CryptoError("authentication tag mismatch".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::CryptoError(format!("decrypted token is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Vec<u8> {
        vec![7u8; 32]
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            Vault::new(&[0u8; 16]),
            Err(AppError::CryptoError(_))
        ));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let vault = Vault::new(&test_key()).unwrap();
        let token = "access-sandbox-1d6efc1a";

        let ciphertext = vault.encrypt(token).unwrap();
        assert_ne!(ciphertext, token);
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), token);
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let vault = Vault::new(&test_key()).unwrap();
        let a = vault.encrypt("same-token").unwrap();
        let b = vault.encrypt("same-token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let vault = Vault::new(&test_key()).unwrap();
        let ciphertext = vault.encrypt("access-sandbox-1d6efc1a").unwrap();

        let mut raw = BASE64.decode(&ciphertext).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);

        assert!(matches!(
            vault.decrypt(&tampered),
            Err(AppError::CryptoError(_))
        ));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let vault_a = Vault::new(&test_key()).unwrap();
        let vault_b = Vault::new(&[9u8; 32]).unwrap();

        let ciphertext = vault_a.encrypt("access-sandbox-1d6efc1a").unwrap();
        assert!(matches!(
            vault_b.decrypt(&ciphertext),
            Err(AppError::CryptoError(_))
        ));
    }
}
