//! AES-256-GCM encryption of provisioning secrets at rest.
//!
//! Stored format: `base64(nonce || ciphertext || tag)` with a 12-byte nonce.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use forgeops_auth::{SecretDecryptor, TokenError};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {KEY_SIZE} bytes, got {0}")]
    KeyLength(usize),

    #[error("base64 decode failed: {0}")]
    Encoding(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Seals and opens provisioning secrets with a process-wide key.
#[derive(Clone)]
pub struct AesGcmSecretCipher {
    cipher: Aes256Gcm,
}

impl AesGcmSecretCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Build from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let key: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::KeyLength(bytes.len()))?;
        Ok(Self::new(key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    pub fn open(&self, encoded: &str) -> Result<String, CryptoError> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        if sealed.len() <= NONCE_SIZE {
            return Err(CryptoError::Decrypt("sealed value is too short".to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

impl std::fmt::Debug for AesGcmSecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmSecretCipher(..)")
    }
}

impl SecretDecryptor for AesGcmSecretCipher {
    fn decrypt(&self, ciphertext: &str) -> Result<String, TokenError> {
        self.open(ciphertext).map_err(|e| TokenError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> AesGcmSecretCipher {
        AesGcmSecretCipher::new([7u8; KEY_SIZE])
    }

    #[test]
    fn sealed_secret_opens_with_same_key() {
        let c = cipher();
        let sealed = c.encrypt("s3cret-token").unwrap();
        assert_ne!(sealed, "s3cret-token");
        assert_eq!(c.open(&sealed).unwrap(), "s3cret-token");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let c = cipher();
        assert_ne!(c.encrypt("same").unwrap(), c.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = cipher().encrypt("token").unwrap();
        let other = AesGcmSecretCipher::new([8u8; KEY_SIZE]);
        assert!(matches!(other.open(&sealed), Err(CryptoError::Decrypt(_))));
        assert!(matches!(other.decrypt(&sealed), Err(TokenError::Decrypt(_))));
    }

    #[test]
    fn tampered_or_truncated_input_is_rejected() {
        let c = cipher();
        let mut bytes = BASE64.decode(c.encrypt("token").unwrap()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(c.open(&BASE64.encode(&bytes)).is_err());

        assert!(c.open(&BASE64.encode([0u8; NONCE_SIZE])).is_err());
        assert!(matches!(c.open("%%%"), Err(CryptoError::Encoding(_))));
    }

    #[test]
    fn key_from_base64_checks_length() {
        let key = BASE64.encode([1u8; KEY_SIZE]);
        assert!(AesGcmSecretCipher::from_base64(&key).is_ok());

        let short = BASE64.encode([1u8; 16]);
        assert_eq!(
            AesGcmSecretCipher::from_base64(&short).unwrap_err(),
            CryptoError::KeyLength(16)
        );
    }
}
