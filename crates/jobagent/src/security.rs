//! Authenticated encryption for stored site credentials.
//!
//! Passwords are stored as a versioned envelope
//! `enc:v1:<nonce_b64>:<ciphertext_b64>` produced with ChaCha20-Poly1305
//! under a process-wide 32-byte key. A failed decryption is a hard error,
//! never an empty string.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use secrecy::SecretString;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_SIZE: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key must be a 32-byte base64 value, got {0} bytes")]
    BadKeyLength(usize),
    #[error("encryption key is not valid base64")]
    BadKeyEncoding,
    #[error("stored credential envelope is invalid")]
    BadEnvelope,
    #[error("failed to encrypt credential: {0}")]
    Encrypt(String),
    #[error("failed to decrypt credential: {0}")]
    Decrypt(String),
}

#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    /// Build a cipher from a base64-encoded 32-byte key (URL-safe alphabet,
    /// with a standard-alphabet fallback for keys generated elsewhere).
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let trimmed = encoded.trim();
        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed.trim_end_matches('='))
            .or_else(|_| STANDARD.decode(trimmed))
            .map_err(|_| CryptoError::BadKeyEncoding)?;

        if bytes.len() != 32 {
            return Err(CryptoError::BadKeyLength(bytes.len()));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self::from_bytes(key))
    }

    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        let ciphertext = aead
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> Result<SecretString, CryptoError> {
        let rest = stored
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or(CryptoError::BadEnvelope)?;

        let mut parts = rest.split(':');
        let nonce_b64 = parts.next().ok_or(CryptoError::BadEnvelope)?;
        let ciphertext_b64 = parts.next().ok_or(CryptoError::BadEnvelope)?;
        if parts.next().is_some() {
            return Err(CryptoError::BadEnvelope);
        }

        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .map_err(|_| CryptoError::BadEnvelope)?;
        if nonce_raw.len() != NONCE_SIZE {
            return Err(CryptoError::BadEnvelope);
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64)
            .map_err(|_| CryptoError::BadEnvelope)?;

        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        let plaintext = aead
            .decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_ref())
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        let text =
            String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt("invalid utf8".into()))?;
        Ok(SecretString::from(text))
    }
}

/// Deduplication hash for a role posting: SHA-256 over the normalized
/// company name and title.
pub fn role_unique_hash(company: &str, title: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(company.trim().to_lowercase().as_bytes());
    hasher.update(b"-");
    hasher.update(title.trim().to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn test_cipher() -> CredentialCipher {
        let key = URL_SAFE_NO_PAD.encode([7u8; 32]);
        CredentialCipher::from_base64(&key).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("hunter2").unwrap();

        assert!(stored.starts_with("enc:v1:"));
        assert!(!stored.contains("hunter2"));

        let plain = cipher.decrypt(&stored).unwrap();
        assert_eq!(plain.expose_secret(), "hunter2");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("hunter2").unwrap();

        let mut tampered = stored.clone();
        tampered.pop();
        tampered.push(if stored.ends_with('A') { 'B' } else { 'A' });

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("hunter2").unwrap();

        let other = CredentialCipher::from_base64(&URL_SAFE_NO_PAD.encode([9u8; 32])).unwrap();
        assert!(other.decrypt(&stored).is_err());
    }

    #[test]
    fn short_key_is_rejected() {
        let short = URL_SAFE_NO_PAD.encode([1u8; 16]);
        assert!(matches!(
            CredentialCipher::from_base64(&short),
            Err(CryptoError::BadKeyLength(16))
        ));
    }

    #[test]
    fn unique_hash_normalizes_case_and_whitespace() {
        let a = role_unique_hash("  Acme Corp ", "Staff Engineer");
        let b = role_unique_hash("acme corp", "  staff engineer");
        assert_eq!(a, b);

        let c = role_unique_hash("acme corp", "senior engineer");
        assert_ne!(a, c);
    }
}
