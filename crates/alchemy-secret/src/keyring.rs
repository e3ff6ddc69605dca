use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::error::SecretError;
use crate::secret::SecretEnvelope;

/// OWASP 2023 minimum recommendation for PBKDF2-HMAC-SHA256.
const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// A derived symmetric key for one passphrase, scoped to one install's salt.
#[derive(Clone)]
pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    pub fn derive(passphrase: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        DerivedKey(key)
    }
}

/// Reads or creates the per-install salt file at `{state_root}/.salt`.
pub fn load_or_create_salt(state_root: &Path) -> Result<Vec<u8>, SecretError> {
    let salt_path: PathBuf = state_root.join(".salt");
    if let Ok(existing) = std::fs::read(&salt_path) {
        return Ok(existing);
    }
    std::fs::create_dir_all(state_root)?;
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    std::fs::write(&salt_path, &salt)?;
    Ok(salt)
}

/// Encrypts `plaintext` under `key`, generating a fresh random nonce.
pub fn encrypt(plaintext: &str, key: &DerivedKey) -> SecretEnvelope {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    // Only fails on buffer/size constraints we never hit with a fixed-size key/nonce.
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("aes-256-gcm encryption with valid key/nonce cannot fail");
    SecretEnvelope {
        type_tag: SecretEnvelope::TYPE_TAG.to_string(),
        alg: SecretEnvelope::ALG.to_string(),
        nonce: B64.encode(nonce_bytes),
        ciphertext: B64.encode(ciphertext),
    }
}

/// Decrypts `envelope` under `key`.
pub fn decrypt(envelope: &SecretEnvelope, key: &DerivedKey) -> Result<String, SecretError> {
    if envelope.alg != SecretEnvelope::ALG {
        return Err(SecretError::UnsupportedAlg(envelope.alg.clone()));
    }
    let nonce_bytes = B64
        .decode(&envelope.nonce)
        .map_err(|e| SecretError::MalformedEnvelope(e.to_string()))?;
    let ciphertext = B64
        .decode(&envelope.ciphertext)
        .map_err(|e| SecretError::MalformedEnvelope(e.to_string()))?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| SecretError::DecryptFailed)?;
    String::from_utf8(plaintext).map_err(|e| SecretError::MalformedEnvelope(e.to_string()))
}

/// Re-encrypts `envelope` under `new_key`, having decrypted it under `old_key`.
pub fn rotate(
    envelope: &SecretEnvelope,
    old_key: &DerivedKey,
    new_key: &DerivedKey,
) -> Result<SecretEnvelope, SecretError> {
    let plaintext = decrypt(envelope, old_key)?;
    Ok(encrypt(&plaintext, new_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let salt = b"fixed-test-salt-".to_vec();
        let key = DerivedKey::derive("hunter2", &salt);
        let env = encrypt("top secret value", &key);
        let back = decrypt(&env, &key).unwrap();
        assert_eq!(back, "top secret value");
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let salt = b"fixed-test-salt-".to_vec();
        let key = DerivedKey::derive("hunter2", &salt);
        let wrong_key = DerivedKey::derive("wrong", &salt);
        let env = encrypt("top secret value", &key);
        let err = decrypt(&env, &wrong_key).unwrap_err();
        assert!(matches!(err, SecretError::DecryptFailed));
    }

    #[test]
    fn rotate_re_encrypts_under_new_key() {
        let salt = b"fixed-test-salt-".to_vec();
        let old_key = DerivedKey::derive("old-pass", &salt);
        let new_key = DerivedKey::derive("new-pass", &salt);
        let env = encrypt("rotate me", &old_key);
        let rotated = rotate(&env, &old_key, &new_key).unwrap();
        assert!(decrypt(&rotated, &old_key).is_err());
        assert_eq!(decrypt(&rotated, &new_key).unwrap(), "rotate me");
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let salt = b"fixed-test-salt-".to_vec();
        let key = DerivedKey::derive("hunter2", &salt);
        let a = encrypt("same plaintext", &key);
        let b = encrypt("same plaintext", &key);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn load_or_create_salt_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_salt(dir.path()).unwrap();
        let second = load_or_create_salt(dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
