use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// XChaCha20 nonce length.
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
}

pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Encrypt with XChaCha20-Poly1305 under a fresh random nonce.
///
/// # Returns
/// `nonce (24 bytes) || ciphertext || tag`
pub fn encrypt_message(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of [`encrypt_message`].
pub fn decrypt_message(encrypted_data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if encrypted_data.len() < NONCE_LEN + TAG_LEN {
        return Err(EncryptionError::DecryptionFailed);
    }

    let cipher = cipher_for(key)?;
    let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_LEN);

    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| EncryptionError::DecryptionFailed)
}

/// Deterministic (SIV-style) encryption.
///
/// The nonce is a keyed BLAKE3 hash of `aad || plaintext`, so equal inputs
/// always produce equal ciphertexts. Used for identities and profile keys,
/// which must be comparable without decrypting.
///
/// # Arguments
/// * `plaintext` - Value to encrypt
/// * `key` - 32-byte AEAD key
/// * `siv_key` - 32-byte key for nonce synthesis (independent of `key`)
/// * `aad` - Associated data bound into both nonce and tag
pub fn encrypt_deterministic(
    plaintext: &[u8],
    key: &[u8],
    siv_key: &[u8; 32],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce_bytes = synthetic_nonce(siv_key, aad, plaintext);

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of [`encrypt_deterministic`].
///
/// Besides the AEAD tag, the synthetic nonce is recomputed from the recovered
/// plaintext and compared in constant time.
pub fn decrypt_deterministic(
    encrypted_data: &[u8],
    key: &[u8],
    siv_key: &[u8; 32],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if encrypted_data.len() < NONCE_LEN + TAG_LEN {
        return Err(EncryptionError::DecryptionFailed);
    }

    let cipher = cipher_for(key)?;
    let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_LEN);

    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptionFailed)?;

    let expected = synthetic_nonce(siv_key, aad, &plaintext);
    if !bool::from(expected[..].ct_eq(nonce_bytes)) {
        return Err(EncryptionError::DecryptionFailed);
    }

    Ok(plaintext)
}

/// Derive a 32-byte sub-key from input key material using HKDF-SHA256.
///
/// # Arguments
/// * `ikm` - Input key material (at least 32 bytes)
/// * `info` - Domain separation label (e.g., "ShieldGroups-BlobKey-v1")
pub fn derive_subkey(ikm: &[u8], info: &[u8]) -> Result<[u8; 32]> {
    if ikm.len() < 32 {
        return Err(EncryptionError::InvalidKeyLength);
    }

    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; 32];
    hkdf.expand(info, &mut okm)
        .map_err(|_| EncryptionError::KeyDerivationFailed)?;

    Ok(okm)
}

/// Generate a random 32-byte key
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Fill a fresh buffer of `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != 32 {
        return Err(EncryptionError::InvalidKeyLength);
    }
    XChaCha20Poly1305::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)
}

fn synthetic_nonce(siv_key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> [u8; NONCE_LEN] {
    let mut hasher = blake3::Hasher::new_keyed(siv_key);
    hasher.update(&(aad.len() as u64).to_le_bytes());
    hasher.update(aad);
    hasher.update(plaintext);
    let hash = hasher.finalize();

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&hash.as_bytes()[..NONCE_LEN]);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = generate_key();
        let plaintext = b"Group title";

        let encrypted = encrypt_message(plaintext, &key).unwrap();
        let decrypted = decrypt_message(&encrypted, &key).unwrap();

        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn test_random_nonce_differs() {
        let key = generate_key();
        let a = encrypt_message(b"same", &key).unwrap();
        let b = encrypt_message(b"same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = generate_key();
        let other = generate_key();
        let encrypted = encrypt_message(b"secret", &key).unwrap();
        assert_eq!(
            decrypt_message(&encrypted, &other),
            Err(EncryptionError::DecryptionFailed)
        );
    }

    #[test]
    fn test_short_input_rejected() {
        let key = generate_key();
        assert!(decrypt_message(&[0u8; 10], &key).is_err());
        assert!(decrypt_deterministic(&[0u8; 39], &key, &[1u8; 32], b"").is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        assert_eq!(
            encrypt_message(b"x", &[0u8; 16]),
            Err(EncryptionError::InvalidKeyLength)
        );
    }

    #[test]
    fn test_deterministic_is_stable() {
        let key = generate_key();
        let siv = generate_key();

        let a = encrypt_deterministic(b"identity", &key, &siv, b"ctx").unwrap();
        let b = encrypt_deterministic(b"identity", &key, &siv, b"ctx").unwrap();
        assert_eq!(a, b);

        let c = encrypt_deterministic(b"identity", &key, &siv, b"other").unwrap();
        assert_ne!(a, c);

        let plain = decrypt_deterministic(&a, &key, &siv, b"ctx").unwrap();
        assert_eq!(plain, b"identity");
    }

    #[test]
    fn test_deterministic_wrong_aad_fails() {
        let key = generate_key();
        let siv = generate_key();
        let ct = encrypt_deterministic(b"identity", &key, &siv, b"owner-a").unwrap();
        assert!(decrypt_deterministic(&ct, &key, &siv, b"owner-b").is_err());
    }

    #[test]
    fn test_deterministic_tampered_nonce_fails() {
        let key = generate_key();
        let siv = generate_key();
        let mut ct = encrypt_deterministic(b"identity", &key, &siv, b"").unwrap();
        ct[0] ^= 0x01;
        assert!(decrypt_deterministic(&ct, &key, &siv, b"").is_err());
    }

    #[test]
    fn test_derive_subkey_domain_separated() {
        let ikm = [7u8; 32];
        let a = derive_subkey(&ikm, b"a").unwrap();
        let b = derive_subkey(&ikm, b"b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, derive_subkey(&ikm, b"a").unwrap());
        assert!(derive_subkey(&[0u8; 8], b"a").is_err());
    }
}
