//! Password-based authenticated encryption of secrets.
//!
//! PBKDF2-HMAC-SHA256 (100 000 iterations) derives a 256-bit key from the
//! password and a fresh 16-byte salt; AES-256-GCM with a fresh 12-byte IV
//! seals the payload. The GCM tag is appended to the ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::mnemonic::generate_entropy;

/// Length of the PBKDF2 salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the AES-GCM IV (12 bytes).
pub const IV_LEN: usize = 12;
/// Length of the derived key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;
/// PBKDF2 iteration count used by every artifact this crate writes.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const HASH_PREFIX: &str = "sha256:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations < 1 {
            return Err(VaultError::InvalidArgument(
                "PBKDF2 iterations must be >= 1".into(),
            ));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

/// Output of [`encrypt`]: everything needed to decrypt, plus a hash of the
/// plaintext for out-of-band verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    /// `sha256:<64 hex chars>` of the plaintext.
    pub integrity_hash: String,
}

pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let bytes = generate_entropy(SALT_LEN)?;
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes);
    Ok(salt)
}

pub fn generate_iv() -> Result<[u8; IV_LEN]> {
    let bytes = generate_entropy(IV_LEN)?;
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&bytes);
    Ok(iv)
}

/// Derive encryption key from password. Pure in (password, salt).
pub fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    derive_key_with(password, salt, KdfParams::default())
}

pub fn derive_key_with(password: &str, salt: &[u8], kdf: KdfParams) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, kdf.iterations, key.as_mut());
    key
}

/// AES-256-GCM with an already derived key.
pub fn seal(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| VaultError::InvalidArgument("bad key length".into()))?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| VaultError::InvalidArgument("plaintext too large for AES-GCM".into()))
}

/// Inverse of [`seal`]. Any authentication failure is [`VaultError::Decryption`].
pub fn open(key: &[u8; KEY_LEN], iv: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if iv.len() != IV_LEN || ciphertext.len() < TAG_LEN {
        return Err(VaultError::Decryption);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::Decryption)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::Decryption)
}

/// Encrypts with fresh salt and IV drawn for this call only.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<EncryptedSecret> {
    encrypt_with(plaintext, password, KdfParams::default())
}

pub fn encrypt_with(plaintext: &[u8], password: &str, kdf: KdfParams) -> Result<EncryptedSecret> {
    tracing::debug!(plaintext_len = plaintext.len(), iterations = kdf.iterations, "encrypting secret");

    let salt = generate_salt()?;
    let iv = generate_iv()?;
    let key = derive_key_with(password, &salt, kdf);
    let ciphertext = seal(&key, &iv, plaintext)?;

    Ok(EncryptedSecret {
        ciphertext,
        salt,
        iv,
        integrity_hash: integrity_hash(plaintext),
    })
}

/// Wrong password, altered salt/IV and altered ciphertext all surface as the
/// same [`VaultError::Decryption`].
pub fn decrypt(ciphertext: &[u8], password: &str, salt: &[u8], iv: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    decrypt_with(ciphertext, password, salt, iv, KdfParams::default())
}

pub fn decrypt_with(
    ciphertext: &[u8],
    password: &str,
    salt: &[u8],
    iv: &[u8],
    kdf: KdfParams,
) -> Result<Zeroizing<Vec<u8>>> {
    tracing::debug!(
        ciphertext_len = ciphertext.len(),
        salt_len = salt.len(),
        iv_len = iv.len(),
        "decrypting secret"
    );
    let key = derive_key_with(password, salt, kdf);
    open(&key, iv, ciphertext).map_err(|err| {
        tracing::warn!(ciphertext_len = ciphertext.len(), "decryption failed");
        err
    })
}

/// `sha256:` followed by the full lowercase hex digest.
pub fn integrity_hash(data: &[u8]) -> String {
    format!("{HASH_PREFIX}{}", hex::encode(Sha256::digest(data)))
}

/// Short display form: `sha256:<first 16 hex>...`.
pub fn integrity_label(hash: &str) -> String {
    let hex = hash.strip_prefix(HASH_PREFIX).unwrap_or(hash);
    let short: String = hex.chars().take(16).collect();
    format!("{HASH_PREFIX}{short}...")
}

pub fn verify_integrity(plaintext: &[u8], expected: &str) -> bool {
    integrity_hash(plaintext) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams::new(1_000).unwrap()
    }

    #[test]
    fn pbkdf2_matches_rfc_vector() {
        let key = derive_key_with("password", b"salt", KdfParams::new(4096).unwrap());
        assert_eq!(
            hex::encode(*key),
            "c5e478d59288c841aa530db6845c4c8d962893a001ce4e11a4963873aa98134a"
        );
    }

    #[test]
    fn derive_key_is_pure() {
        let salt = [42u8; SALT_LEN];
        assert_eq!(*derive_key("pw", &salt), *derive_key("pw", &salt));
        assert_ne!(*derive_key("pw", &salt), *derive_key("pw", &[43u8; SALT_LEN]));
    }

    #[test]
    fn encrypt_decrypt_roundtrip_default_params() {
        let secret = encrypt(b"secret data", "correct horse battery staple!").unwrap();
        assert_eq!(secret.ciphertext.len(), b"secret data".len() + TAG_LEN);
        let plain = decrypt(&secret.ciphertext, "correct horse battery staple!", &secret.salt, &secret.iv).unwrap();
        assert_eq!(plain.as_slice(), b"secret data");
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let secret = encrypt_with(b"", "pw", fast()).unwrap();
        let plain = decrypt_with(&secret.ciphertext, "pw", &secret.salt, &secret.iv, fast()).unwrap();
        assert!(plain.is_empty());
    }

    #[test]
    fn salt_and_iv_are_fresh_per_call() {
        let a = encrypt_with(b"same", "pw", fast()).unwrap();
        let b = encrypt_with(b"same", "pw", fast()).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(a.integrity_hash, b.integrity_hash);
    }

    #[test]
    fn wrong_password_is_decryption_error() {
        let s = encrypt_with(b"data", "right", fast()).unwrap();
        assert!(matches!(
            decrypt_with(&s.ciphertext, "wrong", &s.salt, &s.iv, fast()),
            Err(VaultError::Decryption)
        ));
    }

    #[test]
    fn any_flipped_byte_is_detected() {
        let s = encrypt_with(b"tamper evident", "pw", fast()).unwrap();

        for i in 0..s.ciphertext.len() {
            let mut ct = s.ciphertext.clone();
            ct[i] ^= 0x01;
            assert!(matches!(
                decrypt_with(&ct, "pw", &s.salt, &s.iv, fast()),
                Err(VaultError::Decryption)
            ));
        }
        for i in 0..SALT_LEN {
            let mut salt = s.salt;
            salt[i] ^= 0x80;
            assert!(decrypt_with(&s.ciphertext, "pw", &salt, &s.iv, fast()).is_err());
        }
        for i in 0..IV_LEN {
            let mut iv = s.iv;
            iv[i] ^= 0x80;
            assert!(decrypt_with(&s.ciphertext, "pw", &s.salt, &iv, fast()).is_err());
        }
    }

    #[test]
    fn truncated_inputs_fail_cleanly() {
        let s = encrypt_with(b"x", "pw", fast()).unwrap();
        assert!(matches!(
            decrypt_with(&s.ciphertext[..TAG_LEN - 1], "pw", &s.salt, &s.iv, fast()),
            Err(VaultError::Decryption)
        ));
        assert!(matches!(
            decrypt_with(&s.ciphertext, "pw", &s.salt, &s.iv[..8], fast()),
            Err(VaultError::Decryption)
        ));
    }

    #[test]
    fn integrity_hash_covers_plaintext() {
        let s = encrypt_with(b"abc", "pw", fast()).unwrap();
        assert_eq!(
            s.integrity_hash,
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(verify_integrity(b"abc", &s.integrity_hash));
        assert!(!verify_integrity(b"abd", &s.integrity_hash));
        assert_eq!(integrity_label(&s.integrity_hash), "sha256:ba7816bf8f01cfea...");
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(KdfParams::new(0).is_err());
    }
}
