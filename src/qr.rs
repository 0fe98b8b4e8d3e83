//! QR transport payload: `base64(salt):base64(iv):base64(ciphertext)`.
//!
//! Rendering the string to an image and scanning it back are left to the
//! caller.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams};
use crate::error::{Result, VaultError};

const SEPARATOR: char = ':';

pub fn encode_qr_payload(plaintext: &str, password: &str) -> Result<String> {
    encode_qr_payload_with(plaintext, password, KdfParams::default())
}

pub fn encode_qr_payload_with(plaintext: &str, password: &str, kdf: KdfParams) -> Result<String> {
    let sealed = crypto::encrypt_with(plaintext.as_bytes(), password, kdf)?;
    Ok(format!(
        "{}{SEPARATOR}{}{SEPARATOR}{}",
        STANDARD.encode(sealed.salt),
        STANDARD.encode(sealed.iv),
        STANDARD.encode(&sealed.ciphertext)
    ))
}

pub fn decode_qr_payload(payload: &str, password: &str) -> Result<Zeroizing<String>> {
    decode_qr_payload_with(payload, password, KdfParams::default())
}

/// # Errors
///
/// [`VaultError::MalformedPackage`] if the payload is not three base64
/// fields; [`VaultError::Decryption`] if authentication fails.
pub fn decode_qr_payload_with(payload: &str, password: &str, kdf: KdfParams) -> Result<Zeroizing<String>> {
    let (salt, iv, ciphertext) = split_payload(payload.trim())?;
    let plaintext = crypto::decrypt_with(&ciphertext, password, &salt, &iv, kdf)?;

    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| VaultError::MalformedPackage("payload is not UTF-8 text".into()))?;
    Ok(Zeroizing::new(text.to_owned()))
}

fn split_payload(payload: &str) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let parts: Vec<&str> = payload.split(SEPARATOR).collect();
    let [salt, iv, ciphertext] = parts.as_slice() else {
        return Err(VaultError::MalformedPackage(format!(
            "QR payload has {} fields, expected 3",
            parts.len()
        )));
    };

    let field = |name: &str, value: &str| {
        STANDARD
            .decode(value)
            .map_err(|e| VaultError::MalformedPackage(format!("QR {name}: {e}")))
    };
    Ok((field("salt", *salt)?, field("iv", *iv)?, field("ciphertext", *ciphertext)?))
}
