//! Self-describing encrypted package.
//!
//! ```text
//! SALT (16) | IV (12) | METADATA_LEN (4, LE) | METADATA (JSON) | CIPHERTEXT
//! ```

use serde::{Deserialize, Serialize};

use crate::crypto::{IV_LEN, SALT_LEN};
use crate::error::{Result, VaultError};

const LEN_LEN: usize = 4;

/// Fixed-size prefix before the metadata bytes.
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN + LEN_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub filename: String,
    pub original_size: u64,
    /// `sha256:<hex>` of the plaintext.
    #[serde(rename = "hash", alias = "contentHash")]
    pub content_hash: String,
    #[serde(rename = "timestamp", alias = "timestampMillis")]
    pub timestamp_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPackage {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub metadata: PackageMetadata,
    pub ciphertext: Vec<u8>,
}

impl EncryptedPackage {
    /// Lays out the package bytes. Deterministic for identical inputs.
    pub fn create(
        ciphertext: &[u8],
        salt: &[u8; SALT_LEN],
        iv: &[u8; IV_LEN],
        metadata: &PackageMetadata,
    ) -> Result<Vec<u8>> {
        let metadata_bytes = serde_json::to_vec(metadata)?;
        let metadata_len = u32::try_from(metadata_bytes.len())
            .map_err(|_| VaultError::InvalidArgument("package metadata too large".into()))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + metadata_bytes.len() + ciphertext.len());
        buf.extend_from_slice(salt);
        buf.extend_from_slice(iv);
        buf.extend_from_slice(&metadata_len.to_le_bytes());
        buf.extend_from_slice(&metadata_bytes);
        buf.extend_from_slice(ciphertext);

        tracing::debug!(
            metadata_len,
            ciphertext_len = ciphertext.len(),
            "encrypted package created"
        );
        Ok(buf)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Self::create(&self.ciphertext, &self.salt, &self.iv, &self.metadata)
    }

    /// Inverse of [`EncryptedPackage::create`].
    ///
    /// # Errors
    ///
    /// [`VaultError::MalformedPackage`] if the fixed fields are truncated, the
    /// declared metadata length runs past the buffer, or the metadata is not
    /// valid JSON.
    pub fn extract(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(VaultError::MalformedPackage(format!(
                "package is {} bytes, header needs {HEADER_LEN}",
                data.len()
            )));
        }

        let mut offset = 0;

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&data[offset..offset + SALT_LEN]);
        offset += SALT_LEN;

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&data[offset..offset + IV_LEN]);
        offset += IV_LEN;

        let mut len_bytes = [0u8; LEN_LEN];
        len_bytes.copy_from_slice(&data[offset..offset + LEN_LEN]);
        let metadata_len = u32::from_le_bytes(len_bytes) as usize;
        offset += LEN_LEN;

        let remaining = data.len() - offset;
        if metadata_len > remaining {
            return Err(VaultError::MalformedPackage(format!(
                "metadata length {metadata_len} exceeds remaining {remaining} bytes"
            )));
        }

        let metadata: PackageMetadata = serde_json::from_slice(&data[offset..offset + metadata_len])
            .map_err(|e| VaultError::MalformedPackage(format!("metadata: {e}")))?;
        offset += metadata_len;

        Ok(Self {
            salt,
            iv,
            metadata,
            ciphertext: data[offset..].to_vec(),
        })
    }
}
