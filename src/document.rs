//! Document encryption into self-describing packages.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams, IV_LEN, SALT_LEN};
use crate::error::Result;
use crate::package::{EncryptedPackage, PackageMetadata};
use crate::password::PasswordPolicy;

const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum DocumentStatus {
    /// Terminal: documents are never re-encrypted in place.
    Encrypted,
}

/// Record describing one encrypted document. The encrypted bytes travel in
/// the package; the optional fields only hold them while the record is live
/// in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedDocument {
    pub id: Uuid,
    pub display_name: String,
    pub original_name: String,
    pub size_label: String,
    pub upload_date: NaiveDate,
    pub encrypted: bool,
    pub integrity_hash: String,
    pub status: DocumentStatus,
    #[serde(skip)]
    pub encrypted_data: Option<Vec<u8>>,
    #[serde(skip)]
    pub salt: Option<[u8; SALT_LEN]>,
    #[serde(skip)]
    pub iv: Option<[u8; IV_LEN]>,
}

impl EncryptedDocument {
    pub fn integrity_label(&self) -> String {
        crypto::integrity_label(&self.integrity_hash)
    }
}

#[derive(Debug)]
pub struct DecryptedDocument {
    pub filename: String,
    pub mime_type: &'static str,
    pub data: Zeroizing<Vec<u8>>,
    /// `None` when the package only carries a shortened hash label.
    pub hash_verified: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentCipher {
    policy: PasswordPolicy,
    kdf: KdfParams,
}

impl DocumentCipher {
    pub fn new(policy: PasswordPolicy) -> Self {
        Self {
            policy,
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Encrypts `data` and returns the record plus the package bytes.
    ///
    /// The password must pass the document side of the policy before any
    /// work is done.
    pub fn encrypt(&self, filename: &str, data: &[u8], password: &str) -> Result<(EncryptedDocument, Vec<u8>)> {
        self.policy.check_document(password)?;

        let sealed = crypto::encrypt_with(data, password, self.kdf)?;
        let metadata = PackageMetadata {
            filename: filename.to_string(),
            original_size: data.len() as u64,
            content_hash: sealed.integrity_hash.clone(),
            timestamp_millis: Utc::now().timestamp_millis(),
        };
        let package = EncryptedPackage::create(&sealed.ciphertext, &sealed.salt, &sealed.iv, &metadata)?;

        let document = EncryptedDocument {
            id: Uuid::new_v4(),
            display_name: filename.to_string(),
            original_name: filename.to_string(),
            size_label: format_file_size(data.len() as u64),
            upload_date: Utc::now().date_naive(),
            encrypted: true,
            integrity_hash: sealed.integrity_hash,
            status: DocumentStatus::Encrypted,
            encrypted_data: Some(sealed.ciphertext),
            salt: Some(sealed.salt),
            iv: Some(sealed.iv),
        };

        tracing::info!(
            id = %document.id,
            size = data.len(),
            package_len = package.len(),
            "document encrypted"
        );
        Ok((document, package))
    }

    pub fn decrypt_package(&self, package: &[u8], password: &str) -> Result<DecryptedDocument> {
        let pkg = EncryptedPackage::extract(package)?;
        let data = crypto::decrypt_with(&pkg.ciphertext, password, &pkg.salt, &pkg.iv, self.kdf)?;

        let hash_verified = is_full_hash(&pkg.metadata.content_hash)
            .then(|| crypto::verify_integrity(&data, &pkg.metadata.content_hash));
        if hash_verified == Some(false) {
            tracing::warn!(filename_len = pkg.metadata.filename.len(), "decrypted document does not match stored hash");
        }

        Ok(DecryptedDocument {
            mime_type: mime_type_for(&pkg.metadata.filename),
            filename: pkg.metadata.filename,
            data,
            hash_verified,
        })
    }
}

fn is_full_hash(hash: &str) -> bool {
    hash.strip_prefix("sha256:")
        .is_some_and(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// `0 Bytes`, `1.5 KB`, `2 MB`... base 1024, at most two decimals, trailing
/// zeros dropped. Sizes past 1024 GB stay in GB.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && unit < UNITS.len() - 1 {
        scaled /= 1024;
        unit += 1;
    }

    let value = bytes as f64 / 1024f64.powi(unit as i32);
    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

/// MIME type from the last `.`-separated component of the name.
pub fn mime_type_for(filename: &str) -> &'static str {
    let extension = filename.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => DEFAULT_MIME,
    }
}
