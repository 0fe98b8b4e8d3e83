//! Seed backup formats and the layered import parser.
//!
//! Three shapes are written or read:
//!
//! - JSON: `{ "type": "wallet-backup", "created": ISO8601, "encryptedSeed": "<salt:iv:ct>" }`
//! - legacy blob: `ENCRYPTED:<salt:iv:ct>`
//! - plain text: numbered `NN. word` lines or one space-separated line
//!
//! Import tries them in that order. Whatever it decodes must come out as 12
//! or 24 words that pass [`validate_mnemonic`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::KdfParams;
use crate::error::{Result, VaultError};
use crate::mnemonic::{normalize_phrase, validate_mnemonic, RESTORABLE_WORD_COUNTS};
use crate::password::PasswordPolicy;
use crate::qr;

pub const BACKUP_TYPE: &str = "wallet-backup";
/// Type tag written by earlier releases; still accepted on import.
pub const LEGACY_BACKUP_TYPE: &str = "bitwill-wallet-backup";
pub const LEGACY_PREFIX: &str = "ENCRYPTED:";

pub const TEXT_HEADER: &str = "BITCOIN SEED PHRASE - KEEP SECURE";
const CREATED_MARKER: &str = "Created:";
const WARNING_MARKER: &str = "WARNING:";
const WARNING_LINES: [&str; 2] = [
    "WARNING: Anyone with access to this seed phrase can access your funds.",
    "Store securely offline and never share with anyone.",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBackup {
    #[serde(rename = "type")]
    pub kind: String,
    pub created: DateTime<Utc>,
    pub encrypted_seed: String,
}

impl WalletBackup {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn is_known_type(&self) -> bool {
        self.kind == BACKUP_TYPE || self.kind == LEGACY_BACKUP_TYPE
    }
}

/// Which import branch produced the phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    Json,
    LegacyEncrypted,
    PlainText,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackupCodec {
    policy: PasswordPolicy,
    kdf: KdfParams,
}

impl BackupCodec {
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

    /// Encrypts `mnemonic` into a JSON backup. The password must pass the
    /// seed-export side of the policy.
    pub fn export_json(&self, mnemonic: &str, password: &str) -> Result<WalletBackup> {
        self.policy.check_seed_export(password)?;
        let phrase = checked_phrase(mnemonic)?;

        let encrypted_seed = qr::encode_qr_payload_with(&phrase, password, self.kdf)?;
        tracing::info!(words = phrase.split(' ').count(), "JSON backup created");

        Ok(WalletBackup {
            kind: BACKUP_TYPE.to_string(),
            created: Utc::now(),
            encrypted_seed,
        })
    }

    /// Recovers a validated, normalized mnemonic from any supported backup.
    ///
    /// `password` is only consulted for the encrypted shapes; passing `None`
    /// for one of those is an [`VaultError::InvalidArgument`].
    pub fn import(&self, text: &str, password: Option<&str>) -> Result<(Zeroizing<String>, BackupFormat)> {
        let trimmed = text.trim();

        let (decoded, format) = if trimmed.starts_with('{') {
            let backup: WalletBackup = serde_json::from_str(trimmed)
                .map_err(|e| VaultError::MalformedPackage(format!("backup JSON: {e}")))?;
            if !backup.is_known_type() {
                return Err(VaultError::MalformedPackage(format!(
                    "unknown backup type '{}'",
                    backup.kind
                )));
            }
            if backup.encrypted_seed.is_empty() {
                return Err(VaultError::MalformedPackage("backup has no encryptedSeed".into()));
            }
            let password = require_password(password)?;
            let seed = qr::decode_qr_payload_with(&backup.encrypted_seed, password, self.kdf)?;
            (seed, BackupFormat::Json)
        } else if let Some(blob) = trimmed.strip_prefix(LEGACY_PREFIX) {
            let password = require_password(password)?;
            let seed = qr::decode_qr_payload_with(blob, password, self.kdf)?;
            (seed, BackupFormat::LegacyEncrypted)
        } else {
            (Zeroizing::new(trimmed.to_string()), BackupFormat::PlainText)
        };

        let phrase = parse_plain_text(&decoded);
        let words = phrase.split(' ').filter(|w| !w.is_empty()).count();
        if !RESTORABLE_WORD_COUNTS.contains(&words) {
            tracing::debug!(words, ?format, "backup rejected: unexpected word count");
            return Err(VaultError::InvalidMnemonic);
        }
        if !validate_mnemonic(&phrase) {
            tracing::debug!(words, ?format, "backup rejected: checksum");
            return Err(VaultError::InvalidMnemonic);
        }

        tracing::info!(words, ?format, "backup imported");
        Ok((phrase, format))
    }
}

/// Whether [`BackupCodec::import`] will need a password for `text`.
pub fn needs_password(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with(LEGACY_PREFIX)
}

fn require_password(password: Option<&str>) -> Result<&str> {
    password.ok_or_else(|| VaultError::InvalidArgument("this backup is encrypted; a password is required".into()))
}

fn checked_phrase(mnemonic: &str) -> Result<Zeroizing<String>> {
    let phrase = Zeroizing::new(normalize_phrase(mnemonic));
    if !validate_mnemonic(&phrase) {
        return Err(VaultError::InvalidMnemonic);
    }
    Ok(phrase)
}

/// Renders `NN. word` lines, 1-indexed and zero-padded to two digits.
///
/// With `created` set, the dump is framed by the header and the warning
/// footer that the import parser knows to skip.
pub fn to_numbered_text(words: &[&str], created: Option<DateTime<Utc>>) -> Zeroizing<String> {
    let mut out = Zeroizing::new(String::new());

    if created.is_some() {
        out.push_str(TEXT_HEADER);
        out.push_str("\n\n");
    }

    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("{:02}. {word}", i + 1));
    }

    if let Some(created) = created {
        out.push_str("\n\n");
        out.push_str(CREATED_MARKER);
        out.push(' ');
        out.push_str(&created.to_rfc3339_opts(SecondsFormat::Millis, true));
        for line in WARNING_LINES {
            out.push('\n');
            out.push_str(line);
        }
    }
    out
}

/// Extracts a normalized phrase from numbered or free-form text.
///
/// Blank lines and the dump's header/footer lines are skipped; a leading
/// `NN.` on a line is stripped. No validation happens here.
pub fn parse_plain_text(text: &str) -> Zeroizing<String> {
    let words: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_marker_line(line))
        .map(strip_number)
        .filter(|word| !word.is_empty())
        .collect();

    Zeroizing::new(normalize_phrase(&words.join(" ")))
}

fn is_marker_line(line: &str) -> bool {
    line.starts_with(TEXT_HEADER)
        || line.starts_with(CREATED_MARKER)
        || line.starts_with(WARNING_MARKER)
        || WARNING_LINES.contains(&line)
}

/// `^\d+\.\s*(.+)$`
fn strip_number(line: &str) -> &str {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return line;
    }
    match line[digits..].strip_prefix('.') {
        Some(rest) if !rest.trim_start().is_empty() => rest.trim_start(),
        _ => line,
    }
}
