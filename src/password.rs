//! Password strength gate, secure password generation and the policy that
//! decides where the gate is binding.

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

pub const MIN_STRONG_LENGTH: usize = 12;
pub const DEFAULT_GENERATED_LENGTH: usize = 32;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordStrength {
    pub is_valid: bool,
    /// 0..=5, one point per satisfied rule.
    pub score: u8,
    pub feedback: Vec<String>,
}

impl PasswordStrength {
    fn into_error(self) -> VaultError {
        VaultError::WeakPassword {
            score: self.score,
            feedback: self.feedback,
        }
    }
}

/// Scores one point each for: at least 12 characters, a lowercase letter,
/// an uppercase letter, a digit, and any other character.
///
/// Valid means score >= 4 and length >= 12.
pub fn validate_password(password: &str) -> PasswordStrength {
    let length = password.chars().count();
    let rules: [(bool, &str); 5] = [
        (
            length >= MIN_STRONG_LENGTH,
            "Password should be at least 12 characters long",
        ),
        (
            password.chars().any(|c| c.is_ascii_lowercase()),
            "Include lowercase letters",
        ),
        (
            password.chars().any(|c| c.is_ascii_uppercase()),
            "Include uppercase letters",
        ),
        (password.chars().any(|c| c.is_ascii_digit()), "Include numbers"),
        (
            password.chars().any(|c| !c.is_ascii_alphanumeric()),
            "Include special characters",
        ),
    ];

    let mut score = 0u8;
    let mut feedback = Vec::new();
    for (passed, hint) in rules {
        if passed {
            score += 1;
        } else {
            feedback.push(hint.to_string());
        }
    }

    PasswordStrength {
        is_valid: score >= 4 && length >= MIN_STRONG_LENGTH,
        score,
        feedback,
    }
}

/// Random password over a fixed 70-character alphabet, one OS random byte
/// per character mapped by modulo.
pub fn generate_secure_password(length: usize) -> Result<Zeroizing<String>> {
    if length == 0 {
        return Err(VaultError::InvalidArgument("password length must be > 0".into()));
    }

    let mut bytes = Zeroizing::new(vec![0u8; length]);
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
        tracing::error!(error = %e, "OS random source unavailable");
        VaultError::Entropy
    })?;

    let mut password = Zeroizing::new(String::with_capacity(length));
    for b in bytes.iter() {
        password.push(CHARSET[*b as usize % CHARSET.len()] as char);
    }
    Ok(password)
}

/// Where the strength gate is binding.
///
/// Document encryption has always been gated. Seed export (JSON backup, QR)
/// was advisory only; `enforce_for_seed_export` makes that an explicit
/// choice. The short minimum for backups applies regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordPolicy {
    pub enforce_for_documents: bool,
    pub enforce_for_seed_export: bool,
    pub min_backup_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            enforce_for_documents: true,
            enforce_for_seed_export: false,
            min_backup_length: 6,
        }
    }
}

impl PasswordPolicy {
    /// Every check on, for callers that want the strictest behaviour.
    pub fn strict() -> Self {
        Self {
            enforce_for_documents: true,
            enforce_for_seed_export: true,
            min_backup_length: MIN_STRONG_LENGTH,
        }
    }

    pub fn check_document(&self, password: &str) -> Result<PasswordStrength> {
        let strength = validate_password(password);
        if !strength.is_valid {
            if self.enforce_for_documents {
                return Err(strength.into_error());
            }
            tracing::warn!(score = strength.score, "weak password accepted for document encryption");
        }
        Ok(strength)
    }

    pub fn check_seed_export(&self, password: &str) -> Result<PasswordStrength> {
        let length = password.chars().count();
        if length < self.min_backup_length {
            return Err(VaultError::WeakPassword {
                score: validate_password(password).score,
                feedback: vec![format!(
                    "Password must be at least {} characters long",
                    self.min_backup_length
                )],
            });
        }

        let strength = validate_password(password);
        if !strength.is_valid {
            if self.enforce_for_seed_export {
                return Err(strength.into_error());
            }
            tracing::warn!(score = strength.score, "weak password accepted for seed export");
        }
        Ok(strength)
    }
}
