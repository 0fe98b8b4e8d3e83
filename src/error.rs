//! Error taxonomy shared by every core operation.

use thiserror::Error;

use crate::derivation::DerivationError;
use crate::keys::KeyPairError;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("secure random source unavailable")]
    Entropy,

    #[error("invalid mnemonic phrase")]
    InvalidMnemonic,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Wrong password and tampered data are deliberately indistinguishable.
    #[error("wrong password or corrupted data")]
    Decryption,

    #[error("invalid backup file: {0}")]
    MalformedPackage(String),

    #[error("password too weak (score {score}/5): {}", feedback.join("; "))]
    WeakPassword { score: u8, feedback: Vec<String> },

    #[error("key derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    #[error("operation not allowed in state {actual} (expected {expected})")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<KeyPairError> for VaultError {
    fn from(err: KeyPairError) -> Self {
        match err {
            KeyPairError::Derivation(e) => VaultError::Derivation(e),
            KeyPairError::InvalidSeed => VaultError::Derivation(DerivationError::InvalidParentKey),
            KeyPairError::AddressEncoding => {
                VaultError::Derivation(DerivationError::Encoding("address encoding failed".into()))
            }
        }
    }
}

impl VaultError {
    /// Message suitable for showing to an end user, without internal detail.
    pub fn user_message(&self) -> String {
        match self {
            VaultError::Entropy => "Could not gather secure randomness. Please try again.".into(),
            VaultError::InvalidMnemonic => {
                "Invalid seed phrase. Please check your words and try again.".into()
            }
            VaultError::Decryption => "Invalid password or corrupted data.".into(),
            VaultError::MalformedPackage(_) => "Invalid backup file.".into(),
            VaultError::WeakPassword { feedback, .. } => feedback.join(". "),
            VaultError::Timeout(_) => "The operation took too long and was cancelled.".into(),
            other => other.to_string(),
        }
    }
}
