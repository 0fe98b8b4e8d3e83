//! Client-side custody core: BIP-39 seed phrases, BIP-32/44 account
//! derivation, password-based secret encryption and the backup codecs that
//! move secrets in and out.

pub mod amount;
pub mod backup;
pub mod config;
pub mod crypto;
pub mod derivation;
pub mod document;
pub mod error;
pub mod keys;
pub mod mnemonic;
pub mod package;
pub mod password;
pub mod qr;
pub mod session;
pub mod storage;
pub mod wallet;

pub use amount::{format_btc, to_satoshis, SATS_PER_BTC};
pub use backup::{BackupCodec, BackupFormat, WalletBackup};
pub use config::VaultConfig;
pub use crypto::{decrypt, derive_key, encrypt, EncryptedSecret};
pub use document::{DocumentCipher, EncryptedDocument};
pub use error::{Result, VaultError};
pub use keys::AddressType;
pub use mnemonic::{
    generate_entropy,
    generate_mnemonic,
    validate_mnemonic,
    MnemonicStrength,
    NonceMixing,
    SecureMnemonic,
};
pub use package::{EncryptedPackage, PackageMetadata};
pub use password::{generate_secure_password, validate_password, PasswordPolicy, PasswordStrength};
pub use qr::{decode_qr_payload, encode_qr_payload};
pub use session::{SessionConfig, SessionState, WalletSession};
pub use storage::{EncryptedFileStore, JsonFileStore, MemoryStore, WalletStore};
pub use wallet::{create_wallet_from_mnemonic, Account, Branch, Network, Wallet, WalletOptions};
