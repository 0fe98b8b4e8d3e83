//! Vault configuration.
//!
//! Resolution order: built-in defaults, then a JSON config file, then CLI
//! overrides.
//!
//! Example `bitwill.json`:
//! ```json
//! {
//!   "data_dir": "/home/alice/.local/share/bitwill",
//!   "network": "test",
//!   "account_count": 5,
//!   "address_type": "p2wpkh",
//!   "encrypt_at_rest": true,
//!   "password_policy": { "enforce_for_seed_export": true },
//!   "kdf_timeout_secs": 60
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::keys::AddressType;
use crate::password::PasswordPolicy;
use crate::wallet::{Network, WalletOptions};

pub const DEFAULT_ACCOUNT_COUNT: u32 = 3;
pub const DEFAULT_KDF_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Config file (JSON)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfigFile {
    pub data_dir: Option<PathBuf>,
    pub network: Option<Network>,
    pub account_count: Option<u32>,
    pub address_type: Option<AddressType>,
    pub encrypt_at_rest: Option<bool>,
    pub password_policy: Option<PasswordPolicy>,
    pub kdf_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved config (all defaults applied)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    pub network: Network,
    pub account_count: u32,
    pub address_type: AddressType,
    pub encrypt_at_rest: bool,
    pub password_policy: PasswordPolicy,
    pub kdf_timeout_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            network: Network::default(),
            account_count: DEFAULT_ACCOUNT_COUNT,
            address_type: AddressType::default(),
            encrypt_at_rest: false,
            password_policy: PasswordPolicy::default(),
            kdf_timeout_secs: DEFAULT_KDF_TIMEOUT_SECS,
        }
    }
}

/// Values given on the command line. `None` keeps whatever the file or the
/// defaults said.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub network: Option<Network>,
    pub address_type: Option<AddressType>,
    pub account_count: Option<u32>,
}

impl VaultConfig {
    pub fn from_file(file: VaultConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            data_dir: file.data_dir.unwrap_or(defaults.data_dir),
            network: file.network.unwrap_or(defaults.network),
            account_count: file.account_count.unwrap_or(defaults.account_count),
            address_type: file.address_type.unwrap_or(defaults.address_type),
            encrypt_at_rest: file.encrypt_at_rest.unwrap_or(defaults.encrypt_at_rest),
            password_policy: file.password_policy.unwrap_or(defaults.password_policy),
            kdf_timeout_secs: file.kdf_timeout_secs.unwrap_or(defaults.kdf_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads and resolves a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: VaultConfigFile = serde_json::from_str(&text)
            .map_err(|e| VaultError::InvalidArgument(format!("config {}: {e}", path.display())))?;
        let config = Self::from_file(file)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Defaults when `path` is `None`, the file otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn merge(mut self, overrides: &ConfigOverrides) -> Result<Self> {
        if let Some(ref dir) = overrides.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(network) = overrides.network {
            self.network = network;
        }
        if let Some(address_type) = overrides.address_type {
            self.address_type = address_type;
        }
        if let Some(count) = overrides.account_count {
            self.account_count = count;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.account_count < 1 {
            return Err(VaultError::InvalidArgument("account_count must be at least 1".into()));
        }
        if self.kdf_timeout_secs == 0 {
            return Err(VaultError::InvalidArgument("kdf_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn kdf_timeout(&self) -> Duration {
        Duration::from_secs(self.kdf_timeout_secs)
    }

    pub fn wallet_options(&self) -> WalletOptions {
        WalletOptions {
            network: self.network,
            address_type: self.address_type,
            ..WalletOptions::default()
        }
    }
}

/// Platform data directory, or `./.bitwill` when none can be determined.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "bitwill")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".bitwill"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults() {
        let c = VaultConfig::default();
        assert_eq!(c.network, Network::Main);
        assert_eq!(c.account_count, 3);
        assert_eq!(c.address_type, AddressType::P2PKH);
        assert!(!c.encrypt_at_rest);
        assert!(c.password_policy.enforce_for_documents);
        assert!(!c.password_policy.enforce_for_seed_export);
        assert_eq!(c.password_policy.min_backup_length, 6);
        assert_eq!(c.kdf_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bitwill.json");
        std::fs::write(
            &path,
            r#"{
                "data_dir": "/tmp/bw",
                "network": "test",
                "address_type": "p2wpkh",
                "password_policy": { "enforce_for_seed_export": true }
            }"#,
        )
        .unwrap();

        let c = VaultConfig::load(&path).unwrap();
        assert_eq!(c.data_dir, PathBuf::from("/tmp/bw"));
        assert_eq!(c.network, Network::Test);
        assert_eq!(c.address_type, AddressType::P2WPKH);
        assert!(c.password_policy.enforce_for_seed_export);
        // unspecified policy fields keep their defaults
        assert!(c.password_policy.enforce_for_documents);
        assert_eq!(c.account_count, 3);
    }

    #[test]
    fn unknown_fields_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "netwrok": "test" }"#).unwrap();
        assert!(matches!(
            VaultConfig::load(&path),
            Err(VaultError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cli_overrides_file() {
        let base = VaultConfig::from_file(VaultConfigFile {
            network: Some(Network::Test),
            account_count: Some(5),
            ..VaultConfigFile::default()
        })
        .unwrap();

        let merged = base
            .merge(&ConfigOverrides {
                network: Some(Network::Main),
                data_dir: Some(PathBuf::from("/data")),
                ..ConfigOverrides::default()
            })
            .unwrap();
        assert_eq!(merged.network, Network::Main);
        assert_eq!(merged.account_count, 5);
        assert_eq!(merged.data_dir, PathBuf::from("/data"));
    }

    #[test]
    fn zero_accounts_rejected() {
        let file = VaultConfigFile {
            account_count: Some(0),
            ..VaultConfigFile::default()
        };
        assert!(VaultConfig::from_file(file).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            VaultConfig::load(&dir.path().join("absent.json")),
            Err(VaultError::Io(_))
        ));
    }
}
