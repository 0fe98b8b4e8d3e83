//! Wallet and account records and their deterministic derivation.
//!
//! Accounts live at `m/purpose'/coin'/0'/branch/index`. The purpose follows
//! the address type (44, 49 or 84), the coin type follows the network, and
//! `index` increases by one per account.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, Zeroizing};

use crate::derivation::paths;
use crate::error::{Result, VaultError};
use crate::keys::{AddressType, KeyPair};
use crate::mnemonic::SecureMnemonic;

pub use crate::keys::Network;

/// External (receive) or internal (change) chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    #[default]
    External,
    Internal,
}

impl Branch {
    pub fn index(self) -> u32 {
        match self {
            Branch::External => 0,
            Branch::Internal => 1,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Branch::External => write!(f, "external"),
            Branch::Internal => write!(f, "internal"),
        }
    }
}

impl FromStr for Branch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "external" | "receive" | "0" => Ok(Branch::External),
            "internal" | "change" | "1" => Ok(Branch::Internal),
            other => Err(format!("unknown branch '{other}'")),
        }
    }
}

/// Derivation parameters that, together with the mnemonic, fully determine
/// a wallet's accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalletOptions {
    pub network: Network,
    pub address_type: AddressType,
    pub branch: Branch,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    index: u32,
    branch: Branch,
    #[serde(rename = "path")]
    derivation_path: String,
    address: String,
    public_key: String,
    #[serde(skip)]
    private_key: Option<Zeroizing<String>>,
}

impl Account {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn derivation_path(&self) -> &str {
        &self.derivation_path
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Hex private key. `None` until the owning wallet has re-derived it
    /// after being loaded from storage.
    pub fn private_key_hex(&self) -> Option<&str> {
        self.private_key.as_ref().map(|k| k.as_str())
    }

    /// Compares the public parts only.
    fn same_public_data(&self, other: &Account) -> bool {
        self.index == other.index
            && self.branch == other.branch
            && self.derivation_path == other.derivation_path
            && self.address == other.address
            && self.public_key == other.public_key
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Account")
            .field("index", &self.index)
            .field("derivation_path", &self.derivation_path)
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Derives accounts for one (mnemonic, options) pair. Holds the branch-level
/// key so that deriving many accounts costs one seed stretch.
struct AccountDeriver {
    branch_key: KeyPair,
    options: WalletOptions,
}

impl AccountDeriver {
    fn new(mnemonic: &SecureMnemonic, options: WalletOptions) -> Result<Self> {
        let seed = mnemonic.to_seed("");
        let root = KeyPair::from_seed(&seed)?;
        let account_path = paths::account(
            options.address_type.purpose(),
            options.network.coin_type(),
            0,
        );
        let account_key = root.derive(&account_path)?;
        let branch_key = KeyPair {
            extended_key: account_key
                .extended_key
                .derive_child(options.branch.index())?,
        };
        Ok(Self { branch_key, options })
    }

    fn derive(&self, index: u32) -> Result<Account> {
        let child = KeyPair {
            extended_key: self.branch_key.extended_key.derive_child(index)?,
        };
        let path = paths::with_purpose(
            self.options.address_type.purpose(),
            self.options.network.coin_type(),
            0,
            self.options.branch == Branch::Internal,
            index,
        );
        Ok(Account {
            index,
            branch: self.options.branch,
            derivation_path: path.to_string(),
            address: child.get_address(self.options.address_type, self.options.network)?,
            public_key: child.public_key_hex(),
            private_key: Some(child.secret_key_hex()),
        })
    }

    fn derive_range(&self, start: u32, count: u32) -> Result<Vec<Account>> {
        let end = start
            .checked_add(count)
            .filter(|end| *end <= crate::derivation::HARDENED_BIT)
            .ok_or_else(|| VaultError::InvalidArgument("account index overflow".into()))?;
        (start..end).map(|i| self.derive(i)).collect()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    mnemonic: String,
    network: Network,
    #[serde(default)]
    address_type: AddressType,
    #[serde(default)]
    branch: Branch,
    accounts: Vec<Account>,
}

impl Drop for Wallet {
    fn drop(&mut self) {
        self.mnemonic.zeroize();
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.network)
            .field("address_type", &self.address_type)
            .field("branch", &self.branch)
            .field("accounts", &self.accounts)
            .finish_non_exhaustive()
    }
}

/// Builds a wallet with `account_count` accounts at indices `0..account_count`.
///
/// The mnemonic is re-validated here even though callers must already have
/// validated it.
pub fn create_wallet_from_mnemonic(
    mnemonic: &str,
    options: WalletOptions,
    account_count: u32,
) -> Result<Wallet> {
    if account_count < 1 {
        return Err(VaultError::InvalidArgument(
            "account count must be at least 1".into(),
        ));
    }
    let parsed = SecureMnemonic::from_phrase(mnemonic)?;
    let deriver = AccountDeriver::new(&parsed, options)?;
    let accounts = deriver.derive_range(0, account_count)?;

    tracing::info!(
        accounts = account_count,
        network = %options.network,
        branch = %options.branch,
        "wallet derived"
    );

    Ok(Wallet {
        mnemonic: parsed.phrase().to_string(),
        network: options.network,
        address_type: options.address_type,
        branch: options.branch,
        accounts,
    })
}

impl Wallet {
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn options(&self) -> WalletOptions {
        WalletOptions {
            network: self.network,
            address_type: self.address_type,
            branch: self.branch,
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    fn deriver(&self) -> Result<AccountDeriver> {
        let parsed = SecureMnemonic::from_phrase(&self.mnemonic)?;
        AccountDeriver::new(&parsed, self.options())
    }

    /// Appends the account at the next index. Existing accounts are never
    /// touched; on error the wallet is unchanged.
    pub fn add_account(&mut self) -> Result<&Account> {
        let next = u32::try_from(self.accounts.len())
            .map_err(|_| VaultError::InvalidArgument("too many accounts".into()))?;
        let account = self.deriver()?.derive(next)?;
        tracing::info!(index = next, "account added");
        self.accounts.push(account);
        Ok(&self.accounts[self.accounts.len() - 1])
    }

    /// Re-derives the same number of accounts on `branch`.
    pub fn switch_branch(&mut self, branch: Branch) -> Result<()> {
        if branch == self.branch {
            return Ok(());
        }
        let options = WalletOptions { branch, ..self.options() };
        let parsed = SecureMnemonic::from_phrase(&self.mnemonic)?;
        let count = u32::try_from(self.accounts.len())
            .map_err(|_| VaultError::InvalidArgument("too many accounts".into()))?;
        let accounts = AccountDeriver::new(&parsed, options)?.derive_range(0, count)?;

        tracing::info!(from = %self.branch, to = %branch, "branch switched");
        self.branch = branch;
        self.accounts = accounts;
        Ok(())
    }

    /// Account-level extended public key (`m/purpose'/coin'/0'`) for
    /// watch-only balance and UTXO lookups.
    pub fn account_xpub(&self) -> Result<String> {
        let parsed = SecureMnemonic::from_phrase(&self.mnemonic)?;
        let seed = parsed.to_seed("");
        let root = KeyPair::from_seed(&seed)?;
        let path = paths::account(self.address_type.purpose(), self.network.coin_type(), 0);
        Ok(root.derive(&path)?.get_xpub(self.network))
    }

    /// Checks a deserialized wallet against its own mnemonic and restores the
    /// in-memory private keys. Any mismatch means the record was edited or
    /// corrupted.
    pub fn verify_and_rehydrate(&mut self) -> Result<()> {
        let count = u32::try_from(self.accounts.len())
            .map_err(|_| VaultError::MalformedPackage("too many accounts".into()))?;
        if count == 0 {
            return Err(VaultError::MalformedPackage("wallet has no accounts".into()));
        }
        let parsed = SecureMnemonic::from_phrase(&self.mnemonic)
            .map_err(|_| VaultError::MalformedPackage("stored mnemonic is invalid".into()))?;
        let derived = AccountDeriver::new(&parsed, self.options())?.derive_range(0, count)?;

        let consistent = derived
            .iter()
            .zip(&self.accounts)
            .all(|(fresh, stored)| fresh.same_public_data(stored));
        if !consistent {
            return Err(VaultError::MalformedPackage(
                "stored accounts do not match the mnemonic".into(),
            ));
        }
        self.accounts = derived;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
                                 abandon abandon abandon abandon abandon about";

    #[test]
    fn first_account_matches_bip44_reference() {
        let wallet = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 2).unwrap();
        let first = &wallet.accounts()[0];
        assert_eq!(first.derivation_path(), "m/44'/0'/0'/0/0");
        assert_eq!(first.address(), "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
        assert_eq!(wallet.accounts()[1].address(), "1Ak8PffB2meyfYnbXZR9EGfLfFZVpzJvQP");
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 3).unwrap();
        let b = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 3).unwrap();
        assert_eq!(a.accounts(), b.accounts());
    }

    #[test]
    fn every_strength_derives_the_same_accounts_twice() {
        for bits in [128, 160, 192, 224, 256] {
            let phrase = crate::mnemonic::generate_mnemonic(bits, None).unwrap();
            assert_eq!(phrase.split(' ').count(), bits as usize / 32 * 3);

            let a = create_wallet_from_mnemonic(&phrase, WalletOptions::default(), 3).unwrap();
            let b = create_wallet_from_mnemonic(&phrase, WalletOptions::default(), 3).unwrap();
            assert_eq!(a.accounts(), b.accounts(), "{bits}-bit mnemonic");
            assert_eq!(a.mnemonic(), phrase.as_str());
        }
    }

    #[test]
    fn zero_accounts_is_invalid_argument() {
        assert!(matches!(
            create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 0),
            Err(VaultError::InvalidArgument(_))
        ));
    }

    #[test]
    fn invalid_mnemonic_is_rejected() {
        let bad = ABANDON_ABOUT.replace("about", "above");
        assert!(matches!(
            create_wallet_from_mnemonic(&bad, WalletOptions::default(), 1),
            Err(VaultError::InvalidMnemonic)
        ));
    }

    #[test]
    fn add_account_appends_next_index() {
        let mut wallet = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 3).unwrap();
        let before = wallet.accounts().to_vec();
        let added = wallet.add_account().unwrap().clone();
        assert_eq!(added.index(), 3);
        assert_eq!(added.derivation_path(), "m/44'/0'/0'/0/3");
        assert_eq!(&wallet.accounts()[..3], &before[..]);

        let four = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 4).unwrap();
        assert_eq!(four.accounts()[3], added);
    }

    #[test]
    fn branch_is_orthogonal_to_index() {
        let mut wallet = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 2).unwrap();
        let external = wallet.accounts()[0].address().to_string();
        wallet.switch_branch(Branch::Internal).unwrap();
        assert_eq!(wallet.accounts().len(), 2);
        assert_eq!(wallet.accounts()[0].derivation_path(), "m/44'/0'/0'/1/0");
        assert_ne!(wallet.accounts()[0].address(), external);
    }

    #[test]
    fn testnet_uses_coin_type_one() {
        let options = WalletOptions {
            network: Network::Test,
            address_type: AddressType::P2WPKH,
            branch: Branch::External,
        };
        let wallet = create_wallet_from_mnemonic(ABANDON_ABOUT, options, 1).unwrap();
        assert_eq!(wallet.accounts()[0].derivation_path(), "m/84'/1'/0'/0/0");
        assert!(wallet.accounts()[0].address().starts_with("tb1q"));
    }

    #[test]
    fn serialized_wallet_omits_private_keys() {
        let wallet = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 1).unwrap();
        let secret = wallet.accounts()[0].private_key_hex().unwrap().to_string();
        let json = serde_json::to_string(&wallet).unwrap();
        assert!(!json.contains(&secret));
        assert!(json.contains("\"path\""));
        assert!(json.contains("\"publicKey\""));
    }

    #[test]
    fn rehydrate_restores_keys_and_detects_tampering() {
        let wallet = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 2).unwrap();
        let json = serde_json::to_string(&wallet).unwrap();

        let mut loaded: Wallet = serde_json::from_str(&json).unwrap();
        assert!(loaded.accounts()[0].private_key_hex().is_none());
        loaded.verify_and_rehydrate().unwrap();
        assert_eq!(
            loaded.accounts()[0].private_key_hex(),
            wallet.accounts()[0].private_key_hex()
        );

        let tampered = json.replace(wallet.accounts()[1].address(), "1BoatSLRHtKNngkdXEeobR76b53LETtpyT");
        let mut loaded: Wallet = serde_json::from_str(&tampered).unwrap();
        assert!(matches!(
            loaded.verify_and_rehydrate(),
            Err(VaultError::MalformedPackage(_))
        ));
    }

    #[test]
    fn debug_output_hides_mnemonic() {
        let wallet = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 1).unwrap();
        assert!(!format!("{wallet:?}").contains("abandon"));
    }

    #[test]
    fn account_xpub_matches_reference() {
        let wallet = create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 1).unwrap();
        assert_eq!(
            wallet.account_xpub().unwrap(),
            "xpub6BosfCnifzxcFwrSzQiqu2DBVTshkCXacvNsWGYJVVhhawA7d4R5WSWGFNbi8Aw6ZRc1brxMyWMzG3DSSSSoekkudhUd9yLb6qx39T9nMdj"
        );
    }
}
