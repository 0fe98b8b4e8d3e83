use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;
use std::fmt;
use std::str::FromStr;
use bitcoin_hashes::{Hash, hash160};
use thiserror::Error;
use zeroize::Zeroize;

pub const HARDENED_BIT: u32 = 0x80000000;

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("malformed derivation path")]
    InvalidPath,

    #[error("child index out of range")]
    InvalidChildNumber,

    /// Master key material fell outside the curve order.
    #[error("seed does not yield a valid master key")]
    InvalidParentKey,

    /// `parse256(IL) >= n` or the tweaked key is zero; BIP32 says skip
    /// to the next index.
    #[error("child key at this index is invalid")]
    KeyDerivationFailed,

    #[error("HMAC-SHA512 keying failed")]
    Hmac,

    #[error("secp256k1 rejected the key material")]
    Secp256k1,

    #[error("key encoding failed: {0}")]
    Encoding(String),
}

/// Represents a BIP32 extended key, containing both private and public components
#[derive(Clone)]
pub struct ExtendedKey {
    pub private_key: SecretKey,
    pub public_key: PublicKey,
    pub chain_code: [u8; 32],
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: u32,
}

impl Drop for ExtendedKey {
    fn drop(&mut self) {
        self.chain_code.zeroize();
    }
}

impl fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("public_key", &self.public_key)
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .finish_non_exhaustive()
    }
}

/// Splits an HMAC-SHA512 output into the key half and the chain code half.
fn split_i(result: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut left = [0u8; 32];
    let mut chain_code = [0u8; 32];
    left.copy_from_slice(&result[0..32]);
    chain_code.copy_from_slice(&result[32..64]);
    (left, chain_code)
}

impl ExtendedKey {
    /// Creates a new master key from a seed
    pub fn from_seed(seed: &[u8]) -> Result<Self, DerivationError> {
        let secp = Secp256k1::new();

        // HMAC-SHA512 with key "Bitcoin seed"
        let mut hmac = Hmac::<Sha512>::new_from_slice(b"Bitcoin seed")
            .map_err(|_| DerivationError::Hmac)?;

        hmac.update(seed);
        let result = hmac.finalize().into_bytes();

        let (mut left, chain_code) = split_i(&result);

        let private_key = SecretKey::from_slice(&left)
            .map_err(|_| DerivationError::Secp256k1);
        left.zeroize();
        let private_key = private_key?;

        let public_key = PublicKey::from_secret_key(&secp, &private_key);

        Ok(ExtendedKey {
            private_key,
            public_key,
            chain_code,
            depth: 0,
            parent_fingerprint: [0u8; 4],
            child_number: 0,
        })
    }

    /// Derives a child key based on the provided index
    pub fn derive_child(&self, index: u32) -> Result<Self, DerivationError> {
        let secp = Secp256k1::new();

        let depth = self.depth.checked_add(1).ok_or(DerivationError::InvalidPath)?;

        // 33 bytes of key material + 4 bytes of index
        let mut data = Vec::with_capacity(37);

        if index & HARDENED_BIT != 0 {
            data.push(0);
            data.extend_from_slice(&self.private_key.secret_bytes());
        } else {
            data.extend_from_slice(&self.public_key.serialize());
        }

        data.extend_from_slice(&index.to_be_bytes());

        let mut hmac = Hmac::<Sha512>::new_from_slice(&self.chain_code)
            .map_err(|_| DerivationError::Hmac)?;

        hmac.update(&data);
        data.zeroize();
        let result = hmac.finalize().into_bytes();

        let (mut left, chain_code) = split_i(&result);

        // IL >= n is rejected by SecretKey::from_slice; the caller moves to the next index
        let tweak = SecretKey::from_slice(&left)
            .map_err(|_| DerivationError::InvalidChildNumber);
        left.zeroize();
        let tweak = Scalar::from(tweak?);

        let child_private_key = self
            .private_key
            .add_tweak(&tweak)
            .map_err(|_| DerivationError::KeyDerivationFailed)?;

        let child_public_key = PublicKey::from_secret_key(&secp, &child_private_key);

        Ok(ExtendedKey {
            private_key: child_private_key,
            public_key: child_public_key,
            chain_code,
            depth,
            parent_fingerprint: self.fingerprint(),
            child_number: index,
        })
    }

    /// First four bytes of HASH160 of the compressed public key.
    pub fn fingerprint(&self) -> [u8; 4] {
        let hash = hash160::Hash::hash(&self.public_key.serialize()).to_byte_array();
        [hash[0], hash[1], hash[2], hash[3]]
    }
}

/// Represents a BIP32 derivation path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath {
    indices: Vec<u32>,
}

impl DerivationPath {
    pub fn from_indices(indices: Vec<u32>) -> Self {
        DerivationPath { indices }
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Derives a key following this path
    pub fn derive(&self, root: &ExtendedKey) -> Result<ExtendedKey, DerivationError> {
        let mut key = root.clone();

        for &index in &self.indices {
            key = key.derive_child(index)?;
        }

        Ok(key)
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let mut components = path.split('/');
        if components.next() != Some("m") {
            return Err(DerivationError::InvalidPath);
        }

        let indices = components
            .map(|component| {
                let hardened = component.ends_with('\'') || component.ends_with('h');
                let index_str = if hardened {
                    &component[..component.len() - 1]
                } else {
                    component
                };

                let index = index_str
                    .parse::<u32>()
                    .map_err(|_| DerivationError::InvalidChildNumber)?;
                if index & HARDENED_BIT != 0 {
                    return Err(DerivationError::InvalidChildNumber);
                }

                Ok(if hardened { index | HARDENED_BIT } else { index })
            })
            .collect::<Result<Vec<u32>, _>>()?;

        Ok(DerivationPath { indices })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "m")?;
        for &index in &self.indices {
            if index & HARDENED_BIT != 0 {
                write!(f, "/{}'", index & !HARDENED_BIT)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}

/// Utility functions for common derivation paths
pub mod paths {
    use super::{DerivationPath, HARDENED_BIT};

    /// Format: m/purpose'/coin_type'/account'/change/address_index
    pub fn with_purpose(
        purpose: u32,
        coin_type: u32,
        account: u32,
        change: bool,
        address_index: u32,
    ) -> DerivationPath {
        DerivationPath::from_indices(vec![
            purpose | HARDENED_BIT,
            coin_type | HARDENED_BIT,
            account | HARDENED_BIT,
            u32::from(change),
            address_index,
        ])
    }

    /// Account-level prefix m/purpose'/coin_type'/account'
    pub fn account(purpose: u32, coin_type: u32, account: u32) -> DerivationPath {
        DerivationPath::from_indices(vec![
            purpose | HARDENED_BIT,
            coin_type | HARDENED_BIT,
            account | HARDENED_BIT,
        ])
    }

    /// Bitcoin mainnet - Coin type 0
    pub const BITCOIN: u32 = 0;

    /// Any testnet - Coin type 1
    pub const TESTNET: u32 = 1;
}
