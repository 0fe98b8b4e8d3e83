use crate::derivation::{DerivationError, DerivationPath, ExtendedKey};
use bech32::{ToBase32, Variant};
use bitcoin_hashes::{Hash, hash160};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroizing;

/// Bitcoin network a wallet's keys and addresses belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Main,
    Test,
}

impl Network {
    /// SLIP-44 coin type used in the hardened path prefix.
    pub fn coin_type(self) -> u32 {
        match self {
            Network::Main => crate::derivation::paths::BITCOIN,
            Network::Test => crate::derivation::paths::TESTNET,
        }
    }

    fn p2pkh_version(self) -> u8 {
        match self {
            Network::Main => 0x00,
            Network::Test => 0x6f,
        }
    }

    fn p2sh_version(self) -> u8 {
        match self {
            Network::Main => 0x05,
            Network::Test => 0xc4,
        }
    }

    fn bech32_hrp(self) -> &'static str {
        match self {
            Network::Main => "bc",
            Network::Test => "tb",
        }
    }

    fn xpub_version(self) -> [u8; 4] {
        match self {
            Network::Main => [0x04, 0x88, 0xB2, 0x1E],
            Network::Test => [0x04, 0x35, 0x87, 0xCF],
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Network::Main => write!(f, "main"),
            Network::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" | "bitcoin" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AddressType {
    /// Legacy: 1... / m...
    #[default]
    #[serde(rename = "p2pkh")]
    P2PKH,
    /// SegWit-compatible: 3... / 2...
    #[serde(rename = "p2sh_p2wpkh")]
    P2shP2wpkh,
    /// Native SegWit: bc1... / tb1...
    #[serde(rename = "p2wpkh")]
    P2WPKH,
}

impl AddressType {
    /// BIP purpose field paired with this address encoding (44, 49 or 84).
    pub fn purpose(self) -> u32 {
        match self {
            AddressType::P2PKH => 44,
            AddressType::P2shP2wpkh => 49,
            AddressType::P2WPKH => 84,
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddressType::P2PKH => write!(f, "p2pkh"),
            AddressType::P2shP2wpkh => write!(f, "p2sh_p2wpkh"),
            AddressType::P2WPKH => write!(f, "p2wpkh"),
        }
    }
}

impl FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p2pkh" | "legacy" => Ok(AddressType::P2PKH),
            "p2sh_p2wpkh" | "p2sh-p2wpkh" | "nested" => Ok(AddressType::P2shP2wpkh),
            "p2wpkh" | "segwit" | "bech32" => Ok(AddressType::P2WPKH),
            other => Err(format!("unknown address type '{other}'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyPairError {
    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error("address encoding failed")]
    AddressEncoding,

    #[error("seed does not yield a valid master key")]
    InvalidSeed,
}

#[derive(Clone, Debug)]
pub struct KeyPair {
    pub extended_key: ExtendedKey,
}

impl KeyPair {
    /// Create a new key pair from a BIP39 seed
    pub fn from_seed(seed: &[u8; 64]) -> Result<Self, KeyPairError> {
        let extended_key = ExtendedKey::from_seed(seed)
            .map_err(|_| KeyPairError::InvalidSeed)?;

        Ok(KeyPair { extended_key })
    }

    /// Derive a child key pair along `path`
    pub fn derive(&self, path: &DerivationPath) -> Result<Self, KeyPairError> {
        let derived_key = path.derive(&self.extended_key)?;
        Ok(KeyPair { extended_key: derived_key })
    }

    /// Hex of the raw 32-byte private key. Wiped when dropped.
    pub fn secret_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.extended_key.private_key.secret_bytes()))
    }

    /// Hex of the 33-byte compressed public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.extended_key.public_key.serialize())
    }

    /// BIP32 serialization: version, depth, parent fingerprint, child
    /// number, chain code, then 33 bytes of key data.
    fn serialize_extended(&self, version: [u8; 4], key_data: &[u8; 33]) -> String {
        let key = &self.extended_key;
        let mut data = Zeroizing::new(Vec::with_capacity(78));

        data.extend_from_slice(&version);
        data.push(key.depth);
        data.extend_from_slice(&key.parent_fingerprint);
        data.extend_from_slice(&key.child_number.to_be_bytes());
        data.extend_from_slice(&key.chain_code);
        data.extend_from_slice(key_data);

        bs58::encode(data.as_slice()).with_check().into_string()
    }

    /// Serialize extended public key (xpub / tpub)
    pub fn get_xpub(&self, network: Network) -> String {
        let key_data = self.extended_key.public_key.serialize();
        self.serialize_extended(network.xpub_version(), &key_data)
    }

    /// Generate a Bitcoin address of the specified type
    pub fn get_address(&self, address_type: AddressType, network: Network) -> Result<String, KeyPairError> {
        let public_key = &self.extended_key.public_key;
        // RIPEMD160(SHA256(pubkey))
        let pubkey_hash = hash160::Hash::hash(&public_key.serialize()).to_byte_array();

        match address_type {
            AddressType::P2PKH => {
                let mut address_bytes = Vec::with_capacity(21);
                address_bytes.push(network.p2pkh_version());
                address_bytes.extend_from_slice(&pubkey_hash);

                Ok(bs58::encode(&address_bytes).with_check().into_string())
            }

            AddressType::P2shP2wpkh => {
                // redeem script: OP_0 PUSH(20) <pubkey_hash>
                let mut redeem_script = Vec::with_capacity(22);
                redeem_script.push(0x00);
                redeem_script.push(0x14);
                redeem_script.extend_from_slice(&pubkey_hash);

                let script_hash = hash160::Hash::hash(&redeem_script).to_byte_array();

                let mut address_bytes = Vec::with_capacity(21);
                address_bytes.push(network.p2sh_version());
                address_bytes.extend_from_slice(&script_hash);

                Ok(bs58::encode(&address_bytes).with_check().into_string())
            }

            AddressType::P2WPKH => {
                // witness version 0 followed by the 20-byte program
                let witness_version = bech32::u5::try_from_u8(0)
                    .map_err(|_| KeyPairError::AddressEncoding)?;
                let mut data = vec![witness_version];
                data.extend(pubkey_hash.to_base32());

                bech32::encode(network.bech32_hrp(), data, Variant::Bech32)
                    .map_err(|_| KeyPairError::AddressEncoding)
            }
        }
    }
}
