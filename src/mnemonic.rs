//! Entropy gathering, optional nonce mixing and BIP39 mnemonic handling.

use bip39::{Language, Mnemonic};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnemonicStrength {
    Words12,
    Words15,
    Words18,
    Words21,
    Words24,
}

impl MnemonicStrength {
    pub fn from_entropy_bits(bits: u32) -> Result<Self> {
        match bits {
            128 => Ok(MnemonicStrength::Words12),
            160 => Ok(MnemonicStrength::Words15),
            192 => Ok(MnemonicStrength::Words18),
            224 => Ok(MnemonicStrength::Words21),
            256 => Ok(MnemonicStrength::Words24),
            other => Err(VaultError::InvalidArgument(format!(
                "strength must be 128, 160, 192, 224 or 256 bits, got {other}"
            ))),
        }
    }

    pub fn from_word_count(words: usize) -> Result<Self> {
        match words {
            12 => Ok(MnemonicStrength::Words12),
            15 => Ok(MnemonicStrength::Words15),
            18 => Ok(MnemonicStrength::Words18),
            21 => Ok(MnemonicStrength::Words21),
            24 => Ok(MnemonicStrength::Words24),
            other => Err(VaultError::InvalidArgument(format!(
                "word count must be 12, 15, 18, 21 or 24, got {other}"
            ))),
        }
    }

    pub fn entropy_bits(self) -> usize {
        match self {
            MnemonicStrength::Words12 => 128,
            MnemonicStrength::Words15 => 160,
            MnemonicStrength::Words18 => 192,
            MnemonicStrength::Words21 => 224,
            MnemonicStrength::Words24 => 256,
        }
    }

    /// strength/32*3
    pub fn word_count(self) -> usize {
        self.entropy_bits() / 32 * 3
    }
}

/// User-supplied material folded into fresh OS entropy.
///
/// Mixing never replaces randomness: the OS bytes are always drawn in full
/// and the nonce only keys a hash over them.
#[derive(Clone)]
pub struct NonceMixing {
    nonce: Zeroizing<String>,
    complexity: u8,
    iterations: u16,
}

impl NonceMixing {
    pub const MAX_COMPLEXITY: u8 = 10;
    pub const MAX_ITERATIONS: u16 = 1000;

    pub fn new(nonce: impl Into<String>, complexity: u8, iterations: u16) -> Result<Self> {
        let nonce = Zeroizing::new(nonce.into());
        if nonce.is_empty() {
            return Err(VaultError::InvalidArgument("custom nonce must not be empty".into()));
        }
        if !(1..=Self::MAX_COMPLEXITY).contains(&complexity) {
            return Err(VaultError::InvalidArgument(format!(
                "nonce complexity must be between 1 and {}, got {complexity}",
                Self::MAX_COMPLEXITY
            )));
        }
        if !(1..=Self::MAX_ITERATIONS).contains(&iterations) {
            return Err(VaultError::InvalidArgument(format!(
                "nonce iterations must be between 1 and {}, got {iterations}",
                Self::MAX_ITERATIONS
            )));
        }
        Ok(Self {
            nonce,
            complexity,
            iterations,
        })
    }

    pub fn complexity(&self) -> u8 {
        self.complexity
    }

    pub fn iterations(&self) -> u16 {
        self.iterations
    }

    /// Strengthens the nonce with `iterations * complexity` chained SHA-256
    /// rounds, each bound to its (iteration, round) position.
    fn strengthen(&self) -> Zeroizing<[u8; 32]> {
        let mut digest = Zeroizing::new([0u8; 32]);
        digest.copy_from_slice(&Sha256::digest(self.nonce.as_bytes()));

        for i in 0..self.iterations {
            for r in 0..self.complexity {
                let mut hasher = Sha256::new();
                hasher.update(digest.as_slice());
                hasher.update(i.to_be_bytes());
                hasher.update([r]);
                digest.copy_from_slice(&hasher.finalize());
            }
        }
        digest
    }

    /// HMAC-SHA512(key = strengthened nonce, msg = entropy), truncated to the
    /// entropy length.
    fn mix(&self, entropy: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.strengthen();
        let mut mac = Hmac::<Sha512>::new_from_slice(key.as_slice())
            .map_err(|_| VaultError::InvalidArgument("nonce key rejected".into()))?;
        mac.update(entropy);
        let mut out = mac.finalize().into_bytes();
        let mixed = Zeroizing::new(out[..entropy.len()].to_vec());
        out.as_mut_slice().zeroize();
        Ok(mixed)
    }
}

impl std::fmt::Debug for NonceMixing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceMixing")
            .field("nonce_len", &self.nonce.len())
            .field("complexity", &self.complexity)
            .field("iterations", &self.iterations)
            .finish()
    }
}

pub struct SecureMnemonic {
    mnemonic: Mnemonic,
}

impl SecureMnemonic {
    pub fn generate(strength: MnemonicStrength, mixing: Option<&NonceMixing>) -> Result<Self> {
        let entropy = generate_entropy(strength.entropy_bits() / 8)?;

        let entropy = match mixing {
            Some(mixing) => {
                tracing::debug!(
                    complexity = mixing.complexity(),
                    iterations = mixing.iterations(),
                    "mixing custom nonce into entropy"
                );
                mixing.mix(&entropy)?
            }
            None => entropy,
        };

        // from_entropy only fails on a bad length, which the strength enum rules out
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| VaultError::InvalidArgument(e.to_string()))?;
        Ok(Self { mnemonic })
    }

    /// Parses a phrase after normalization. Unknown words, a word count
    /// outside {12,15,18,21,24} and checksum mismatches are all rejected.
    pub fn from_phrase(phrase: &str) -> Result<Self> {
        let normalized = normalize_phrase(phrase);
        let word_count = normalized.split(' ').filter(|w| !w.is_empty()).count();
        MnemonicStrength::from_word_count(word_count).map_err(|_| VaultError::InvalidMnemonic)?;

        match Mnemonic::parse_in_normalized(Language::English, &normalized) {
            Ok(mnemonic) => Ok(Self { mnemonic }),
            Err(e) => {
                tracing::debug!(words = word_count, reason = %e, "mnemonic rejected");
                Err(VaultError::InvalidMnemonic)
            }
        }
    }

    pub fn phrase(&self) -> Zeroizing<String> {
        let mut result = Zeroizing::new(String::new());
        for (i, word) in self.mnemonic.word_iter().enumerate() {
            if i > 0 {
                result.push(' ');
            }
            result.push_str(word);
        }
        result
    }

    pub fn words(&self) -> Vec<&'static str> {
        self.mnemonic.word_iter().collect()
    }

    pub fn word_count(&self) -> usize {
        self.mnemonic.word_count()
    }

    /// BIP39 seed (PBKDF2-HMAC-SHA512, 2048 rounds).
    pub fn to_seed(&self, passphrase: &str) -> Zeroizing<[u8; 64]> {
        Zeroizing::new(self.mnemonic.to_seed_normalized(passphrase))
    }
}

pub fn generate_entropy(byte_length: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut bytes = Zeroizing::new(vec![0u8; byte_length]);
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
        tracing::error!(error = %e, "OS random source unavailable");
        VaultError::Entropy
    })?;
    Ok(bytes)
}

/// Word counts accepted when restoring an existing wallet.
pub const RESTORABLE_WORD_COUNTS: [usize; 2] = [12, 24];

/// Trims, lowercases and joins words with single spaces.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generates a mnemonic of `strength_bits` bits of entropy, optionally mixed
/// with a custom nonce.
pub fn generate_mnemonic(strength_bits: u32, mixing: Option<&NonceMixing>) -> Result<Zeroizing<String>> {
    let strength = MnemonicStrength::from_entropy_bits(strength_bits)?;
    Ok(SecureMnemonic::generate(strength, mixing)?.phrase())
}

/// Never panics or errors; any failure reads as `false`.
pub fn validate_mnemonic(phrase: &str) -> bool {
    SecureMnemonic::from_phrase(phrase).is_ok()
}
