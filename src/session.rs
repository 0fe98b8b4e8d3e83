//! Async wallet session.
//!
//! Lifecycle:
//!
//! ```text
//! NoWallet -> generate -> SeedGenerated -> verify -> SeedVerified -> create -> WalletActive
//! NoWallet -> import ------------------------------------------------------> WalletActive
//! WalletActive -> reset -> NoWallet
//! ```
//!
//! Every mutation holds the session lock across derivation and the store
//! write, so concurrent `add_account` calls append one after the other.
//! Derivation runs on the blocking pool under a caller-side timeout and has
//! no side effects. The store write that follows is always awaited to the
//! end, so a timed-out call never leaves a write behind that could land
//! after a later mutation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::config::{VaultConfig, DEFAULT_ACCOUNT_COUNT, DEFAULT_KDF_TIMEOUT_SECS};
use crate::error::{Result, VaultError};
use crate::mnemonic::{
    normalize_phrase,
    validate_mnemonic,
    MnemonicStrength,
    NonceMixing,
    SecureMnemonic,
    RESTORABLE_WORD_COUNTS,
};
use crate::storage::WalletStore;
use crate::wallet::{create_wallet_from_mnemonic, Account, Branch, Wallet, WalletOptions};

/// Number of word positions asked back after seed generation.
pub const CHALLENGE_WORDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoWallet,
    SeedGenerated,
    SeedVerified,
    WalletActive,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::NoWallet => "NoWallet",
            SessionState::SeedGenerated => "SeedGenerated",
            SessionState::SeedVerified => "SeedVerified",
            SessionState::WalletActive => "WalletActive",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub options: WalletOptions,
    pub account_count: u32,
    pub kdf_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            options: WalletOptions::default(),
            account_count: DEFAULT_ACCOUNT_COUNT,
            kdf_timeout: Duration::from_secs(DEFAULT_KDF_TIMEOUT_SECS),
        }
    }
}

impl From<&VaultConfig> for SessionConfig {
    fn from(config: &VaultConfig) -> Self {
        Self {
            options: config.wallet_options(),
            account_count: config.account_count,
            kdf_timeout: config.kdf_timeout(),
        }
    }
}

/// Runs `f` on the blocking pool. Expiry of `limit` yields
/// [`VaultError::Timeout`] while `f` keeps running detached, so `f` must not
/// touch shared state. Use [`run_to_completion`] for writes.
pub async fn run_blocking<T, F>(op: &'static str, limit: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(VaultError::Task(format!("{op}: {e}"))),
        Err(_) => {
            tracing::warn!(op, timeout_ms = limit.as_millis() as u64, "operation timed out");
            Err(VaultError::Timeout(op))
        }
    }
}

/// Runs a side-effecting `f` on the blocking pool and waits for it to end.
pub async fn run_to_completion<T, F>(op: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Task(format!("{op}: {e}")))?
}

struct Inner {
    state: SessionState,
    pending: Option<Zeroizing<String>>,
    /// 0-based word positions of the outstanding challenge.
    challenge: Vec<usize>,
    wallet: Option<Wallet>,
}

impl Inner {
    fn require(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(VaultError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }

    fn active_wallet(&self) -> Result<&Wallet> {
        self.require(SessionState::WalletActive)?;
        self.wallet.as_ref().ok_or(VaultError::InvalidState {
            expected: SessionState::WalletActive.name(),
            actual: SessionState::NoWallet.name(),
        })
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.challenge.clear();
    }
}

pub struct WalletSession<S> {
    store: Arc<S>,
    config: SessionConfig,
    inner: Mutex<Inner>,
}

impl<S: WalletStore + 'static> WalletSession<S> {
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
            inner: Mutex::new(Inner {
                state: SessionState::NoWallet,
                pending: None,
                challenge: Vec::new(),
                wallet: None,
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Copy of the active wallet, if any.
    pub async fn wallet(&self) -> Option<Wallet> {
        self.inner.lock().await.wallet.clone()
    }

    /// Restores a previously saved wallet. An empty store leaves the session
    /// in `NoWallet`.
    pub async fn load(&self) -> Result<SessionState> {
        let mut inner = self.inner.lock().await;
        let store = Arc::clone(&self.store);
        let loaded = run_blocking("wallet load", self.config.kdf_timeout, move || store.load()).await?;

        if let Some(wallet) = loaded {
            inner.clear_pending();
            inner.wallet = Some(wallet);
            inner.state = SessionState::WalletActive;
        }
        Ok(inner.state)
    }

    /// Generates a fresh mnemonic and waits for it to be confirmed. Calling it
    /// again before confirmation replaces the pending phrase.
    pub async fn generate_seed(
        &self,
        strength: MnemonicStrength,
        mixing: Option<NonceMixing>,
    ) -> Result<Zeroizing<String>> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.state, SessionState::NoWallet | SessionState::SeedGenerated) {
            return Err(VaultError::InvalidState {
                expected: SessionState::NoWallet.name(),
                actual: inner.state.name(),
            });
        }

        let phrase = run_blocking("mnemonic generation", self.config.kdf_timeout, move || {
            Ok(SecureMnemonic::generate(strength, mixing.as_ref())?.phrase())
        })
        .await?;

        inner.challenge.clear();
        inner.pending = Some(phrase.clone());
        inner.state = SessionState::SeedGenerated;
        tracing::info!(words = strength.word_count(), "seed generated");
        Ok(phrase)
    }

    /// Picks [`CHALLENGE_WORDS`] distinct positions of the pending phrase and
    /// returns them 1-based, ascending.
    pub async fn verification_challenge(&self) -> Result<Vec<usize>> {
        let mut inner = self.inner.lock().await;
        inner.require(SessionState::SeedGenerated)?;
        let word_count = inner
            .pending
            .as_ref()
            .map(|p| p.split(' ').count())
            .unwrap_or_default();
        if word_count < CHALLENGE_WORDS {
            return Err(VaultError::InvalidArgument("pending phrase is too short to challenge".into()));
        }

        let mut positions = rand::seq::index::sample(&mut OsRng, word_count, CHALLENGE_WORDS).into_vec();
        positions.sort_unstable();
        inner.challenge = positions.clone();

        Ok(positions.into_iter().map(|p| p + 1).collect())
    }

    /// Checks the answers for the outstanding challenge, in the order the
    /// positions were returned. Comparison trims and ignores case.
    pub async fn verify_backup(&self, answers: &[&str]) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.require(SessionState::SeedGenerated)?;
        if inner.challenge.is_empty() {
            return Err(VaultError::InvalidArgument("no verification challenge issued".into()));
        }
        if answers.len() != inner.challenge.len() {
            return Err(VaultError::InvalidArgument(format!(
                "expected {} answers, got {}",
                inner.challenge.len(),
                answers.len()
            )));
        }

        let verified = {
            let words: Vec<&str> = inner
                .pending
                .as_ref()
                .map(|p| p.split(' ').collect())
                .unwrap_or_default();
            inner.challenge.iter().zip(answers).all(|(pos, answer)| {
                words
                    .get(*pos)
                    .is_some_and(|word| word.eq_ignore_ascii_case(answer.trim()))
            })
        };

        if verified {
            inner.state = SessionState::SeedVerified;
            tracing::info!("seed backup verified");
        } else {
            tracing::debug!("seed backup verification failed");
        }
        Ok(verified)
    }

    /// Derives and persists the wallet for the verified seed.
    pub async fn create_wallet(&self) -> Result<Wallet> {
        let mut inner = self.inner.lock().await;
        inner.require(SessionState::SeedVerified)?;
        let phrase = inner.pending.clone().ok_or(VaultError::InvalidState {
            expected: SessionState::SeedVerified.name(),
            actual: SessionState::NoWallet.name(),
        })?;

        let wallet = self.derive_and_save("wallet creation", phrase).await?;
        inner.clear_pending();
        inner.wallet = Some(wallet.clone());
        inner.state = SessionState::WalletActive;
        Ok(wallet)
    }

    /// Import path: a valid 12 or 24 word mnemonic goes straight to
    /// `WalletActive` without the backup challenge.
    pub async fn import_wallet(&self, mnemonic: &str) -> Result<Wallet> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::WalletActive {
            return Err(VaultError::InvalidState {
                expected: SessionState::NoWallet.name(),
                actual: inner.state.name(),
            });
        }
        let phrase = Zeroizing::new(normalize_phrase(mnemonic));
        let words = phrase.split(' ').filter(|w| !w.is_empty()).count();
        if !RESTORABLE_WORD_COUNTS.contains(&words) {
            tracing::debug!(words, "import rejected: unexpected word count");
            return Err(VaultError::InvalidMnemonic);
        }
        if !validate_mnemonic(&phrase) {
            return Err(VaultError::InvalidMnemonic);
        }

        let wallet = self.derive_and_save("wallet import", phrase).await?;
        inner.clear_pending();
        inner.wallet = Some(wallet.clone());
        inner.state = SessionState::WalletActive;
        Ok(wallet)
    }

    async fn derive_and_save(&self, op: &'static str, phrase: Zeroizing<String>) -> Result<Wallet> {
        let options = self.config.options;
        let count = self.config.account_count;
        let wallet = run_blocking(op, self.config.kdf_timeout, move || {
            create_wallet_from_mnemonic(&phrase, options, count)
        })
        .await?;
        self.persist(op, wallet).await
    }

    /// Saves `wallet` and hands it back. Callers hold the session lock, so
    /// writes reach the store in the order the mutations were applied.
    async fn persist(&self, op: &'static str, wallet: Wallet) -> Result<Wallet> {
        let store = Arc::clone(&self.store);
        run_to_completion(op, move || {
            store.save(&wallet)?;
            Ok(wallet)
        })
        .await
    }

    /// Appends the next account. The new account is derived and saved on a
    /// copy; the session only sees it once both succeed.
    pub async fn add_account(&self) -> Result<Account> {
        let mut inner = self.inner.lock().await;
        let mut wallet = inner.active_wallet()?.clone();

        let wallet = run_blocking("add account", self.config.kdf_timeout, move || {
            wallet.add_account()?;
            Ok(wallet)
        })
        .await?;
        let wallet = self.persist("add account", wallet).await?;

        let account = wallet
            .accounts()
            .last()
            .cloned()
            .ok_or_else(|| VaultError::InvalidArgument("wallet has no accounts".into()))?;
        inner.wallet = Some(wallet);
        Ok(account)
    }

    pub async fn switch_branch(&self, branch: Branch) -> Result<Wallet> {
        let mut inner = self.inner.lock().await;
        let mut wallet = inner.active_wallet()?.clone();

        let wallet = run_blocking("branch switch", self.config.kdf_timeout, move || {
            wallet.switch_branch(branch)?;
            Ok(wallet)
        })
        .await?;
        let wallet = self.persist("branch switch", wallet).await?;

        inner.wallet = Some(wallet.clone());
        Ok(wallet)
    }

    /// Forgets the wallet and clears the store. Valid from any state.
    pub async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let store = Arc::clone(&self.store);
        run_to_completion("wallet reset", move || store.clear()).await?;

        inner.clear_pending();
        inner.wallet = None;
        inner.state = SessionState::NoWallet;
        tracing::info!("wallet reset");
        Ok(())
    }
}
