//! Wallet persistence.
//!
//! A store holds exactly one serialized [`Wallet`]. File-backed stores write
//! atomically: temp file, fsync, rename, then fsync of the directory, so a
//! crash leaves either the old or the new blob on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams, IV_LEN, SALT_LEN};
use crate::error::{Result, VaultError};
use crate::mnemonic::generate_entropy;
use crate::wallet::Wallet;

/// File name of the plain JSON wallet blob.
pub const WALLET_FILE: &str = "bitwill-wallet.json";
/// File name of the password-sealed wallet blob.
pub const ENCRYPTED_WALLET_FILE: &str = "bitwill-wallet.enc";

pub trait WalletStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Wallet>>;

    fn save(&self, wallet: &Wallet) -> Result<()>;

    /// Removes the stored wallet. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

impl<T: WalletStore + ?Sized> WalletStore for Box<T> {
    fn load(&self) -> Result<Option<Wallet>> {
        (**self).load()
    }

    fn save(&self, wallet: &Wallet) -> Result<()> {
        (**self).save(wallet)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

fn encode_wallet(wallet: &Wallet) -> Result<Zeroizing<Vec<u8>>> {
    Ok(Zeroizing::new(serde_json::to_vec_pretty(wallet)?))
}

/// Shape is checked by serde, then every account is re-derived from the
/// stored mnemonic.
fn decode_wallet(bytes: &[u8]) -> Result<Wallet> {
    let mut wallet: Wallet = serde_json::from_slice(bytes)
        .map_err(|e| VaultError::MalformedPackage(format!("stored wallet: {e}")))?;
    wallet.verify_and_rehydrate()?;
    Ok(wallet)
}

#[derive(Debug, Clone)]
struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        let parent = self.parent()?;
        fs::create_dir_all(parent)?;

        let tmp_path = self.random_tmp_path()?;
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        // the blob may hold a plain mnemonic; owner-only from the first byte
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut tmp_file = options.open(&tmp_path)?;

        let synced = tmp_file.write_all(data).and_then(|()| tmp_file.sync_all());
        drop(tmp_file);

        if let Err(e) = synced.and_then(|()| fs::rename(&tmp_path, &self.path)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        // directory fsync is not supported on every platform
        #[cfg(unix)]
        File::open(parent)?.sync_all()?;

        tracing::debug!(path = %self.path.display(), bytes = data.len(), "store written");
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn parent(&self) -> Result<&Path> {
        self.path
            .parent()
            .ok_or_else(|| VaultError::Storage(format!("{} has no parent directory", self.path.display())))
    }

    /// `<name>.tmp.<16 hex>` next to the target.
    fn random_tmp_path(&self) -> Result<PathBuf> {
        let suffix = hex::encode(generate_entropy(8)?.as_slice());
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| VaultError::Storage(format!("{} is not a file path", self.path.display())))?
            .to_string_lossy();
        Ok(self.path.with_file_name(format!("{file_name}.tmp.{suffix}")))
    }
}

/// Plain JSON on disk. The mnemonic is readable by anyone who can read the
/// file; prefer [`EncryptedFileStore`] or the OS keychain.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    file: AtomicFile,
}

impl JsonFileStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            file: AtomicFile::new(data_dir.as_ref().join(WALLET_FILE)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

impl WalletStore for JsonFileStore {
    fn load(&self) -> Result<Option<Wallet>> {
        let Some(bytes) = self.file.read()? else {
            return Ok(None);
        };
        let wallet = decode_wallet(&bytes)?;
        tracing::info!(path = %self.path().display(), accounts = wallet.accounts().len(), "wallet loaded");
        Ok(Some(wallet))
    }

    fn save(&self, wallet: &Wallet) -> Result<()> {
        self.file.write(&encode_wallet(wallet)?)?;
        tracing::info!(path = %self.path().display(), "wallet saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.file.remove()?;
        tracing::info!(path = %self.path().display(), "wallet cleared");
        Ok(())
    }
}

/// Wallet JSON sealed under a store password.
///
/// ```text
/// SALT (16) | IV (12) | CIPHERTEXT
/// ```
pub struct EncryptedFileStore {
    file: AtomicFile,
    password: Zeroizing<String>,
    kdf: KdfParams,
}

impl EncryptedFileStore {
    pub fn new(data_dir: impl AsRef<Path>, password: impl Into<String>) -> Self {
        Self {
            file: AtomicFile::new(data_dir.as_ref().join(ENCRYPTED_WALLET_FILE)),
            password: Zeroizing::new(password.into()),
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.file.path)
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}

impl WalletStore for EncryptedFileStore {
    fn load(&self) -> Result<Option<Wallet>> {
        let Some(data) = self.file.read()? else {
            return Ok(None);
        };
        if data.len() < SALT_LEN + IV_LEN {
            return Err(VaultError::MalformedPackage(format!(
                "encrypted store is {} bytes, too short",
                data.len()
            )));
        }

        let (salt, rest) = data.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);
        let plaintext = crypto::decrypt_with(ciphertext, &self.password, salt, iv, self.kdf)?;

        let wallet = decode_wallet(&plaintext)?;
        tracing::info!(path = %self.path().display(), accounts = wallet.accounts().len(), "wallet loaded");
        Ok(Some(wallet))
    }

    fn save(&self, wallet: &Wallet) -> Result<()> {
        let plaintext = encode_wallet(wallet)?;
        let sealed = crypto::encrypt_with(&plaintext, &self.password, self.kdf)?;

        let mut data = Vec::with_capacity(SALT_LEN + IV_LEN + sealed.ciphertext.len());
        data.extend_from_slice(&sealed.salt);
        data.extend_from_slice(&sealed.iv);
        data.extend_from_slice(&sealed.ciphertext);

        self.file.write(&data)?;
        tracing::info!(path = %self.path().display(), "wallet saved (encrypted)");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.file.remove()?;
        tracing::info!(path = %self.path().display(), "wallet cleared");
        Ok(())
    }
}

/// In-process store. Keeps the serialized form so loads go through the same
/// validation as the file stores.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blob: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Zeroizing<Vec<u8>>>>> {
        self.blob
            .lock()
            .map_err(|_| VaultError::Storage("memory store lock poisoned".into()))
    }
}

impl WalletStore for MemoryStore {
    fn load(&self) -> Result<Option<Wallet>> {
        match self.lock()?.as_ref() {
            Some(bytes) => decode_wallet(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, wallet: &Wallet) -> Result<()> {
        let encoded = encode_wallet(wallet)?;
        *self.lock()? = Some(encoded);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{create_wallet_from_mnemonic, WalletOptions};
    use tempfile::tempdir;

    const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
                                 abandon abandon abandon abandon abandon about";

    fn wallet() -> Wallet {
        create_wallet_from_mnemonic(ABANDON_ABOUT, WalletOptions::default(), 3).unwrap()
    }

    fn fast() -> KdfParams {
        KdfParams::new(1_000).unwrap()
    }

    // ------ JSON FILE STORE ------

    #[test]
    fn json_store_starts_empty() {
        let dir = tempdir().unwrap();
        assert!(JsonFileStore::new(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn json_store_roundtrip_restores_private_keys() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let original = wallet();
        store.save(&original).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.accounts(), original.accounts());
        assert!(loaded.accounts()[0].private_key_hex().is_some());
    }

    #[test]
    fn json_store_never_writes_private_keys() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let w = wallet();
        store.save(&w).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let key = w.accounts()[0].private_key_hex().unwrap();
        assert!(!raw.contains(key));
        assert!(raw.contains("\"publicKey\""));
    }

    #[test]
    fn json_store_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper"));
        store.save(&wallet()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn json_store_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&wallet()).unwrap();
        store.save(&wallet()).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![WALLET_FILE.to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn json_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&wallet()).unwrap();
        store.save(&wallet()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn json_store_rejects_tampered_accounts() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let w = wallet();
        store.save(&w).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let first = w.accounts()[0].address();
        let second = w.accounts()[1].address();
        fs::write(store.path(), raw.replacen(first, second, 1)).unwrap();

        assert!(matches!(store.load(), Err(VaultError::MalformedPackage(_))));
    }

    #[test]
    fn json_store_rejects_garbage() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        fs::write(store.path(), b"{\"not\": \"a wallet\"}").unwrap();
        assert!(matches!(store.load(), Err(VaultError::MalformedPackage(_))));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.clear().unwrap();
        store.save(&wallet()).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    // ------ ENCRYPTED FILE STORE ------

    #[test]
    fn encrypted_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "store-pass").with_kdf(fast());
        store.save(&wallet()).unwrap();

        let raw = fs::read(store.path()).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("abandon"));

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.mnemonic(), wallet().mnemonic());
    }

    #[test]
    fn encrypted_store_wrong_password() {
        let dir = tempdir().unwrap();
        EncryptedFileStore::new(dir.path(), "store-pass")
            .with_kdf(fast())
            .save(&wallet())
            .unwrap();

        let other = EncryptedFileStore::new(dir.path(), "other-pass").with_kdf(fast());
        assert!(matches!(other.load(), Err(VaultError::Decryption)));
    }

    #[test]
    fn encrypted_store_truncated_file() {
        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "pw").with_kdf(fast());
        fs::write(store.path(), [0u8; 10]).unwrap();
        assert!(matches!(store.load(), Err(VaultError::MalformedPackage(_))));
    }

    #[test]
    fn encrypted_store_debug_hides_password() {
        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "hunter2-secret");
        assert!(!format!("{store:?}").contains("hunter2"));
    }

    // ------ MEMORY STORE ------

    #[test]
    fn memory_store_roundtrip_and_clear() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&wallet()).unwrap();
        assert_eq!(store.load().unwrap().unwrap().accounts().len(), 3);
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
