//! Local secure storage.
//!
//! [`SecureStorage`] is the small key-value interface the platform provides: the iOS Keychain,
//! the Android Keystore-backed preferences, or the desktop OS keyring. It must survive restarts,
//! be private to the application, and be fully wiped by [`SecureStorage::clear_all`].
//!
//! [`KeyShareStore`] builds the key manager's local state on top of it: one device id, at most
//! one encrypted device share, and the id of a locally registered passkey.
//!
//! # Format
//!
//! The device share is stored as a single item so that replacing it is atomic:
//!
//! ```text
//! +===========+=========================+
//! |  Nonce    |  Ciphertext (with tag)  |
//! +===========+=========================+
//! ```
//!
//! - Nonce is the 24-byte secretbox nonce
//! - Ciphertext is the secretbox output, tag first

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::{error::StorageError, primitives::NONCE_BYTES};

/// Item holding the persistent device id.
pub const DEVICE_ID_KEY: &str = "e2ee.device_id";
/// Item holding the encrypted device share.
pub const DEVICE_SHARE_KEY: &str = "e2ee.device_share";
/// Item holding the credential id of a passkey registered on this device.
pub const PASSKEY_CREDENTIAL_KEY: &str = "e2ee.passkey_credential_id";

/// A platform secure key-value store.
pub trait SecureStorage: Send + Sync {
    /// Store `value` under `key`, replacing any existing value.
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Fetch the value under `key`. Fails with [`StorageError::ItemNotFound`] if absent.
    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, StorageError>;

    /// Remove the value under `key`. Removing a missing item is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every item this store holds.
    fn clear_all(&self) -> Result<(), StorageError>;

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(StorageError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Process-local storage. Nothing survives a restart; used for tests and ephemeral sessions.
/// Values are zeroed when removed.
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecureStorage for MemoryStorage {
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut old) = items.insert(key.to_owned(), value.to_vec()) {
            old.zeroize();
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, StorageError> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        items
            .get(key)
            .map(|v| Zeroizing::new(v.clone()))
            .ok_or_else(|| StorageError::ItemNotFound(key.to_owned()))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut old) = items.remove(key) {
            old.zeroize();
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        for value in items.values_mut() {
            value.zeroize();
        }
        items.clear();
        Ok(())
    }
}

/// A single JSON document of base64 values, rewritten atomically on every change and readable
/// only by the owning user. For desktop targets without an OS keyring.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Open (or prepare to create) the store at `path`. Parent directories are created.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = Zeroizing::new(fs::read_to_string(&self.path)?);
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    fn write_all(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let content = Zeroizing::new(
            serde_json::to_string(items).map_err(|e| StorageError::Encoding(e.to_string()))?,
        );
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, content.as_bytes())?;
        set_restrictive_permissions(&tmp_path)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl SecureStorage for FileStorage {
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.read_all()?;
        items.insert(key.to_owned(), STANDARD.encode(value));
        let result = self.write_all(&items);
        zeroize_values(&mut items);
        result
    }

    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.read_all()?;
        let result = match items.get(key) {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Zeroizing::new)
                .map_err(|e| StorageError::Encoding(e.to_string())),
            None => Err(StorageError::ItemNotFound(key.to_owned())),
        };
        zeroize_values(&mut items);
        result
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.read_all()?;
        let result = match items.remove(key) {
            Some(mut old) => {
                old.zeroize();
                self.write_all(&items)
            }
            None => Ok(()),
        };
        zeroize_values(&mut items);
        result
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

fn zeroize_values(items: &mut BTreeMap<String, String>) {
    for value in items.values_mut() {
        value.zeroize();
    }
}

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_restrictive_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

/// The OS keyring (Keychain, Credential Manager, Secret Service), one entry per item.
///
/// Keyrings can't enumerate their entries, so the names of stored items are tracked in an extra
/// index entry for [`SecureStorage::clear_all`].
#[cfg(feature = "os-keyring")]
pub struct KeyringStorage {
    service: String,
    lock: Mutex<()>,
}

#[cfg(feature = "os-keyring")]
impl KeyringStorage {
    const INDEX_KEY: &'static str = "e2ee.index";

    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(&self.service, key).map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn read(&self, key: &str) -> Result<Option<Zeroizing<String>>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(Zeroizing::new(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    fn index(&self) -> Result<Vec<String>, StorageError> {
        match self.read(Self::INDEX_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StorageError::Encoding(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, index: &[String]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(index).map_err(|e| StorageError::Encoding(e.to_string()))?;
        self.entry(Self::INDEX_KEY)?
            .set_password(&raw)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

#[cfg(feature = "os-keyring")]
impl SecureStorage for KeyringStorage {
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let encoded = Zeroizing::new(STANDARD.encode(value));
        self.entry(key)?
            .set_password(&encoded)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut index = self.index()?;
        if !index.iter().any(|k| k == key) {
            index.push(key.to_owned());
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, StorageError> {
        let encoded = self
            .read(key)?
            .ok_or_else(|| StorageError::ItemNotFound(key.to_owned()))?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Zeroizing::new)
            .map_err(|e| StorageError::Encoding(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.remove(key)?;
        let mut index = self.index()?;
        let before = index.len();
        index.retain(|k| k != key);
        if index.len() != before {
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        for key in self.index()? {
            self.remove(&key)?;
        }
        self.remove(Self::INDEX_KEY)
    }
}

/// The encrypted device share as persisted locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredDeviceShare {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_BYTES],
}

/// The key manager's local state, on top of a [`SecureStorage`].
#[derive(Clone)]
pub struct KeyShareStore {
    storage: Arc<dyn SecureStorage>,
    device_id_lock: Arc<Mutex<()>>,
}

impl KeyShareStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self {
            storage,
            device_id_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Return the persisted device id, creating and persisting a random one on first use.
    pub fn get_or_create_device_id(&self) -> Result<String, StorageError> {
        let _guard = self.device_id_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.storage.get(DEVICE_ID_KEY) {
            Ok(raw) => String::from_utf8(raw.to_vec())
                .map_err(|_| StorageError::Encoding("device id is not UTF-8".into())),
            Err(StorageError::ItemNotFound(_)) => {
                let device_id = Uuid::new_v4().to_string();
                self.storage.save(DEVICE_ID_KEY, device_id.as_bytes())?;
                info!(device_id = %device_id, "Created device id");
                Ok(device_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Store the encrypted device share, replacing any previous one.
    pub fn save_device_share(&self, ciphertext: &[u8], nonce: &[u8; NONCE_BYTES]) -> Result<(), StorageError> {
        let mut item = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        item.extend_from_slice(nonce);
        item.extend_from_slice(ciphertext);
        self.storage.save(DEVICE_SHARE_KEY, &item)?;
        debug!("Saved device share");
        Ok(())
    }

    /// Fetch the encrypted device share. Fails with [`StorageError::ItemNotFound`] if absent.
    pub fn get_device_share(&self) -> Result<StoredDeviceShare, StorageError> {
        let item = self.storage.get(DEVICE_SHARE_KEY)?;
        if item.len() < NONCE_BYTES {
            return Err(StorageError::Encoding("device share item is truncated".into()));
        }
        let (nonce, ciphertext) = item.split_at(NONCE_BYTES);
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        nonce_bytes.copy_from_slice(nonce);
        Ok(StoredDeviceShare {
            ciphertext: ciphertext.to_vec(),
            nonce: nonce_bytes,
        })
    }

    pub fn has_device_share(&self) -> Result<bool, StorageError> {
        self.storage.contains(DEVICE_SHARE_KEY)
    }

    pub fn remove_device_share(&self) -> Result<(), StorageError> {
        self.storage.delete(DEVICE_SHARE_KEY)?;
        debug!("Removed device share");
        Ok(())
    }

    pub fn save_passkey_credential(&self, credential_id: &str) -> Result<(), StorageError> {
        self.storage.save(PASSKEY_CREDENTIAL_KEY, credential_id.as_bytes())
    }

    /// The credential id of the passkey registered on this device, if any.
    pub fn passkey_credential(&self) -> Result<Option<String>, StorageError> {
        match self.storage.get(PASSKEY_CREDENTIAL_KEY) {
            Ok(raw) => String::from_utf8(raw.to_vec())
                .map(Some)
                .map_err(|_| StorageError::Encoding("passkey credential id is not UTF-8".into())),
            Err(StorageError::ItemNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn remove_passkey_credential(&self) -> Result<(), StorageError> {
        self.storage.delete(PASSKEY_CREDENTIAL_KEY)
    }

    pub fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.storage.save(key, value)
    }

    pub fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>, StorageError> {
        self.storage.get(key)
    }

    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.storage.delete(key)
    }

    /// Wipe every locally stored item, the device id included.
    pub fn clear_all(&self) -> Result<(), StorageError> {
        self.storage.clear_all()?;
        info!("Cleared local key storage");
        Ok(())
    }
}
