//! Deterministic fakes of the external collaborators.
//!
//! [`MemoryTransport`] is an in-memory key-share service holding one account. Several key
//! managers can share one instance to play different devices of the same user.
//! [`StaticPasskey`] hands out a fixed KEK for a fixed credential.

use std::{
    collections::HashMap,
    future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use async_trait::async_trait;

use crate::{
    error::{PasskeyError, TransportError},
    passkey::{PasskeyProvider, PasskeyRegistration},
    primitives::generic_hash,
    secret::{Secret, SymmetricKey},
    transport::{
        DeviceSecret, KeyShareBundle, KeySharesStatus, KeyShareTransport, PasskeyEncryption,
        PasswordEncryption, RegisterDeviceRequest,
    },
};

#[derive(Default)]
struct Account {
    devices: HashMap<String, RegisterDeviceRequest>,
    bundle: Option<KeyShareBundle>,
    password: Option<PasswordEncryption>,
    passkeys: HashMap<String, PasskeyEncryption>,
}

/// In-memory key-share service. Every call with an empty token is rejected as unauthorized.
#[derive(Default)]
pub struct MemoryTransport {
    account: Mutex<Account>,
    offline: AtomicBool,
    fail_uploads: AtomicBool,
    stall_fetches: AtomicBool,
    stall_uploads: AtomicBool,
    uploads: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail key-share uploads with a server error.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make bundle, password and passkey fetches hang forever.
    pub fn stall_fetches(&self, stall: bool) {
        self.stall_fetches.store(stall, Ordering::SeqCst);
    }

    /// Make key-share uploads hang forever before the bundle is stored.
    pub fn stall_uploads(&self, stall: bool) {
        self.stall_uploads.store(stall, Ordering::SeqCst);
    }

    /// The secret this service issues to `device_id`.
    pub fn secret_for(device_id: &str) -> Vec<u8> {
        generic_hash(&[b"memory transport device secret", device_id.as_bytes()]).to_vec()
    }

    pub fn bundle(&self) -> Option<KeyShareBundle> {
        self.account().bundle.clone()
    }

    pub fn is_registered(&self, device_id: &str) -> bool {
        self.account().devices.contains_key(device_id)
    }

    pub fn has_passkey(&self, credential_id: &str) -> bool {
        self.account().passkeys.contains_key(credential_id)
    }

    /// Number of accepted bundle uploads.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn account(&self) -> std::sync::MutexGuard<'_, Account> {
        self.account.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, token: &str) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("offline".into()));
        }
        if token.is_empty() {
            return Err(TransportError::Unauthorized);
        }
        Ok(())
    }

    async fn maybe_stall(&self) {
        if self.stall_fetches.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl KeyShareTransport for MemoryTransport {
    async fn register_device(
        &self,
        token: &str,
        request: &RegisterDeviceRequest,
    ) -> Result<DeviceSecret, TransportError> {
        self.check(token)?;
        self.account()
            .devices
            .insert(request.device_id.clone(), request.clone());
        Ok(DeviceSecret {
            device_secret: Self::secret_for(&request.device_id),
        })
    }

    async fn device_secret(&self, token: &str, device_id: &str) -> Result<DeviceSecret, TransportError> {
        self.check(token)?;
        if !self.is_registered(device_id) {
            return Err(TransportError::NotFound);
        }
        Ok(DeviceSecret {
            device_secret: Self::secret_for(device_id),
        })
    }

    async fn check_key_shares(&self, token: &str) -> Result<KeySharesStatus, TransportError> {
        self.check(token)?;
        Ok(KeySharesStatus {
            has_shares: self.account().bundle.is_some(),
        })
    }

    async fn create_key_shares(&self, token: &str, bundle: &KeyShareBundle) -> Result<(), TransportError> {
        self.check(token)?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 500,
                message: "upload rejected".into(),
            });
        }
        if self.stall_uploads.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }
        self.account().bundle = Some(bundle.clone());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn key_shares(&self, token: &str) -> Result<KeyShareBundle, TransportError> {
        self.check(token)?;
        self.maybe_stall().await;
        self.account().bundle.clone().ok_or(TransportError::NotFound)
    }

    async fn has_password_encryption(&self, token: &str) -> Result<bool, TransportError> {
        self.check(token)?;
        Ok(self.account().password.is_some())
    }

    async fn set_password_encryption(
        &self,
        token: &str,
        encryption: &PasswordEncryption,
    ) -> Result<(), TransportError> {
        self.check(token)?;
        self.account().password = Some(encryption.clone());
        Ok(())
    }

    async fn password_encryption(&self, token: &str) -> Result<Option<PasswordEncryption>, TransportError> {
        self.check(token)?;
        self.maybe_stall().await;
        Ok(self.account().password.clone())
    }

    async fn remove_password_encryption(&self, token: &str) -> Result<(), TransportError> {
        self.check(token)?;
        self.account().password = None;
        Ok(())
    }

    async fn set_passkey_encryption(
        &self,
        token: &str,
        encryption: &PasskeyEncryption,
    ) -> Result<(), TransportError> {
        self.check(token)?;
        self.account()
            .passkeys
            .insert(encryption.credential_id.clone(), encryption.clone());
        Ok(())
    }

    async fn passkey_encryption(
        &self,
        token: &str,
        credential_id: &str,
    ) -> Result<Option<PasskeyEncryption>, TransportError> {
        self.check(token)?;
        self.maybe_stall().await;
        Ok(self.account().passkeys.get(credential_id).cloned())
    }

    async fn remove_passkey_encryption(&self, token: &str, credential_id: &str) -> Result<(), TransportError> {
        self.check(token)?;
        match self.account().passkeys.remove(credential_id) {
            Some(_) => Ok(()),
            None => Err(TransportError::NotFound),
        }
    }
}

/// A passkey provider with one credential and a fixed KEK.
pub struct StaticPasskey {
    credential_id: String,
    kek: [u8; 32],
    cancel: AtomicBool,
}

impl StaticPasskey {
    pub fn new(credential_id: impl Into<String>, kek: [u8; 32]) -> Self {
        Self {
            credential_id: credential_id.into(),
            kek,
            cancel: AtomicBool::new(false),
        }
    }

    /// Make every prompt report that the user dismissed it.
    pub fn set_cancel(&self, cancel: bool) {
        self.cancel.store(cancel, Ordering::SeqCst);
    }

    fn prompt(&self) -> Result<(), PasskeyError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(PasskeyError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl PasskeyProvider for StaticPasskey {
    async fn register(&self, _name: &str) -> Result<PasskeyRegistration, PasskeyError> {
        self.prompt()?;
        Ok(PasskeyRegistration {
            credential_id: self.credential_id.clone(),
            kek: Secret::from_bytes(self.kek),
        })
    }

    async fn authenticate(&self, credential_id: &str) -> Result<SymmetricKey, PasskeyError> {
        self.prompt()?;
        if credential_id != self.credential_id {
            return Err(PasskeyError::Failed(format!("unknown credential {}", credential_id)));
        }
        Ok(Secret::from_bytes(self.kek))
    }
}
