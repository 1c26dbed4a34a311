//! The key manager: setup, unlock, and maintenance of a user's master key.
//!
//! The master key is split three ways (see [`split`](crate::split)). The device share lives
//! sealed in local storage, the auth share is held by the key-share service in the clear, and
//! the recovery share is held by the service sealed under the recovery key. Independently of the
//! shares, the service keeps the master key sealed under the recovery key, under a password KEK,
//! and under passkey KEKs, which are the paths that actually unlock:
//!
//! - [`unlock_with_recovery_phrase`](E2eeKeyManager::unlock_with_recovery_phrase)
//! - [`unlock_with_password`](E2eeKeyManager::unlock_with_password)
//! - [`unlock_with_passkey`](E2eeKeyManager::unlock_with_passkey)
//!
//! The device share alone never reconstructs the master key, so
//! [`unlock_with_device_share`](E2eeKeyManager::unlock_with_device_share) always asks for one of
//! the above instead.
//!
//! Setup, unlock, reset, lock and sign-out run one at a time. A flow that fails or whose future is
//! dropped leaves the session and the reported [`KeyState`] as they were.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand_core::OsRng;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    config::KeyManagerConfig,
    derive::{device_share_key, entropy_to_mnemonic, generate_mnemonic, password_kek, recovery_key_from_mnemonic},
    device::DeviceIdentity,
    error::{CryptoError, KeyError, TransportError},
    passkey::PasskeyProvider,
    primitives::{
        constant_time_eq, decrypt_secret, encrypt, public_key_from_private, random_array, random_secret,
        KeyPair, Sealed, SALT_BYTES,
    },
    secret::{MasterKey, Secret, SymmetricKey},
    session::SecureSession,
    split::{split, Shares},
    storage::{KeyShareStore, SecureStorage},
    transport::{
        DeviceSecret, KeyShareBundle, KeyShareTransport, PasskeyEncryption, PasswordEncryption,
        RegisterDeviceRequest,
    },
    CryptoSrc,
};

/// Where the key manager is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
    /// No keys exist for this account, or none are known on this device yet.
    NoKeys,
    /// A setup or unlock flow is running.
    Unlocking,
    Unlocked,
    Locked,
}

/// Sets the state to `Unlocking` for the lifetime of a flow and puts the previous state back
/// unless the flow commits.
struct Transition<'a> {
    state: &'a Mutex<KeyState>,
    previous: KeyState,
    committed: bool,
}

impl<'a> Transition<'a> {
    fn begin(state: &'a Mutex<KeyState>, previous: KeyState) -> Self {
        *lock_state(state) = KeyState::Unlocking;
        Self {
            state,
            previous,
            committed: false,
        }
    }

    fn commit(mut self, next: KeyState) {
        *lock_state(self.state) = next;
        self.committed = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *lock_state(self.state) = self.previous;
        }
    }
}

/// Keys generated by setup or reset, not yet uploaded.
struct NewKeys {
    phrase: Zeroizing<String>,
    master_key: MasterKey,
    key_pair: KeyPair,
    device_share: Sealed,
    bundle: KeyShareBundle,
}

fn lock_state(state: &Mutex<KeyState>) -> MutexGuard<'_, KeyState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs the setup, unlock and maintenance flows for one device, keeping the shared
/// [`SecureSession`] and the local [`KeyShareStore`] in step with the key-share service.
pub struct E2eeKeyManager {
    config: KeyManagerConfig,
    transport: Arc<dyn KeyShareTransport>,
    store: KeyShareStore,
    session: Arc<SecureSession>,
    passkey: Option<Arc<dyn PasskeyProvider>>,
    csprng: Mutex<Box<dyn CryptoSrc + Send>>,
    flow: tokio::sync::Mutex<()>,
    state: Mutex<KeyState>,
}

impl E2eeKeyManager {
    /// Build a manager over the given service, local storage and session. Randomness comes from
    /// the OS until replaced with [`with_csprng`](Self::with_csprng).
    pub fn new(
        config: KeyManagerConfig,
        transport: Arc<dyn KeyShareTransport>,
        storage: Arc<dyn SecureStorage>,
        session: Arc<SecureSession>,
    ) -> Self {
        let store = KeyShareStore::new(storage);
        let initial = if session.is_unlocked() {
            KeyState::Unlocked
        } else if matches!(store.has_device_share(), Ok(true)) {
            KeyState::Locked
        } else {
            KeyState::NoKeys
        };
        Self {
            config,
            transport,
            store,
            session,
            passkey: None,
            csprng: Mutex::new(Box::new(OsRng)),
            flow: tokio::sync::Mutex::new(()),
            state: Mutex::new(initial),
        }
    }

    pub fn with_csprng(mut self, csprng: impl CryptoSrc + Send + 'static) -> Self {
        self.csprng = Mutex::new(Box::new(csprng));
        self
    }

    pub fn with_passkey_provider(mut self, provider: Arc<dyn PasskeyProvider>) -> Self {
        self.passkey = Some(provider);
        self
    }

    pub fn session(&self) -> &Arc<SecureSession> {
        &self.session
    }

    pub fn store(&self) -> &KeyShareStore {
        &self.store
    }

    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    /// The current state. A session locked from elsewhere reads as `Locked`.
    pub fn state(&self) -> KeyState {
        let state = *lock_state(&self.state);
        match state {
            KeyState::Unlocked if !self.session.is_unlocked() => KeyState::Locked,
            other => other,
        }
    }

    /// This device's identity, creating the device id on first use.
    pub fn device_identity(&self) -> Result<DeviceIdentity, KeyError> {
        let device_id = self.store.get_or_create_device_id()?;
        Ok(DeviceIdentity::local(
            device_id,
            self.config.device_name.clone(),
            self.config.platform,
        ))
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut (dyn CryptoSrc + Send)) -> T) -> T {
        let mut csprng = self.csprng.lock().unwrap_or_else(PoisonError::into_inner);
        f(csprng.as_mut())
    }

    fn set_state(&self, state: KeyState) {
        *lock_state(&self.state) = state;
    }

    /// Ask the service whether this account already has key shares.
    pub async fn check_setup_status(&self, token: &str) -> Result<bool, KeyError> {
        let status = self
            .transport
            .check_key_shares(token)
            .await
            .map_err(KeyError::SetupCheckFailed)?;
        {
            let mut state = lock_state(&self.state);
            match (*state, status.has_shares) {
                (KeyState::NoKeys, true) => *state = KeyState::Locked,
                (KeyState::Locked, false) if !self.session.is_unlocked() => *state = KeyState::NoKeys,
                _ => {}
            }
        }
        debug!(has_shares = status.has_shares, "Checked key setup status");
        Ok(status.has_shares)
    }

    /// Create all keys for a new account, upload them, and unlock the session.
    ///
    /// Returns the 24-word recovery phrase. It can't be recomputed later without the master key,
    /// so the caller must show it to the user now. Refuses with [`KeyError::KeysAlreadyExist`]
    /// when the service already holds shares for this account; use
    /// [`reset_keys`](Self::reset_keys) to replace them.
    pub async fn setup_new_user(&self, token: &str) -> Result<Zeroizing<String>, KeyError> {
        let _flow = self.flow.lock().await;
        let transition = Transition::begin(&self.state, self.state());
        let status = self
            .transport
            .check_key_shares(token)
            .await
            .map_err(KeyError::SetupCheckFailed)?;
        if status.has_shares {
            return Err(KeyError::KeysAlreadyExist);
        }

        let keys = self.generate_keys(token).await?;
        self.upload_keys(token, &keys).await?;
        self.install_keys(&keys)?;
        transition.commit(KeyState::Unlocked);
        info!("Created keys for new user");
        Ok(keys.phrase)
    }

    /// Register the device and generate a fresh master key, key pair and recovery phrase. Nothing
    /// is stored or uploaded yet.
    async fn generate_keys(&self, token: &str) -> Result<NewKeys, KeyError> {
        let identity = self.device_identity()?;
        let device_secret = self.register_device(token, &identity).await?;
        let device_key = device_share_key(
            &identity.device_id,
            &identity.fingerprint,
            &device_secret.device_secret,
        )?;

        let keys = self.with_rng(|rng| {
            let master_key = random_secret(rng)?;
            let key_pair = KeyPair::generate(rng)?;
            let (phrase, recovery_key) = generate_mnemonic(rng)?;
            let shares = split(rng, &master_key)?;
            let device_share = encrypt(rng, shares.device.as_bytes(), device_key.as_bytes())?;
            let bundle = seal_bundle(rng, &master_key, &recovery_key, &shares, &key_pair)?;
            Ok::<_, CryptoError>(NewKeys {
                phrase,
                master_key,
                key_pair,
                device_share,
                bundle,
            })
        })?;
        debug!(device_id = %identity.device_id, "Generated new keys");
        Ok(keys)
    }

    async fn upload_keys(&self, token: &str, keys: &NewKeys) -> Result<(), KeyError> {
        self.transport
            .create_key_shares(token, &keys.bundle)
            .await
            .map_err(KeyError::KeySharesUploadFailed)
    }

    /// Persist the device share and unlock the session. Only runs once the service has accepted
    /// the matching bundle, and never awaits.
    fn install_keys(&self, keys: &NewKeys) -> Result<(), KeyError> {
        self.store
            .save_device_share(&keys.device_share.ciphertext, &keys.device_share.nonce)?;
        self.session.unlock(
            &keys.master_key,
            Some(&keys.key_pair.private_key),
            Some(&keys.key_pair.public_key),
        );
        Ok(())
    }

    /// Unlock with the device share alone.
    ///
    /// The device share can't reconstruct the master key without the recovery share, so this
    /// never unlocks. It reports [`KeyError::DeviceShareNotFound`] when no share is stored and
    /// [`KeyError::RecoveryRequired`] otherwise; route the user to a phrase, password or passkey.
    pub async fn unlock_with_device_share(&self, _token: &str) -> Result<(), KeyError> {
        let _flow = self.flow.lock().await;
        if !self.store.has_device_share()? {
            return Err(KeyError::DeviceShareNotFound);
        }
        debug!("Device share present, recovery required to unlock");
        Err(KeyError::RecoveryRequired)
    }

    pub async fn unlock_with_recovery_phrase(&self, mnemonic: &str, token: &str) -> Result<(), KeyError> {
        let _flow = self.flow.lock().await;
        let transition = Transition::begin(&self.state, self.state());

        let recovery_key = recovery_key_from_mnemonic(mnemonic)?;
        let bundle = self.fetch_bundle(token).await?;
        let master_key = decrypt_secret(
            &bundle.master_key_recovery,
            &bundle.master_key_recovery_nonce,
            recovery_key.as_bytes(),
        )?;
        self.finish_unlock(token, &master_key, &bundle).await?;

        transition.commit(KeyState::Unlocked);
        info!("Unlocked with recovery phrase");
        Ok(())
    }

    pub async fn has_password_encryption(&self, token: &str) -> Result<bool, KeyError> {
        self.transport
            .has_password_encryption(token)
            .await
            .map_err(KeyError::KeySharesFetchFailed)
    }

    /// Seal the unlocked master key under a password and store it with the service, replacing any
    /// previous password. Argon2id costs come from the config and are stored alongside.
    pub async fn setup_password_encryption(&self, password: &str, token: &str) -> Result<(), KeyError> {
        let _flow = self.flow.lock().await;
        let master_key = self.session.master_key().ok_or(KeyError::SessionLocked)?;
        let cost = self.config.password_cost();

        let salt: [u8; SALT_BYTES] = self.with_rng(|rng| random_array(rng))?;
        let kek = password_kek(password, &salt, cost.ops_limit, cost.mem_limit)?;
        let sealed = self.with_rng(|rng| encrypt(rng, master_key.as_bytes(), kek.as_bytes()))?;

        let encryption = PasswordEncryption {
            encrypted_master_key: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
            salt: salt.to_vec(),
            ops_limit: cost.ops_limit,
            mem_limit: cost.mem_limit,
        };
        self.transport
            .set_password_encryption(token, &encryption)
            .await
            .map_err(KeyError::KeySharesUploadFailed)?;
        info!(ops_limit = cost.ops_limit, mem_limit = cost.mem_limit, "Set up password encryption");
        Ok(())
    }

    pub async fn unlock_with_password(&self, password: &str, token: &str) -> Result<(), KeyError> {
        let _flow = self.flow.lock().await;
        let transition = Transition::begin(&self.state, self.state());

        let encryption = self
            .transport
            .password_encryption(token)
            .await
            .map_err(KeyError::KeySharesFetchFailed)?
            .ok_or(KeyError::PasswordEncryptionNotSet)?;
        if encryption.salt.len() != SALT_BYTES {
            return Err(KeyError::InvalidServerData("password salt"));
        }
        let kek = password_kek(password, &encryption.salt, encryption.ops_limit, encryption.mem_limit)?;
        let master_key = decrypt_secret(&encryption.encrypted_master_key, &encryption.nonce, kek.as_bytes())
            .map_err(|e| match e {
                CryptoError::DecryptionFailed => KeyError::IncorrectPassword,
                other => KeyError::Crypto(other),
            })?;

        let bundle = self.fetch_bundle(token).await?;
        self.finish_unlock(token, &master_key, &bundle).await?;

        transition.commit(KeyState::Unlocked);
        info!("Unlocked with password");
        Ok(())
    }

    /// Delete the password-sealed master key from the service. Requires an unlocked session.
    pub async fn remove_password_encryption(&self, token: &str) -> Result<(), KeyError> {
        let _flow = self.flow.lock().await;
        if !self.session.is_unlocked() {
            return Err(KeyError::SessionLocked);
        }
        self.transport
            .remove_password_encryption(token)
            .await
            .map_err(KeyError::KeySharesUploadFailed)?;
        info!("Removed password encryption");
        Ok(())
    }

    fn passkey_provider(&self) -> Result<&Arc<dyn PasskeyProvider>, KeyError> {
        self.passkey.as_ref().ok_or(KeyError::PasskeyUnavailable)
    }

    /// Register a passkey on this device and seal the unlocked master key under its KEK. Returns
    /// the new credential id. `name` defaults to the configured device name.
    pub async fn register_passkey(&self, name: Option<&str>, token: &str) -> Result<String, KeyError> {
        let provider = self.passkey_provider()?;
        let _flow = self.flow.lock().await;
        let master_key = self.session.master_key().ok_or(KeyError::SessionLocked)?;
        let name = name.unwrap_or(&self.config.device_name);

        let registration = provider.register(name).await?;
        let sealed = self.with_rng(|rng| encrypt(rng, master_key.as_bytes(), registration.kek.as_bytes()))?;
        let encryption = PasskeyEncryption {
            credential_id: registration.credential_id.clone(),
            name: name.to_owned(),
            encrypted_master_key: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
        };
        self.transport
            .set_passkey_encryption(token, &encryption)
            .await
            .map_err(KeyError::KeySharesUploadFailed)?;
        self.store.save_passkey_credential(&registration.credential_id)?;
        info!(credential_id = %registration.credential_id, "Registered passkey");
        Ok(registration.credential_id)
    }

    pub async fn unlock_with_passkey(&self, token: &str) -> Result<(), KeyError> {
        let provider = self.passkey_provider()?;
        let _flow = self.flow.lock().await;
        let transition = Transition::begin(&self.state, self.state());

        let credential_id = self
            .store
            .passkey_credential()?
            .ok_or(KeyError::PasskeyNotRegistered)?;
        let encryption = self
            .transport
            .passkey_encryption(token, &credential_id)
            .await
            .map_err(KeyError::KeySharesFetchFailed)?
            .ok_or(KeyError::PasskeyNotRegistered)?;
        let kek = provider.authenticate(&credential_id).await?;
        let master_key = decrypt_secret(&encryption.encrypted_master_key, &encryption.nonce, kek.as_bytes())?;

        let bundle = self.fetch_bundle(token).await?;
        self.finish_unlock(token, &master_key, &bundle).await?;

        transition.commit(KeyState::Unlocked);
        info!(credential_id = %credential_id, "Unlocked with passkey");
        Ok(())
    }

    /// Whether a passkey has been registered from this device.
    pub fn has_passkey(&self) -> Result<bool, KeyError> {
        Ok(self.store.passkey_credential()?.is_some())
    }

    /// Recompute the recovery phrase from the service's copy of the recovery key. Requires an
    /// unlocked session.
    pub async fn get_recovery_phrase(&self, token: &str) -> Result<Zeroizing<String>, KeyError> {
        let master_key = self.session.master_key().ok_or(KeyError::SessionLocked)?;
        let bundle = self.fetch_bundle(token).await?;
        let recovery_key = open_recovery_key(&bundle, &master_key)?;
        Ok(entropy_to_mnemonic(recovery_key.as_bytes())?)
    }

    /// Throw away every key and start over as a new user. Returns the new recovery phrase.
    ///
    /// The new bundle is uploaded before anything local changes, so a failed upload leaves the
    /// old keys, session and password encryption in place. Once it is accepted, the password and
    /// passkey encryption of the old master key are removed; failures there are logged, not
    /// returned, since the old master key can no longer open the new shares.
    pub async fn reset_keys(&self, token: &str) -> Result<Zeroizing<String>, KeyError> {
        let _flow = self.flow.lock().await;
        let transition = Transition::begin(&self.state, self.state());

        let keys = self.generate_keys(token).await?;
        self.upload_keys(token, &keys).await?;
        self.install_keys(&keys)?;
        transition.commit(KeyState::Unlocked);
        warn!("Reset all keys");

        match self.transport.remove_password_encryption(token).await {
            Ok(()) | Err(TransportError::NotFound) => {}
            Err(e) => warn!(error = %e, "Unable to remove old password encryption"),
        }
        match self.store.passkey_credential() {
            Ok(Some(credential_id)) => {
                match self.transport.remove_passkey_encryption(token, &credential_id).await {
                    Ok(()) | Err(TransportError::NotFound) => {}
                    Err(e) => warn!(error = %e, "Unable to remove old passkey encryption"),
                }
                if let Err(e) = self.store.remove_passkey_credential() {
                    warn!(error = %e, "Unable to remove local passkey credential");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Unable to read local passkey credential"),
        }
        Ok(keys.phrase)
    }

    /// Zero the session. Keys on the service and the local device share are kept.
    pub async fn lock(&self) {
        let _flow = self.flow.lock().await;
        self.session.lock();
        if self.state() != KeyState::NoKeys {
            self.set_state(KeyState::Locked);
        }
        info!("Locked session");
    }

    /// Zero the session and remove this device's local key material. The device id is kept.
    pub async fn sign_out(&self) -> Result<(), KeyError> {
        let _flow = self.flow.lock().await;
        self.session.lock();
        self.set_state(KeyState::NoKeys);
        self.store.remove_device_share()?;
        self.store.remove_passkey_credential()?;
        info!("Signed out");
        Ok(())
    }

    async fn fetch_bundle(&self, token: &str) -> Result<KeyShareBundle, KeyError> {
        self.transport
            .key_shares(token)
            .await
            .map_err(KeyError::KeySharesFetchFailed)
    }

    async fn register_device(&self, token: &str, identity: &DeviceIdentity) -> Result<DeviceSecret, KeyError> {
        let request = RegisterDeviceRequest {
            device_id: identity.device_id.clone(),
            device_name: identity.device_name.clone(),
            platform: identity.platform,
        };
        let secret = self
            .transport
            .register_device(token, &request)
            .await
            .map_err(KeyError::DeviceRegistrationFailed)?;
        check_device_secret(secret)
    }

    /// The secret of an already registered device, registering it if the service doesn't know it.
    async fn fetch_device_secret(&self, token: &str, identity: &DeviceIdentity) -> Result<DeviceSecret, KeyError> {
        match self.transport.device_secret(token, &identity.device_id).await {
            Ok(secret) => check_device_secret(secret),
            Err(TransportError::NotFound) => self.register_device(token, identity).await,
            Err(e) => Err(KeyError::DeviceRegistrationFailed(e)),
        }
    }

    /// Common tail of every unlock path once the master key is known. Nothing is written to the
    /// session until the last step.
    async fn finish_unlock(
        &self,
        token: &str,
        master_key: &MasterKey,
        bundle: &KeyShareBundle,
    ) -> Result<(), KeyError> {
        let (private_key, public_key) = open_key_pair(bundle, master_key)?;
        if !self.store.has_device_share()? {
            self.provision_device_share(token, master_key, bundle).await?;
        }
        self.session
            .unlock(master_key, Some(&private_key), Some(&public_key));
        Ok(())
    }

    /// Give this device a share of the master key. The master key is re-split, so the service's
    /// auth share and sealed recovery share are replaced. The local share is saved only after the
    /// service has accepted the new bundle.
    async fn provision_device_share(
        &self,
        token: &str,
        master_key: &MasterKey,
        bundle: &KeyShareBundle,
    ) -> Result<(), KeyError> {
        let identity = self.device_identity()?;
        let device_secret = self.fetch_device_secret(token, &identity).await?;
        let device_key = device_share_key(
            &identity.device_id,
            &identity.fingerprint,
            &device_secret.device_secret,
        )?;
        let recovery_key = open_recovery_key(bundle, master_key)?;

        let (sealed_device_share, sealed_recovery_share, auth_share) = self.with_rng(|rng| {
            let shares = split(rng, master_key)?;
            let device = encrypt(rng, shares.device.as_bytes(), device_key.as_bytes())?;
            let recovery = encrypt(rng, shares.recovery.as_bytes(), recovery_key.as_bytes())?;
            Ok::<_, CryptoError>((device, recovery, shares.auth.clone()))
        })?;

        let mut updated = bundle.clone();
        updated.auth_share = auth_share.as_bytes().to_vec();
        updated.encrypted_recovery_share = sealed_recovery_share.ciphertext;
        updated.recovery_share_nonce = sealed_recovery_share.nonce.to_vec();
        self.transport
            .create_key_shares(token, &updated)
            .await
            .map_err(KeyError::KeySharesUploadFailed)?;

        self.store
            .save_device_share(&sealed_device_share.ciphertext, &sealed_device_share.nonce)?;
        info!(device_id = %identity.device_id, "Provisioned device share");
        Ok(())
    }
}

fn check_device_secret(secret: DeviceSecret) -> Result<DeviceSecret, KeyError> {
    if secret.device_secret.is_empty() {
        return Err(KeyError::InvalidServerData("device secret"));
    }
    Ok(secret)
}

/// Seal every server-held value for a freshly created key set.
fn seal_bundle(
    rng: &mut (dyn CryptoSrc + Send),
    master_key: &MasterKey,
    recovery_key: &SymmetricKey,
    shares: &Shares,
    key_pair: &KeyPair,
) -> Result<KeyShareBundle, CryptoError> {
    let recovery_share = encrypt(rng, shares.recovery.as_bytes(), recovery_key.as_bytes())?;
    let private_key = encrypt(rng, key_pair.private_key.as_bytes(), master_key.as_bytes())?;
    let master_key_recovery = encrypt(rng, master_key.as_bytes(), recovery_key.as_bytes())?;
    let recovery_key_backup = encrypt(rng, recovery_key.as_bytes(), master_key.as_bytes())?;
    let (encrypted_recovery_share, recovery_share_nonce) = split_sealed(recovery_share);
    let (encrypted_private_key, private_key_nonce) = split_sealed(private_key);
    let (master_key_recovery, master_key_recovery_nonce) = split_sealed(master_key_recovery);
    let (encrypted_recovery_key, recovery_key_nonce) = split_sealed(recovery_key_backup);
    Ok(KeyShareBundle {
        auth_share: shares.auth.as_bytes().to_vec(),
        encrypted_recovery_share,
        recovery_share_nonce,
        public_key: key_pair.public_key.to_vec(),
        encrypted_private_key,
        private_key_nonce,
        master_key_recovery,
        master_key_recovery_nonce,
        encrypted_recovery_key,
        recovery_key_nonce,
    })
}

fn split_sealed(sealed: Sealed) -> (Vec<u8>, Vec<u8>) {
    (sealed.ciphertext, sealed.nonce.to_vec())
}

/// Open the private key and check it against the service's public key.
fn open_key_pair(bundle: &KeyShareBundle, master_key: &MasterKey) -> Result<(Secret<32>, [u8; 32]), KeyError> {
    let public_key: [u8; 32] = bundle
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidServerData("public key"))?;
    let private_key = decrypt_secret(
        &bundle.encrypted_private_key,
        &bundle.private_key_nonce,
        master_key.as_bytes(),
    )?;
    if !constant_time_eq(&public_key_from_private(&private_key), &public_key) {
        return Err(KeyError::Crypto(CryptoError::DecryptionFailed));
    }
    Ok((private_key, public_key))
}

fn open_recovery_key(bundle: &KeyShareBundle, master_key: &MasterKey) -> Result<SymmetricKey, KeyError> {
    Ok(decrypt_secret(
        &bundle.encrypted_recovery_key,
        &bundle.recovery_key_nonce,
        master_key.as_bytes(),
    )?)
}

impl std::fmt::Debug for E2eeKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2eeKeyManager")
            .field("state", &self.state())
            .field("device_name", &self.config.device_name)
            .field("platform", &self.config.platform)
            .field("passkey", &self.passkey.is_some())
            .finish_non_exhaustive()
    }
}
