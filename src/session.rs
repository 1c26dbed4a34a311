//! The in-memory unlocked key state.
//!
//! One [`SecureSession`] exists per process, shared by reference between the key manager and the
//! consumers of the master key. Key bytes are copied in on [`unlock`](SecureSession::unlock) and
//! overwritten with zeros on [`lock`](SecureSession::lock). Readers and writers go through a
//! single `RwLock`, so no reader can observe a partially written or partially zeroed key.

use std::{
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant},
};

use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    error::KeyError,
    primitives::{decrypt, encrypt, Sealed, KEY_BYTES},
    secret::{MasterKey, Secret},
};

#[derive(Default)]
struct KeySlot {
    bytes: [u8; KEY_BYTES],
    present: bool,
}

impl KeySlot {
    fn fill(&mut self, bytes: &[u8; KEY_BYTES]) {
        self.bytes.copy_from_slice(bytes);
        self.present = true;
    }

    fn clear(&mut self) {
        self.bytes.zeroize();
        self.present = false;
    }

    fn get(&self) -> Option<&[u8; KEY_BYTES]> {
        self.present.then_some(&self.bytes)
    }
}

struct SessionState {
    unlocked: bool,
    master_key: KeySlot,
    private_key: KeySlot,
    public_key: KeySlot,
    last_activity_at: Instant,
}

impl SessionState {
    fn clear(&mut self) {
        self.master_key.clear();
        self.private_key.clear();
        self.public_key.clear();
        self.unlocked = false;
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.clear();
    }
}

/// The unlocked master key and key pair, shared between the key manager and content encryption.
/// Locking zeroes every buffer in place.
pub struct SecureSession {
    state: RwLock<SessionState>,
}

impl Default for SecureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureSession {
    /// A new, locked session.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState {
                unlocked: false,
                master_key: KeySlot::default(),
                private_key: KeySlot::default(),
                public_key: KeySlot::default(),
                last_activity_at: Instant::now(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the keys into the session and mark it unlocked. Any previously held keys are zeroed
    /// first.
    pub fn unlock(
        &self,
        master_key: &MasterKey,
        private_key: Option<&Secret<32>>,
        public_key: Option<&[u8; 32]>,
    ) {
        let mut state = self.write();
        state.clear();
        state.master_key.fill(master_key.as_bytes());
        if let Some(private_key) = private_key {
            state.private_key.fill(private_key.as_bytes());
        }
        if let Some(public_key) = public_key {
            state.public_key.fill(public_key);
        }
        state.unlocked = true;
        state.last_activity_at = Instant::now();
    }

    /// Zero every key buffer and mark the session locked.
    pub fn lock(&self) {
        self.write().clear();
    }

    pub fn is_unlocked(&self) -> bool {
        self.read().unlocked
    }

    /// A copy of the master key, or `None` while locked.
    pub fn master_key(&self) -> Option<MasterKey> {
        let state = self.read();
        state.master_key.get().map(|b| Secret::from_bytes(*b))
    }

    pub fn private_key(&self) -> Option<Secret<32>> {
        let state = self.read();
        state.private_key.get().map(|b| Secret::from_bytes(*b))
    }

    pub fn public_key(&self) -> Option<[u8; 32]> {
        self.read().public_key.get().copied()
    }

    /// Note user activity, for an idle-timeout policy to consult. Nothing here enforces a timeout.
    pub fn record_activity(&self) {
        self.write().last_activity_at = Instant::now();
    }

    pub fn last_activity_at(&self) -> Instant {
        self.read().last_activity_at
    }

    /// Time since the last unlock or recorded activity.
    pub fn idle_duration(&self) -> Duration {
        self.read().last_activity_at.elapsed()
    }

    /// Seal `plaintext` under the master key.
    pub fn encrypt<R>(&self, csprng: &mut R, plaintext: &[u8]) -> Result<Sealed, KeyError>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        let state = self.read();
        let key = state.master_key.get().ok_or(KeyError::SessionLocked)?;
        Ok(encrypt(csprng, plaintext, key)?)
    }

    /// Open a payload sealed by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let state = self.read();
        let key = state.master_key.get().ok_or(KeyError::SessionLocked)?;
        Ok(decrypt(ciphertext, nonce, key)?)
    }

    #[cfg(test)]
    fn raw_slots(&self) -> [[u8; KEY_BYTES]; 3] {
        let state = self.read();
        [state.master_key.bytes, state.private_key.bytes, state.public_key.bytes]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;
    use rand::{rngs::StdRng, SeedableRng};
    use std::{sync::Arc, thread};

    fn keys() -> (MasterKey, Secret<32>, [u8; 32]) {
        (
            Secret::from_bytes([0x11; 32]),
            Secret::from_bytes([0x22; 32]),
            [0x33; 32],
        )
    }

    #[test]
    fn starts_locked() {
        let session = SecureSession::new();
        assert!(!session.is_unlocked());
        assert!(session.master_key().is_none());
        assert!(session.private_key().is_none());
        assert!(session.public_key().is_none());
    }

    #[test]
    fn unlock_copies_keys() {
        let session = SecureSession::new();
        let (master, private, public) = keys();
        session.unlock(&master, Some(&private), Some(&public));
        drop(master);
        assert!(session.is_unlocked());
        assert_eq!(session.master_key().unwrap().as_bytes(), &[0x11; 32]);
        assert_eq!(session.private_key().unwrap().as_bytes(), &[0x22; 32]);
        assert_eq!(session.public_key().unwrap(), [0x33; 32]);
    }

    #[test]
    fn lock_zeroes_buffers() {
        let session = SecureSession::new();
        let (master, private, public) = keys();
        session.unlock(&master, Some(&private), Some(&public));
        assert_eq!(session.raw_slots()[0], [0x11; 32]);
        session.lock();
        assert!(!session.is_unlocked());
        assert!(session.master_key().is_none());
        assert!(session.private_key().is_none());
        assert!(session.public_key().is_none());
        for slot in session.raw_slots() {
            assert_eq!(slot, [0u8; 32]);
        }
    }

    #[test]
    fn unlock_without_key_pair() {
        let session = SecureSession::new();
        let (master, private, public) = keys();
        session.unlock(&master, Some(&private), Some(&public));
        session.unlock(&master, None, None);
        assert!(session.is_unlocked());
        assert!(session.private_key().is_none());
        assert_eq!(session.raw_slots()[1], [0u8; 32]);
    }

    #[test]
    fn encrypt_requires_unlock() {
        let session = SecureSession::new();
        let mut csprng = StdRng::seed_from_u64(1);
        assert!(matches!(
            session.encrypt(&mut csprng, b"note"),
            Err(KeyError::SessionLocked)
        ));
        let (master, _, _) = keys();
        session.unlock(&master, None, None);
        let sealed = session.encrypt(&mut csprng, b"note").unwrap();
        assert_eq!(&session.decrypt(&sealed.ciphertext, &sealed.nonce).unwrap()[..], b"note");

        session.unlock(&Secret::from_bytes([0x44; 32]), None, None);
        assert!(matches!(
            session.decrypt(&sealed.ciphertext, &sealed.nonce),
            Err(KeyError::Crypto(CryptoError::DecryptionFailed))
        ));
        session.lock();
        assert!(matches!(
            session.decrypt(&sealed.ciphertext, &sealed.nonce),
            Err(KeyError::SessionLocked)
        ));
    }

    #[test]
    fn activity_resets_idle_time() {
        let session = SecureSession::new();
        thread::sleep(Duration::from_millis(20));
        assert!(session.idle_duration() >= Duration::from_millis(20));
        let before = session.last_activity_at();
        session.record_activity();
        assert!(session.last_activity_at() >= before);
        assert!(session.idle_duration() < Duration::from_millis(20));
    }

    #[test]
    fn readers_never_see_partial_keys() {
        let session = Arc::new(SecureSession::new());
        let a = Secret::from_bytes([0xAA; 32]);
        let b = Secret::from_bytes([0xBB; 32]);
        let writer = {
            let session = session.clone();
            thread::spawn(move || {
                for i in 0..2000 {
                    match i % 3 {
                        0 => session.unlock(&a, None, None),
                        1 => session.unlock(&b, None, None),
                        _ => session.lock(),
                    }
                }
            })
        };
        for _ in 0..2000 {
            if let Some(key) = session.master_key() {
                let first = key.as_bytes()[0];
                assert!(first == 0xAA || first == 0xBB);
                assert!(key.as_bytes().iter().all(|&x| x == first));
            }
        }
        writer.join().unwrap();
    }
}
