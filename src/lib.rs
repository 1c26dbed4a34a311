/*!
End-to-end encryption key management. A user's 32-byte master key is created once, split into
three shares, sealed under several independent factors, and held in memory only while the user
has unlocked it.

The pieces, leaf-first:

- [`primitives`]: stateless encryption, hashing, key derivation and password hashing.
- [`split`]: three-way XOR splitting of the master key.
- [`derive`]: the keys protecting each share (device, recovery phrase, password).
- [`storage`]: local secure storage and the key manager's local state.
- [`transport`] and [`passkey`]: the remote key-share service and the platform passkey prompt,
  both supplied by the caller.
- [`session`]: the unlocked key material, shared by everything that encrypts user content.
- [`manager`]: setup, unlock, lock, reset, and the recovery phrase.

# Cryptographic Algorithms Used

- Symmetric encryption: XSalsa20-Poly1305 secretbox, libsodium byte layout
- Hashing: BLAKE2b with a 32-byte digest
- Key derivation: BLAKE2b-based `crypto_kdf` construction with 8-byte contexts
- Password hashing: Argon2id v1.3
- Key agreement keys: X25519
- Recovery phrases: 24-word BIP39 (English)

Other clients of the same key-share service decrypt what this crate encrypts, so none of these
can change without a coordinated migration.

# Usage

```ignore
let session = Arc::new(SecureSession::new());
let manager = E2eeKeyManager::new(config, transport, storage, session.clone());

if manager.check_setup_status(&token).await? {
    manager.unlock_with_password(&password, &token).await?;
} else {
    let phrase = manager.setup_new_user(&token).await?;
    show_recovery_phrase(&phrase);
}
let sealed = session.encrypt(&mut OsRng, b"note body")?;
```
*/

pub mod config;
pub mod derive;
pub mod device;
pub mod encoding;
mod error;
pub mod manager;
pub mod passkey;
pub mod primitives;
mod secret;
pub mod session;
pub mod split;
pub mod storage;
pub mod transport;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use self::{
    config::{KeyManagerConfig, PasswordCost, PasswordLevel},
    device::{DeviceIdentity, Platform},
    error::{ConfigError, CryptoError, KeyError, PasskeyError, StorageError, TransportError},
    manager::{E2eeKeyManager, KeyState},
    passkey::{PasskeyProvider, PasskeyRegistration},
    secret::{MasterKey, Secret, SymmetricKey},
    session::SecureSession,
    storage::{FileStorage, KeyShareStore, MemoryStorage, SecureStorage},
    transport::KeyShareTransport,
};

#[cfg(feature = "os-keyring")]
pub use self::storage::KeyringStorage;

use rand_core::{CryptoRng, RngCore};

/// Holds a cryptographic random number generator (RNG). This trait is needed so that a RNG can be
/// passed around as a trait object.
pub trait CryptoSrc: CryptoRng + RngCore {}
impl<T: CryptoRng + RngCore> CryptoSrc for T {}
