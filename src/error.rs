use std::io;

use thiserror::Error;

/// Possible cryptographic submodule error conditions.
///
/// `DecryptionFailed` is the only failure an open operation reports. A wrong key, a corrupted
/// ciphertext and a malformed nonce all look the same to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The OS entropy source failed. Not retryable.
    #[error("unable to collect enough randomness")]
    RandomGenerationFailed,
    /// A key of the wrong size was provided.
    #[error("key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    /// A share of the wrong size was provided.
    #[error("share must be 32 bytes, got {0}")]
    InvalidShareLength(usize),
    /// A password-hashing salt of the wrong size was provided.
    #[error("salt must be 16 bytes, got {0}")]
    InvalidSaltLength(usize),
    /// Two buffers that must match in length didn't.
    #[error("buffer lengths differ ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    /// The phrase had a bad word, bad checksum, or the wrong word count.
    #[error("mnemonic validation failed")]
    MnemonicValidationFailed,
    #[error("mnemonic generation failed")]
    MnemonicGenerationFailed,
    /// Argon2id refused to run with the given parameters.
    #[error("password key derivation failed: {0}")]
    PasswordDerivationFailed(String),
}

/// Local secure storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no item stored under {0:?}")]
    ItemNotFound(String),
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored data is malformed: {0}")]
    Encoding(String),
    #[error("secure storage backend failed: {0}")]
    Backend(String),
}

/// Failures reported by a [`KeyShareTransport`](crate::transport::KeyShareTransport).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request was not authorized")]
    Unauthorized,
    #[error("requested resource does not exist")]
    NotFound,
    #[error("server responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
}

/// Failures reported by a [`PasskeyProvider`](crate::passkey::PasskeyProvider).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasskeyError {
    #[error("passkey prompt was cancelled")]
    Cancelled,
    #[error("passkeys are not supported on this device")]
    NotSupported,
    #[error("passkey operation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config: {0}")]
    Io(#[from] io::Error),
    #[error("unable to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors surfaced by the key manager and the session.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Passkey(#[from] PasskeyError),
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("session is locked")]
    SessionLocked,
    /// The device share can't unlock on its own; use the recovery phrase, a password or a passkey.
    #[error("recovery is required to unlock this device")]
    RecoveryRequired,
    #[error("no device share is stored on this device")]
    DeviceShareNotFound,
    /// The account already has key shares; unlock instead, or reset explicitly.
    #[error("keys already exist for this account")]
    KeysAlreadyExist,
    #[error("unable to check key setup status: {0}")]
    SetupCheckFailed(#[source] TransportError),
    #[error("device registration failed: {0}")]
    DeviceRegistrationFailed(#[source] TransportError),
    #[error("unable to fetch key shares: {0}")]
    KeySharesFetchFailed(#[source] TransportError),
    #[error("unable to upload key shares: {0}")]
    KeySharesUploadFailed(#[source] TransportError),
    #[error("password encryption is not set up")]
    PasswordEncryptionNotSet,
    #[error("no passkey is registered on this device")]
    PasskeyNotRegistered,
    #[error("no passkey provider is available")]
    PasskeyUnavailable,
    #[error("server returned malformed key data: {0}")]
    InvalidServerData(&'static str),
}

impl KeyError {
    /// Network-layer failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeyError::SetupCheckFailed(_)
                | KeyError::DeviceRegistrationFailed(_)
                | KeyError::KeySharesFetchFailed(_)
                | KeyError::KeySharesUploadFailed(_)
        )
    }

    /// Failures caused by what the user typed: a wrong password or a wrong/invalid phrase.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            KeyError::IncorrectPassword
                | KeyError::Crypto(CryptoError::MnemonicValidationFailed)
                | KeyError::Crypto(CryptoError::DecryptionFailed)
        )
    }
}
