//! Platform passkey / biometric collaborator.
//!
//! The platform (secure enclave, biometric prompt, WebAuthn PRF extension) produces a 32-byte
//! key-encrypting-key bound to a credential. This crate only ever sees that KEK, and only for
//! as long as it takes to seal or open the master key.

use async_trait::async_trait;

use crate::{error::PasskeyError, secret::SymmetricKey};

/// Result of registering a new passkey credential.
#[derive(Clone, Debug)]
pub struct PasskeyRegistration {
    pub credential_id: String,
    pub kek: SymmetricKey,
}

#[async_trait]
pub trait PasskeyProvider: Send + Sync {
    /// Create a credential and return its id with the KEK bound to it. Prompts the user.
    async fn register(&self, name: &str) -> Result<PasskeyRegistration, PasskeyError>;

    /// Produce the KEK for an existing credential. Prompts the user.
    async fn authenticate(&self, credential_id: &str) -> Result<SymmetricKey, PasskeyError>;
}
