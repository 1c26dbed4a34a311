//! The remote key-share service, as seen from this crate.
//!
//! The service is consumed, not implemented: [`KeyShareTransport`] names the calls the key
//! manager makes and the shapes it sends and receives. Framing, retries and timeouts belong to
//! whatever implements the trait. Every call carries the caller's bearer token.
//!
//! All wire types serialize to camelCase JSON with binary fields as base64 strings.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{device::Platform, encoding::base64_bytes, error::TransportError};

/// `Devices.register` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub device_id: String,
    pub device_name: String,
    pub platform: Platform,
}

/// The per-device secret issued at registration. Zeroed on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSecret {
    #[serde(with = "base64_bytes")]
    pub device_secret: Vec<u8>,
}

impl Drop for DeviceSecret {
    fn drop(&mut self) {
        self.device_secret.zeroize();
    }
}

impl fmt::Debug for DeviceSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSecret").field("device_secret", &"***").finish()
    }
}

/// `KeyShares.check` response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySharesStatus {
    pub has_shares: bool,
}

/// Everything the service holds for a user's share-based key setup.
///
/// Only `auth_share` is plaintext; the server can't use it without the other two shares.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyShareBundle {
    #[serde(with = "base64_bytes")]
    pub auth_share: Vec<u8>,
    /// Recovery share sealed under the recovery key.
    #[serde(with = "base64_bytes")]
    pub encrypted_recovery_share: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub recovery_share_nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
    /// X25519 private key sealed under the master key.
    #[serde(with = "base64_bytes")]
    pub encrypted_private_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub private_key_nonce: Vec<u8>,
    /// Master key sealed under the recovery key.
    #[serde(with = "base64_bytes")]
    pub master_key_recovery: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub master_key_recovery_nonce: Vec<u8>,
    /// Recovery key sealed under the master key.
    #[serde(with = "base64_bytes")]
    pub encrypted_recovery_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub recovery_key_nonce: Vec<u8>,
}

impl Drop for KeyShareBundle {
    fn drop(&mut self) {
        self.auth_share.zeroize();
    }
}

impl fmt::Debug for KeyShareBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShareBundle")
            .field("auth_share", &"***")
            .field("public_key", &self.public_key)
            .field("encrypted_recovery_share_len", &self.encrypted_recovery_share.len())
            .field("encrypted_private_key_len", &self.encrypted_private_key.len())
            .finish_non_exhaustive()
    }
}

/// The master key sealed under an Argon2id password KEK, with the parameters needed to
/// re-derive that KEK.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordEncryption {
    #[serde(with = "base64_bytes")]
    pub encrypted_master_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    pub ops_limit: u64,
    pub mem_limit: u64,
}

/// The master key sealed under a passkey-bound KEK.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyEncryption {
    pub credential_id: String,
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub encrypted_master_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
}

/// Client side of the remote key-share service.
#[async_trait]
pub trait KeyShareTransport: Send + Sync {
    /// Register this device (idempotent for the same device id) and return its secret.
    async fn register_device(
        &self,
        token: &str,
        request: &RegisterDeviceRequest,
    ) -> Result<DeviceSecret, TransportError>;

    /// Fetch the secret of an already registered device.
    async fn device_secret(&self, token: &str, device_id: &str) -> Result<DeviceSecret, TransportError>;

    async fn check_key_shares(&self, token: &str) -> Result<KeySharesStatus, TransportError>;

    /// Store the full bundle, replacing any existing one.
    async fn create_key_shares(&self, token: &str, bundle: &KeyShareBundle) -> Result<(), TransportError>;

    /// Fetch the bundle. Fails with [`TransportError::NotFound`] if the user has none.
    async fn key_shares(&self, token: &str) -> Result<KeyShareBundle, TransportError>;

    async fn has_password_encryption(&self, token: &str) -> Result<bool, TransportError>;

    async fn set_password_encryption(
        &self,
        token: &str,
        encryption: &PasswordEncryption,
    ) -> Result<(), TransportError>;

    /// `None` if password encryption was never set up or has been removed.
    async fn password_encryption(&self, token: &str) -> Result<Option<PasswordEncryption>, TransportError>;

    async fn remove_password_encryption(&self, token: &str) -> Result<(), TransportError>;

    async fn set_passkey_encryption(
        &self,
        token: &str,
        encryption: &PasskeyEncryption,
    ) -> Result<(), TransportError>;

    /// `None` if nothing is stored for `credential_id`.
    async fn passkey_encryption(
        &self,
        token: &str,
        credential_id: &str,
    ) -> Result<Option<PasskeyEncryption>, TransportError>;

    async fn remove_passkey_encryption(&self, token: &str, credential_id: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> KeyShareBundle {
        KeyShareBundle {
            auth_share: vec![1; 32],
            encrypted_recovery_share: vec![2; 48],
            recovery_share_nonce: vec![3; 24],
            public_key: vec![4; 32],
            encrypted_private_key: vec![5; 48],
            private_key_nonce: vec![6; 24],
            master_key_recovery: vec![7; 48],
            master_key_recovery_nonce: vec![8; 24],
            encrypted_recovery_key: vec![9; 48],
            recovery_key_nonce: vec![10; 24],
        }
    }

    #[test]
    fn bundle_field_names() {
        let json: serde_json::Value = serde_json::to_value(bundle()).unwrap();
        let obj = json.as_object().unwrap();
        for name in [
            "authShare",
            "encryptedRecoveryShare",
            "recoveryShareNonce",
            "publicKey",
            "encryptedPrivateKey",
            "privateKeyNonce",
            "masterKeyRecovery",
            "masterKeyRecoveryNonce",
            "encryptedRecoveryKey",
            "recoveryKeyNonce",
        ] {
            assert!(obj.get(name).map(|v| v.is_string()).unwrap_or(false), "missing {}", name);
        }
        assert_eq!(obj.len(), 10);
        let back: KeyShareBundle = serde_json::from_value(json).unwrap();
        assert_eq!(back, bundle());
    }

    #[test]
    fn bundle_debug_hides_auth_share() {
        let printed = format!("{:?}", bundle());
        assert!(printed.contains("***"));
        assert!(!printed.contains("[1, 1"));
    }

    #[test]
    fn password_encryption_shape() {
        let enc = PasswordEncryption {
            encrypted_master_key: vec![0; 4],
            nonce: vec![0; 3],
            salt: vec![0xff; 3],
            ops_limit: 2,
            mem_limit: 67_108_864,
        };
        let json = serde_json::to_string(&enc).unwrap();
        assert_eq!(
            json,
            r#"{"encryptedMasterKey":"AAAAAA==","nonce":"AAAA","salt":"////","opsLimit":2,"memLimit":67108864}"#
        );
    }

    #[test]
    fn register_request_shape() {
        let req = RegisterDeviceRequest {
            device_id: "abc".into(),
            device_name: "Phone".into(),
            platform: Platform::Android,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"deviceId":"abc","deviceName":"Phone","platform":"android"}"#);
        let secret: DeviceSecret = serde_json::from_str(r#"{"deviceSecret":"AQID"}"#).unwrap();
        assert_eq!(secret.device_secret, vec![1, 2, 3]);
        assert!(!format!("{:?}", secret).contains("1, 2"));
    }
}
