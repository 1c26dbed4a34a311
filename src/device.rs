//! Device identity.
//!
//! The device id is created once and persisted by [`KeyShareStore`](crate::storage::KeyShareStore).
//! The fingerprint is a best-effort description of the hardware and OS. It is not guaranteed to
//! stay stable across OS upgrades.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Platforms that register devices with the key-share service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Macos,
    Linux,
    Windows,
    Other,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Platform {
        match std::env::consts::OS {
            "ios" => Platform::Ios,
            "android" => Platform::Android,
            "macos" => Platform::Macos,
            "linux" => Platform::Linux,
            "windows" => Platform::Windows,
            _ => Platform::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Macos => "macos",
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Other => "other",
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::current()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the key manager knows about the device it runs on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_name: String,
    pub platform: Platform,
    pub fingerprint: String,
}

impl DeviceIdentity {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        platform: Platform,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            platform,
            fingerprint: fingerprint.into(),
        }
    }

    /// Identity of the running device, with the fingerprint taken from [`local_fingerprint`].
    pub fn local(device_id: impl Into<String>, device_name: impl Into<String>, platform: Platform) -> Self {
        Self::new(device_id, device_name, platform, local_fingerprint())
    }
}

/// `"{os}-{arch}"` of the running binary.
pub fn local_fingerprint() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_names() {
        assert_eq!(Platform::Android.to_string(), "android");
        assert_eq!(serde_json::to_string(&Platform::Ios).unwrap(), "\"ios\"");
        let parsed: Platform = serde_json::from_str("\"macos\"").unwrap();
        assert_eq!(parsed, Platform::Macos);
    }

    #[test]
    fn local_identity() {
        let id = DeviceIdentity::local("abc", "Laptop", Platform::current());
        assert_eq!(id.device_id, "abc");
        assert_eq!(id.fingerprint, local_fingerprint());
        assert!(id.fingerprint.contains(std::env::consts::ARCH));
        assert_eq!(id.platform.as_str(), Platform::current().as_str());
    }
}
