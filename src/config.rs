//! Key manager configuration.
//!
//! Loaded from TOML; every field is optional.
//!
//! ```toml
//! device_name = "Work laptop"
//! platform = "linux"
//! password_level = "moderate"
//!
//! # Overrides password_level when present.
//! [password_cost]
//! ops_limit = 3
//! mem_limit = 268435456
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{device::Platform, error::ConfigError};

/// Smallest memory cost Argon2id accepts with a single lane, in bytes.
pub const MIN_MEM_LIMIT: u64 = 8 * 1024;

/// Argon2id cost parameters. `mem_limit` is in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordCost {
    pub ops_limit: u64,
    pub mem_limit: u64,
}

/// Named Argon2id cost presets, matching libsodium's `OPSLIMIT_*` / `MEMLIMIT_*` pairs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordLevel {
    #[default]
    Interactive,
    Moderate,
    Sensitive,
}

impl PasswordLevel {
    pub fn cost(&self) -> PasswordCost {
        match self {
            PasswordLevel::Interactive => PasswordCost {
                ops_limit: 2,
                mem_limit: 64 * 1024 * 1024,
            },
            PasswordLevel::Moderate => PasswordCost {
                ops_limit: 3,
                mem_limit: 256 * 1024 * 1024,
            },
            PasswordLevel::Sensitive => PasswordCost {
                ops_limit: 4,
                mem_limit: 1024 * 1024 * 1024,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyManagerConfig {
    /// Human-readable name sent when registering this device.
    pub device_name: String,
    pub platform: Platform,
    pub password_level: PasswordLevel,
    pub password_cost: Option<PasswordCost>,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            platform: Platform::current(),
            password_level: PasswordLevel::default(),
            password_cost: None,
        }
    }
}

fn default_device_name() -> String {
    format!("{} device", Platform::current())
}

impl KeyManagerConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Loaded key manager config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "device_name",
                reason: "must not be empty".into(),
            });
        }
        if let Some(cost) = self.password_cost {
            if cost.ops_limit == 0 || cost.ops_limit > u64::from(u32::MAX) {
                return Err(ConfigError::Invalid {
                    field: "password_cost.ops_limit",
                    reason: format!("{} is out of range", cost.ops_limit),
                });
            }
            if cost.mem_limit < MIN_MEM_LIMIT {
                return Err(ConfigError::Invalid {
                    field: "password_cost.mem_limit",
                    reason: format!("must be at least {} bytes", MIN_MEM_LIMIT),
                });
            }
        }
        Ok(())
    }

    /// Cost parameters for newly created password encryption.
    pub fn password_cost(&self) -> PasswordCost {
        self.password_cost.unwrap_or_else(|| self.password_level.cost())
    }
}
