//! Target inventory files.
//!
//! ```toml
//! tenant = "0199c1a4-6a1e-7cc0-8f43-5d0c2f7b9a10"
//!
//! [[targets]]
//! id = "0199c1a4-9b52-7d61-a7e4-1f9f4c1d2e01"
//! name = "web-1"
//! host = "10.0.4.11"
//! username = "scanner"
//! credential_ref = "/etc/fleetscan/keys/scanner"
//! tags = ["web", "prod"]
//! ```

use std::{collections::HashSet, fs, path::Path};

use anyhow::{Context, anyhow};
use fleetscan_model::{
    Target, TargetHealth, TargetId, TenantId, target::DEFAULT_SSH_PORT,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTarget {
    pub id: TargetId,
    /// Falls back to the file-level tenant.
    #[serde(default)]
    pub tenant: Option<TenantId>,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Tenant applied to targets that do not name one.
    #[serde(default)]
    pub tenant: Option<TenantId>,
    #[serde(default)]
    pub targets: Vec<InventoryTarget>,
}

impl Inventory {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read inventory from {}", path.display())
        })?;
        Self::parse(&contents)
            .map_err(|err| anyhow!("invalid inventory {}: {}", path.display(), err))
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Validated directory records, in file order.
    pub fn into_targets(self) -> Result<Vec<Target>, ConfigError> {
        let mut seen = HashSet::with_capacity(self.targets.len());
        let mut targets = Vec::with_capacity(self.targets.len());

        for entry in self.targets {
            if !seen.insert(entry.id) {
                return Err(ConfigError::DuplicateTarget { id: entry.id });
            }
            let tenant = entry.tenant.or(self.tenant).ok_or_else(|| {
                ConfigError::MissingTenant {
                    name: entry.name.clone(),
                }
            })?;
            if entry.host.trim().is_empty() {
                return Err(ConfigError::InvalidTarget {
                    name: entry.name,
                    reason: "host is empty".into(),
                });
            }
            if entry.username.trim().is_empty() {
                return Err(ConfigError::InvalidTarget {
                    name: entry.name,
                    reason: "username is empty".into(),
                });
            }
            if entry.port == 0 {
                return Err(ConfigError::InvalidTarget {
                    name: entry.name,
                    reason: "port must be non-zero".into(),
                });
            }

            targets.push(Target {
                id: entry.id,
                tenant,
                name: entry.name,
                host: entry.host,
                port: entry.port,
                username: entry.username,
                credential_ref: entry.credential_ref,
                tags: entry.tags,
                last_status: TargetHealth::Unknown,
                last_scanned_at: None,
            });
        }

        Ok(targets)
    }
}

/// Look a target up by id or, failing that, by exact name.
pub fn find_target<'a>(targets: &'a [Target], key: &str) -> Option<&'a Target> {
    if let Ok(id) = key.parse::<TargetId>() {
        return targets.iter().find(|target| target.id == id);
    }
    targets.iter().find(|target| target.name == key)
}
