use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::ModelError,
    ids::{TargetId, TenantId},
};

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Last-known reachability recorded on the target after each scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TargetHealth {
    #[default]
    Unknown,
    Online,
    Offline,
    Error,
}

impl TargetHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetHealth::Unknown => "unknown",
            TargetHealth::Online => "online",
            TargetHealth::Offline => "offline",
            TargetHealth::Error => "error",
        }
    }
}

impl fmt::Display for TargetHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetHealth {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(TargetHealth::Unknown),
            "online" => Ok(TargetHealth::Online),
            "offline" => Ok(TargetHealth::Offline),
            "error" => Ok(TargetHealth::Error),
            other => Err(ModelError::UnknownTargetHealth(other.to_string())),
        }
    }
}

/// Inventory record owned by the target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Target {
    pub id: TargetId,
    pub tenant: TenantId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential_ref: Option<String>,
    pub tags: Vec<String>,
    pub last_status: TargetHealth,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

impl Target {
    pub fn resolved(&self) -> ResolvedTarget {
        ResolvedTarget {
            id: self.id,
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            credential_ref: self.credential_ref.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Connection parameters handed to the channel for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResolvedTarget {
    pub id: TargetId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential_ref: Option<String>,
    pub tags: Vec<String>,
}

impl ResolvedTarget {
    /// `user@host` destination as understood by OpenSSH.
    pub fn destination(&self) -> String {
        if self.username.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.username, self.host)
        }
    }
}
