use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use fleetscan_core::{
    OrchestratorConfig, channel::SshChannelConfig, payload::PayloadConfig,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const CONFIG_PATH_VAR: &str = "FLEETSCAN_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "FLEETSCAN_CONFIG_JSON";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

const DEFAULT_FILES: &[&str] = &[
    "fleetscan.toml",
    "config/fleetscan.toml",
    "fleetscan.json",
];

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL. Without one, results only live as long as the process.
    pub url: Option<String>,
}

/// Top-level fleetscan settings. Every section is optional in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetscanConfig {
    /// Batch limits and per-operation deadlines.
    pub orchestrator: OrchestratorConfig,
    /// OpenSSH client settings for the remote channel.
    pub ssh: SshChannelConfig,
    /// The scan program pushed to and executed on every target.
    pub payload: PayloadConfig,
    pub database: DatabaseConfig,
    /// TOML file listing the targets this installation may scan.
    pub inventory_path: Option<PathBuf>,
}

impl FleetscanConfig {
    /// Load configuration using the process environment and working
    /// directory. `.env` files are honoured.
    ///
    /// Evaluation order:
    /// 1) `$FLEETSCAN_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$FLEETSCAN_CONFIG_JSON` (inline JSON),
    /// 3) the first of `fleetscan.toml`, `config/fleetscan.toml`,
    ///    `fleetscan.json` that exists,
    /// 4) defaults.
    ///
    /// `$DATABASE_URL` then overrides `database.url`.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(target: "scan::config", path = %path.display(), "loaded .env");
        }
        let cwd = env::current_dir().context("failed to read working directory")?;
        Self::load_with(|key| env::var(key).ok(), &cwd)
    }

    /// [`FleetscanConfig::load_from_env`] with an explicit variable lookup
    /// and base directory for the default files.
    pub fn load_with(
        lookup: impl Fn(&str) -> Option<String>,
        base_dir: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (mut config, source) = if let Some(path) = non_empty(CONFIG_PATH_VAR) {
            let path = PathBuf::from(path);
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = non_empty(CONFIG_JSON_VAR) {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            (parsed, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base_dir) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        if let Some(url) = non_empty(DATABASE_URL_VAR) {
            config.database.url = Some(url);
        }
        Ok((config, source))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read fleetscan config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid fleetscan config {}", path.display())),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid fleetscan config {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Accept either TOML or JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse fleetscan config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid fleetscan config json: {err}"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.orchestrator.validate()?;

        if self.payload.remote_path.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                field: "payload.remote_path",
            });
        }
        if self.payload.interpreter.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                field: "payload.interpreter",
            });
        }
        if let Some(script) = &self.payload.local_script
            && !script.is_file()
        {
            return Err(ConfigError::MissingPayload(script.clone()));
        }
        if self.ssh.ssh_program.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                field: "ssh.ssh_program",
            });
        }
        if let Some(url) = &self.database.url
            && !(url.starts_with("postgres://") || url.starts_with("postgresql://"))
        {
            return Err(ConfigError::UnsupportedDatabaseUrl);
        }
        Ok(())
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.is_file())
    }
}
