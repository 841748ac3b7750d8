//! The scan program executed on each target.
//!
//! The payload is a locally vetted, versioned script. When `local_script` is
//! set it is pushed to `remote_path` before every run; otherwise the script is
//! expected to be provisioned on the hosts already.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// Version string recorded on each run that used this payload.
    pub version: String,
    /// Local copy of the script to push before executing.
    pub local_script: Option<PathBuf>,
    /// Where the script lives on the target.
    pub remote_path: String,
    /// Interpreter used to run the script.
    pub interpreter: String,
    pub full_args: Vec<String>,
    pub quick_args: Vec<String>,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            local_script: None,
            remote_path: "/usr/local/lib/fleetscan/scan.sh".to_string(),
            interpreter: "sh".to_string(),
            full_args: Vec::new(),
            quick_args: vec!["--quick".to_string()],
        }
    }
}

impl PayloadConfig {
    /// Shell command that runs the selected variant on the target.
    pub fn command(&self, quick: bool) -> String {
        let args = if quick {
            &self.quick_args
        } else {
            &self.full_args
        };

        let mut parts = Vec::with_capacity(args.len() + 2);
        parts.push(self.interpreter.clone());
        parts.push(shell_quote(&self.remote_path));
        parts.extend(args.iter().map(|arg| shell_quote(arg)));
        parts.join(" ")
    }
}

/// Single-quotes `value` unless it only contains characters the shell leaves
/// alone.
fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_' | '=' | ':' | ',')
        });
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
