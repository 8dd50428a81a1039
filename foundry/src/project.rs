use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_PORT: i32 = 80;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Building,
    Deploying,
    Running,
    Stopped,
    Error,
}

impl Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl AsRef<str> for ProjectStatus {
    fn as_ref(&self) -> &str {
        match self {
            ProjectStatus::Building => "building",
            ProjectStatus::Deploying => "deploying",
            ProjectStatus::Running => "running",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Error => "error",
        }
    }
}

impl ProjectStatus {
    /// Whether the build pipeline may move a project from `self` to `next`.
    /// `running`/`stopped` toggles belong to lifecycle actions, not the pipeline.
    pub fn pipeline_allows(self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, next),
            (_, Building) | (Building, Deploying) | (Building, Error) | (Deploying, Running) | (Deploying, Error)
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_port")]
    pub port: i32,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub deploy_url: String,
    pub owner_id: String,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.into()
}

fn default_port() -> i32 {
    DEFAULT_PORT
}

/// Branch to build, `main` when unset.
pub fn effective_branch(branch: &str) -> &str {
    if branch.is_empty() { DEFAULT_BRANCH } else { branch }
}

/// Container port, 80 when unset.
pub fn effective_port(port: i32) -> i32 {
    if port <= 0 { DEFAULT_PORT } else { port }
}

/// One stored configuration item. `value` is ciphertext unless empty.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

/// Encryption of configuration values at rest. Implemented outside this crate.
pub trait ValueCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, String>;
}

/// Prepares a value for storage. Empty values are stored as-is.
pub fn seal_value(cipher: &dyn ValueCipher, plaintext: &str) -> Result<String, String> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }
    cipher.encrypt(plaintext)
}

/// Turns stored entries into the plaintext map handed to the deployer.
///
/// Entries with an empty key are dropped. A value that fails to decrypt is kept
/// verbatim: rows written before encryption was introduced hold plaintext.
pub fn resolve_config(entries: &[ConfigEntry], cipher: &dyn ValueCipher) -> BTreeMap<String, String> {
    let mut resolved = BTreeMap::new();
    for entry in entries.iter().filter(|e| !e.key.is_empty()) {
        let value = if entry.value.is_empty() {
            String::new()
        } else {
            match cipher.decrypt(&entry.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "failed to decrypt config value, using stored value");
                    entry.value.clone()
                }
            }
        };
        resolved.insert(entry.key.clone(), value);
    }
    resolved
}
