//! Server configuration
//!
//! Loaded from a TOML file. Everything except the repository path has a
//! sensible default, so a minimal config is just:
//!
//! ```toml
//! [repository]
//! path = "/srv/repo.git"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:3690`
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Realm string presented during authentication
    #[serde(default = "default_realm")]
    pub realm: String,

    /// Repository root URL announced to clients; copy-from URLs are
    /// resolved against it
    #[serde(default = "default_url")]
    pub url: String,

    /// Bounded wait for commit-time path guards
    #[serde(default = "default_lock_wait")]
    pub lock_wait_secs: u64,

    /// Retry a commit once when a non-overlapping commit wins the
    /// publish race
    #[serde(default = "default_true")]
    pub retry_on_conflict: bool,

    pub repository: RepositoryConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Path to the bare Git repository
    pub path: PathBuf,

    /// Branch the revision numbering follows
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Optional SQLite revision index; the mapping is rebuilt from Git
    /// when this is absent or stale
    #[serde(default)]
    pub index: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Allow anonymous sessions when no password file is configured
    #[serde(default = "default_true")]
    pub anonymous: bool,

    /// Htpasswd-style password file enabling PLAIN authentication
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous: true,
            password_file: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Full ref the revision mapping follows
    pub fn ref_name(&self) -> String {
        format!("refs/heads/{}", self.repository.branch)
    }
}

fn default_listen() -> String {
    "0.0.0.0:3690".to_string()
}

fn default_realm() -> String {
    "svngit".to_string()
}

fn default_url() -> String {
    "svn://localhost/repo".to_string()
}

fn default_lock_wait() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    "master".to_string()
}
