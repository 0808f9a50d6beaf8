//! User configuration at `~/.featcat/config.yaml`.
//!
//! A missing file yields [`Config::default`]. Selected values can be
//! overridden from the environment; the access token is only ever read from
//! the environment and never persisted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::CATALOG_DIR;
use crate::error::{io_err, StoreError};
use crate::paths;
use crate::types::BackendMode;

pub const ENV_GITLAB_URL: &str = "FEATCAT_GITLAB_URL";
pub const ENV_GITLAB_PROJECT: &str = "FEATCAT_GITLAB_PROJECT";
pub const DEFAULT_TOKEN_ENV: &str = "FEATCAT_GITLAB_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendMode,
    pub gitlab: GitLabConfig,
    pub catalog: CatalogConfig,
    pub retry: RetryConfig,
    pub request_timeout_secs: u64,
    /// Deadline for one whole command, retries included. `0` disables it.
    pub operation_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendMode::Git,
            gitlab: GitLabConfig::default(),
            catalog: CatalogConfig::default(),
            retry: RetryConfig::default(),
            request_timeout_secs: 30,
            operation_timeout_secs: 600,
        }
    }
}

/// Where the catalog repository lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitLabConfig {
    pub base_url: String,
    /// Numeric project id or `group/name` path.
    pub project: String,
    pub default_branch: String,
    /// Name of the environment variable holding the access token.
    pub token_env: String,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gitlab.com".to_string(),
            project: String::new(),
            default_branch: "main".to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
        }
    }
}

/// How proposals are shaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub dir: String,
    /// First segment of generated branch names.
    pub branch_area: String,
    pub labels: Vec<String>,
    pub remove_source_branch: bool,
    /// Username to assign proposals to; lookup failures are ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Directory of `.tera` files overriding the built-in proposal templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dir: CATALOG_DIR.to_string(),
            branch_area: "catalog".to_string(),
            labels: Vec::new(),
            remove_source_branch: true,
            assignee: None,
            templates_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl Config {
    /// Apply `FEATCAT_GITLAB_URL` / `FEATCAT_GITLAB_PROJECT` overrides read
    /// through `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_GITLAB_URL).filter(|v| !v.is_empty()) {
            self.gitlab.base_url = url;
        }
        if let Some(project) = lookup(ENV_GITLAB_PROJECT).filter(|v| !v.is_empty()) {
            self.gitlab.project = project;
        }
    }

    /// The access token from the configured environment variable.
    pub fn token_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        lookup(&self.gitlab.token_env).filter(|t| !t.is_empty())
    }

    pub fn token(&self) -> Option<String> {
        self.token_with(|k| std::env::var(k).ok())
    }
}

/// Load the config file under `home`, without environment overrides.
pub fn load_at(home: &Path) -> Result<Config, StoreError> {
    let path = paths::config_path(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// Load from `~/.featcat/config.yaml` and apply environment overrides.
pub fn load() -> Result<Config, StoreError> {
    let mut config = load_at(&paths::home()?)?;
    config.apply_env_with(|k| std::env::var(k).ok());
    Ok(config)
}

/// Atomically save the config file under `home`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), StoreError> {
    let yaml = serde_yaml::to_string(config)?;
    paths::atomic_write(&paths::config_path(home), yaml.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        let cfg = load_at(home.path()).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.catalog.dir, "features");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().unwrap();
        let path = paths::config_path(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "gitlab:\n  project: acme/catalog\ncatalog:\n  labels: [catalog]\n",
        )
        .unwrap();
        let cfg = load_at(home.path()).unwrap();
        assert_eq!(cfg.gitlab.project, "acme/catalog");
        assert_eq!(cfg.gitlab.default_branch, "main");
        assert_eq!(cfg.catalog.labels, vec!["catalog".to_string()]);
        assert!(cfg.catalog.remove_source_branch);
        assert_eq!(cfg.operation_timeout_secs, 600);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.catalog.assignee = Some("reviewer".to_string());
        save_at(home.path(), &cfg).unwrap();
        assert_eq!(load_at(home.path()).unwrap(), cfg);
    }

    #[test]
    fn env_overrides_and_token() {
        let env: HashMap<&str, &str> = [
            (ENV_GITLAB_URL, "https://git.example.com"),
            (ENV_GITLAB_PROJECT, "42"),
            (DEFAULT_TOKEN_ENV, "glpat-secret"),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        let mut cfg = Config::default();
        cfg.apply_env_with(lookup);
        assert_eq!(cfg.gitlab.base_url, "https://git.example.com");
        assert_eq!(cfg.gitlab.project, "42");
        assert_eq!(cfg.token_with(lookup).as_deref(), Some("glpat-secret"));
    }

    #[test]
    fn empty_token_is_absent() {
        let cfg = Config::default();
        assert!(cfg.token_with(|_| Some(String::new())).is_none());
    }
}
