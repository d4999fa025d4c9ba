//! Runtime settings
//!
//! Layered from built-in defaults, `~/.skillpm/config.toml` and environment
//! variables. Environment wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkillError};
use crate::paths;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

pub const ENV_CACHE_DIR: &str = "SKILLPM_CACHE_DIR";
pub const ENV_REGISTRY: &str = "SKILLPM_REGISTRY";
pub const ENV_TOKEN: &str = "SKILLPM_TOKEN";
pub const ENV_DEBUG: &str = "SKILLPM_DEBUG";
pub const ENV_NO_COLOR: &str = "NO_COLOR";

const DEFAULT_LS_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Contents of `~/.skillpm/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl PersistedConfig {
    /// Load from a specific path; a missing file is an empty config
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(path).map_err(|e| SkillError::io(path, e))?;
        toml::from_str(&contents).map_err(|e| SkillError::manifest(path, e))
    }
}

/// Effective settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub registry_url: String,
    pub token: Option<String>,
    pub debug: bool,
    pub no_color: bool,
    pub ls_remote_timeout: Duration,
    pub fetch_timeout: Duration,
    pub http_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: paths::default_cache_dir(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            token: None,
            debug: false,
            no_color: false,
            ls_remote_timeout: DEFAULT_LS_REMOTE_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl Settings {
    /// Load from `~/.skillpm/config.toml` and the process environment
    pub fn load() -> Result<Self> {
        let persisted = PersistedConfig::load_from_path(&paths::config_file())?;
        Ok(Self::from_sources(persisted, |key| std::env::var(key).ok()))
    }

    /// Merge a persisted config with an environment lookup
    pub fn from_sources(persisted: PersistedConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(registry) = persisted.registry.filter(|r| !r.trim().is_empty()) {
            settings.registry_url = registry;
        }
        settings.token = persisted.token.filter(|t| !t.trim().is_empty());

        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty(ENV_CACHE_DIR) {
            settings.cache_dir = PathBuf::from(dir);
        }
        if let Some(registry) = non_empty(ENV_REGISTRY) {
            settings.registry_url = registry;
        }
        if let Some(token) = non_empty(ENV_TOKEN) {
            settings.token = Some(token);
        }
        settings.debug = non_empty(ENV_DEBUG).is_some_and(|v| is_truthy(&v));
        settings.no_color = env(ENV_NO_COLOR).is_some();

        settings.registry_url = settings.registry_url.trim_end_matches('/').to_string();
        settings
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}
