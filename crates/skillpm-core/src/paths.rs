//! Centralized path utilities
//!
//! All well-known file and directory names in one place for consistency

use std::path::{Path, PathBuf};

/// Per-user state directory name (`~/.skillpm`)
pub const CONFIG_DIR_NAME: &str = ".skillpm";
/// Project manifest file name
pub const MANIFEST_FILE: &str = "skills.toml";
/// Project lock file name
pub const LOCK_FILE: &str = "skills.lock";
/// Marker written into every cache entry
pub const CACHE_MARKER_FILE: &str = ".skillpm-source.json";
/// Entry document every skill is expected to carry
pub const SKILL_FILE: &str = "SKILL.md";
/// Canonical storage relative to the project root or home directory
pub const CANONICAL_SKILLS_DIR: &str = ".agents/skills";

/// Get the home directory, falling back to the current directory
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Get the skillpm config directory (~/.skillpm)
pub fn config_dir() -> PathBuf {
    home_dir().join(CONFIG_DIR_NAME)
}

/// Get the persisted settings file (~/.skillpm/config.toml)
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the default cache root (~/.skillpm/cache)
pub fn default_cache_dir() -> PathBuf {
    config_dir().join("cache")
}

/// Canonical skills directory under `base` (project root or home)
pub fn canonical_skills_dir(base: &Path) -> PathBuf {
    base.join(CANONICAL_SKILLS_DIR)
}
