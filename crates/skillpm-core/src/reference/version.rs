//! Version specifier grammar (the part after `@`)

use std::fmt;

use serde::{Deserialize, Serialize};

/// What the user asked for, before any remote resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum VersionSpec {
    /// A literal tag (git) or version / dist-tag (registry)
    Exact(String),
    /// Highest semantic version available
    Latest,
    /// `^x.y.z` or `~x.y.z`
    Range(String),
    /// `branch:<name>`
    Branch(String),
    /// `commit:<hash>`
    Commit(String),
    /// Nothing given; follows the default branch (git) or `latest` (registry)
    Unspecified,
}

impl VersionSpec {
    /// Parse the text after `@`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty version after '@'".to_string());
        }
        if text == "latest" {
            return Ok(Self::Latest);
        }
        if text.starts_with('^') || text.starts_with('~') {
            semver::VersionReq::parse(text)
                .map_err(|e| format!("invalid version range '{text}': {e}"))?;
            return Ok(Self::Range(text.to_string()));
        }
        if let Some(branch) = text.strip_prefix("branch:") {
            if branch.trim().is_empty() {
                return Err("empty branch name".to_string());
            }
            return Ok(Self::Branch(branch.trim().to_string()));
        }
        if let Some(hash) = text.strip_prefix("commit:") {
            let hash = hash.trim();
            let is_hex = hash.chars().all(|c| c.is_ascii_hexdigit());
            if !is_hex || !(4..=40).contains(&hash.len()) {
                return Err(format!("invalid commit hash '{hash}'"));
            }
            return Ok(Self::Commit(hash.to_ascii_lowercase()));
        }
        Ok(Self::Exact(text.to_string()))
    }

    /// `Latest`, `Range` and `Unspecified` can only be answered by asking the remote.
    pub fn requires_remote_query(&self) -> bool {
        matches!(self, Self::Latest | Self::Range(_) | Self::Unspecified)
    }

    /// Text to re-serialize after `@`, or `None` for `Unspecified`.
    pub fn suffix(&self) -> Option<String> {
        match self {
            Self::Exact(tag) => Some(tag.clone()),
            Self::Latest => Some("latest".to_string()),
            Self::Range(range) => Some(range.clone()),
            Self::Branch(name) => Some(format!("branch:{name}")),
            Self::Commit(hash) => Some(format!("commit:{hash}")),
            Self::Unspecified => None,
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.suffix() {
            Some(suffix) => f.write_str(&suffix),
            None => f.write_str("(default)"),
        }
    }
}
