//! Error types for skill resolution and installation

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the reference → resolve → cache → install pipeline.
#[derive(Debug, Error)]
pub enum SkillError {
    /// The reference string matched none of the supported grammars
    #[error("invalid skill reference '{reference}': {reason}")]
    ReferenceSyntax { reference: String, reason: String },

    /// The requested sub-path does not exist in the fetched tree
    #[error("path '{sub_path}' not found in '{reference}'")]
    SubpathNotFound { reference: String, sub_path: String },

    /// No tag, branch or registry version satisfies the request
    #[error("no version of '{reference}' matches '{requested}'")]
    VersionNotFound { reference: String, requested: String },

    /// Remote unreachable, clone/download failed, handshake failed
    #[error("failed to reach '{reference}': {cause}")]
    Network { reference: String, cause: String },

    /// Destination exists and is not managed by us
    #[error(
        "'{skill}' already exists at {} and is not managed by skillpm; use --force to overwrite",
        .path.display()
    )]
    Conflict { skill: String, path: PathBuf },

    /// Downloaded bytes do not match the declared digest
    #[error("integrity check failed for '{reference}': expected {expected}, got {actual}")]
    Integrity {
        reference: String,
        expected: String,
        actual: String,
    },

    /// A `#name` selector matched no skill directory
    #[error("no skill named '{name}' in '{reference}'")]
    SkillNotFound { reference: String, name: String },

    /// Lock file has no entry for the skill
    #[error("skill '{0}' is not installed")]
    NotInstalled(String),

    /// Malformed manifest, lock file, config or registry document
    #[error("failed to parse {}: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SkillError {
    pub fn syntax(reference: &str, reason: impl Into<String>) -> Self {
        Self::ReferenceSyntax {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub fn network(reference: &str, cause: impl ToString) -> Self {
        Self::Network {
            reference: reference.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Manifest {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller can fix this by retrying with `--force`.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, SkillError>;

/// Attach a path to `std::io::Result` values.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| SkillError::io(path, source))
    }
}
