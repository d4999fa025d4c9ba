//! `skills.lock`: the exact version and commit of every installed skill

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IoContext, Result, SkillError};
use crate::files::write_atomic;

const LOCK_VERSION: u32 = 1;

fn default_lock_version() -> u32 {
    LOCK_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// The reference string exactly as the user wrote it
    #[serde(rename = "ref")]
    pub reference: String,
    pub resolved_version: String,
    /// Git commit, or content digest for archives and registry packages
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(default = "default_lock_version")]
    pub version: u32,
    #[serde(default)]
    pub skills: BTreeMap<String, LockEntry>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            version: LOCK_VERSION,
            skills: BTreeMap::new(),
        }
    }
}

/// A lock file bound to its path. Every mutation is persisted atomically.
#[derive(Debug, Clone)]
pub struct LockStore {
    path: PathBuf,
    lock: LockFile,
}

impl LockStore {
    /// Load `path`; a missing file is an empty lock.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock = if path.exists() {
            let contents = std::fs::read_to_string(&path).at(&path)?;
            toml::from_str(&contents).map_err(|e| SkillError::manifest(&path, e))?
        } else {
            LockFile::default()
        };
        Ok(Self { path, lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&LockEntry> {
        self.lock.skills.get(name)
    }

    pub fn entries(&self) -> &BTreeMap<String, LockEntry> {
        &self.lock.skills
    }

    pub fn is_empty(&self) -> bool {
        self.lock.skills.is_empty()
    }

    /// Insert or replace the entry for `name`.
    pub fn record(&mut self, name: &str, entry: LockEntry) -> Result<()> {
        debug!(
            "Locking {} at {} ({})",
            name, entry.resolved_version, entry.commit_hash
        );
        self.lock.skills.insert(name.to_string(), entry);
        self.save()
    }

    /// Drop the entry for `name`, returning it if it existed.
    pub fn remove(&mut self, name: &str) -> Result<Option<LockEntry>> {
        let removed = self.lock.skills.remove(name);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<()> {
        let content =
            toml::to_string_pretty(&self.lock).map_err(|e| SkillError::manifest(&self.path, e))?;
        write_atomic(&self.path, content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reference: &str, version: &str) -> LockEntry {
        LockEntry {
            reference: reference.to_string(),
            resolved_version: version.to_string(),
            commit_hash: "c".repeat(40),
            integrity: None,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LockStore::load(dir.path().join("skills.lock")).expect("load");
        assert!(store.is_empty());
        assert!(!dir.path().join("skills.lock").exists());
    }

    #[test]
    fn record_persists_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("skills.lock");
        let mut store = LockStore::load(&path).expect("load");
        store
            .record("pdf", entry("github:o/r/skills/pdf@v1.0.0", "v1.0.0"))
            .expect("record");

        let reloaded = LockStore::load(&path).expect("reload");
        assert_eq!(
            reloaded.get("pdf"),
            Some(&entry("github:o/r/skills/pdf@v1.0.0", "v1.0.0"))
        );

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("[skills.pdf]"));
        assert!(text.contains(r#"ref = "github:o/r/skills/pdf@v1.0.0""#));
    }

    #[test]
    fn remove_reports_what_was_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LockStore::load(dir.path().join("skills.lock")).expect("load");
        store.record("pdf", entry("pdf", "1.0.0")).expect("record");

        assert!(store.remove("pdf").expect("remove").is_some());
        assert!(store.remove("pdf").expect("remove").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_lock_is_a_manifest_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("skills.lock");
        std::fs::write(&path, "skills = 3").expect("write");
        let err = LockStore::load(&path).expect_err("should fail");
        assert!(matches!(err, SkillError::Manifest { .. }));
    }
}
