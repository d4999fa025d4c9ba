//! Content cache of fetched skill trees
//!
//! Layout: `<root>/<alias>/<owner>/<repository>/[<sub/path>/]<version>/`.
//! The sub-path is part of the key, so two skills from one repository at
//! one version never share a directory.
//!
//! Entries are built in a staging directory under `<root>/.tmp` and moved
//! into place with a single rename, so readers only ever observe complete
//! entries. Concurrent writers of the same key race on that rename; the
//! last one wins and both produce identical content.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{IoContext, Result, SkillError};
use crate::files::{self, CopyFilter};
use crate::integrity::sha256_hex;
use crate::paths::CACHE_MARKER_FILE;
use crate::reference::{ParsedReference, SourceFamily, DEFAULT_GIT_ALIAS};

const STAGING_DIR: &str = ".tmp";

/// Joins nested owner groups (`group/subgroup`) into one path component
const OWNER_GROUP_SEPARATOR: &str = "+";

/// Placeholder owner for unscoped registry packages
const UNSCOPED_OWNER: &str = "_";

/// Cache coordinates of one fetched skill
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub registry_alias: String,
    pub owner: String,
    pub repository: String,
    pub sub_path: Option<String>,
    pub version: String,
}

impl CacheKey {
    /// Key for `reference` at `version` (tag, commit or registry version).
    /// `registry_url` is only consulted for registry references.
    pub fn for_reference(reference: &ParsedReference, version: &str, registry_url: &str) -> Self {
        match reference.family() {
            SourceFamily::Git => Self {
                registry_alias: reference
                    .registry_alias
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GIT_ALIAS.to_string()),
                owner: reference.owner.clone(),
                repository: reference.repository.clone(),
                sub_path: reference.sub_path.clone(),
                version: version.to_string(),
            },
            SourceFamily::Registry => Self {
                registry_alias: url::Url::parse(registry_url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_else(|| "registry".to_string()),
                owner: reference
                    .scope
                    .as_ref()
                    .map(|scope| format!("@{scope}"))
                    .unwrap_or_else(|| UNSCOPED_OWNER.to_string()),
                repository: reference.name.clone(),
                sub_path: None,
                version: version.to_string(),
            },
            SourceFamily::Archive => {
                let url = reference.url.as_deref().unwrap_or(&reference.raw);
                let mut url_digest = sha256_hex(url.as_bytes());
                url_digest.truncate(12);
                Self {
                    registry_alias: reference
                        .registry_alias
                        .clone()
                        .unwrap_or_else(|| "archive".to_string()),
                    owner: url_digest,
                    repository: reference.name.clone(),
                    sub_path: None,
                    version: version.to_string(),
                }
            }
        }
    }

    /// Directory of this entry relative to the cache root
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(sanitize(&self.registry_alias));
        // Nested groups stay one component so owner and sub-path never blur
        let owner: Vec<String> = self.owner.split('/').map(sanitize).collect();
        path.push(owner.join(OWNER_GROUP_SEPARATOR));
        path.push(sanitize(&self.repository));
        if let Some(sub) = &self.sub_path {
            for segment in sub.split('/').filter(|s| !s.is_empty()) {
                path.push(sanitize(segment));
            }
        }
        path.push(sanitize(&self.version));
        path
    }
}

/// Keep path components portable and inside the cache root.
fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '\\' | '|' | '?' | '*' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Written into every entry as `.skillpm-source.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheMarker {
    commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    integrity: Option<String>,
    fetched_at: DateTime<Utc>,
}

/// What a fetch callback reports about the tree it produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fetched {
    /// Commit hash, or content digest for downloads
    pub commit: String,
    pub source_url: Option<String>,
    pub integrity: Option<String>,
    /// Root of the fetched tree if it is not the directory handed to the callback
    pub root: Option<PathBuf>,
}

/// A complete entry in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub commit: String,
    pub source_url: Option<String>,
    pub integrity: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Summary row for `cache list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSkill {
    /// Path relative to the cache root, `/`-separated
    pub key: String,
    pub entry: CacheEntry,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// The entry for `key`, if one has been fully published.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        read_entry(&self.path_for(key))
    }

    /// Return the cached entry for `key`, fetching it on a miss.
    ///
    /// `fetch` receives an empty staging directory to populate. When the key
    /// has a sub-path, only that sub-tree is published; a missing sub-path
    /// fails with [`SkillError::SubpathNotFound`] and leaves nothing behind.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        reference: &str,
        fetch: F,
    ) -> Result<CacheEntry>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<Fetched>>,
    {
        if let Some(entry) = self.lookup(key) {
            debug!("Cache hit for {} at {}", reference, entry.path.display());
            return Ok(entry);
        }
        self.refresh(key, reference, fetch).await
    }

    /// Fetch and publish `key` unconditionally, replacing any existing entry.
    pub async fn refresh<F, Fut>(
        &self,
        key: &CacheKey,
        reference: &str,
        fetch: F,
    ) -> Result<CacheEntry>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<Fetched>>,
    {
        let staging_root = self.root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging_root).at(&staging_root)?;
        // Dropped on every exit path, removing partial fetches
        let staging = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&staging_root)
            .at(&staging_root)?;

        let checkout = staging.path().join("checkout");
        debug!("Fetching {} into {}", reference, checkout.display());
        let fetched = fetch(checkout.clone()).await?;

        let fetched_root = fetched.root.clone().unwrap_or(checkout);
        let source = match &key.sub_path {
            Some(sub) => {
                let candidate = fetched_root.join(sub);
                if !candidate.is_dir() {
                    return Err(SkillError::SubpathNotFound {
                        reference: reference.to_string(),
                        sub_path: sub.clone(),
                    });
                }
                candidate
            }
            None => fetched_root,
        };

        let staged = staging.path().join("entry");
        files::copy_tree(&source, &staged, CopyFilter::VersionControl)?;

        let marker = CacheMarker {
            commit: fetched.commit,
            source_url: fetched.source_url,
            integrity: fetched.integrity,
            fetched_at: Utc::now(),
        };
        let marker_json = serde_json::to_vec_pretty(&marker)
            .map_err(|e| SkillError::manifest(staged.join(CACHE_MARKER_FILE), e))?;
        std::fs::write(staged.join(CACHE_MARKER_FILE), marker_json).at(&staged)?;

        let target = self.path_for(key);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }
        if files::entry_exists(&target) {
            files::remove_path(&target)?;
        }
        std::fs::rename(&staged, &target).at(&target)?;
        info!("Cached {} at {}", reference, target.display());

        read_entry(&target).ok_or_else(|| {
            SkillError::io(
                &target,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "cache entry vanished after publish",
                ),
            )
        })
    }

    /// Drop one entry. Returns whether anything was removed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        let path = self.path_for(key);
        if !files::entry_exists(&path) {
            return Ok(false);
        }
        files::remove_path(&path)?;
        Ok(true)
    }

    /// Every published entry, sorted by key.
    pub fn list(&self) -> Result<Vec<CachedSkill>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        let mut walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(item) = walker.next() {
            let item = item
                .map_err(|e| SkillError::io(&self.root, std::io::Error::other(e.to_string())))?;
            if !item.file_type().is_dir() {
                continue;
            }
            if item.depth() == 1 && item.file_name() == STAGING_DIR {
                walker.skip_current_dir();
                continue;
            }
            if let Some(entry) = read_entry(item.path()) {
                let key = item
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(item.path())
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                entries.push(CachedSkill { key, entry });
                walker.skip_current_dir();
            }
        }
        Ok(entries)
    }

    /// Remove everything. Returns how many entries were dropped.
    pub fn clear(&self) -> Result<usize> {
        let count = self.list()?.len();
        if self.root.exists() {
            for child in std::fs::read_dir(&self.root).at(&self.root)? {
                let child = child.at(&self.root)?;
                files::remove_path(&child.path())?;
            }
        }
        info!("Cleared {} cache entries from {}", count, self.root.display());
        Ok(count)
    }
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let raw = std::fs::read(path.join(CACHE_MARKER_FILE)).ok()?;
    let marker: CacheMarker = match serde_json::from_slice(&raw) {
        Ok(marker) => marker,
        Err(e) => {
            debug!("Ignoring unreadable cache marker in {}: {}", path.display(), e);
            return None;
        }
    };
    Some(CacheEntry {
        path: path.to_path_buf(),
        commit: marker.commit,
        source_url: marker.source_url,
        integrity: marker.integrity,
        fetched_at: marker.fetched_at,
    })
}
