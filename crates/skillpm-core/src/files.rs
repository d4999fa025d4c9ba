//! Filesystem helpers shared by the cache and the installer

use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{IoContext, Result, SkillError};
use crate::paths::CACHE_MARKER_FILE;

/// Names dropped from the top level of an installed skill
pub const EXCLUDED_ROOT_FILES: &[&str] = &["README.md", "metadata.json", CACHE_MARKER_FILE];

/// Entries starting with this are private scaffolding and never installed
pub const PRIVATE_PREFIX: char = '_';

const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Which entries a tree copy leaves behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFilter {
    /// Fetched tree → cache: version-control metadata only
    VersionControl,
    /// Cache → install destination: VCS metadata, the fixed root exclude
    /// list and anything with the private prefix
    Install,
}

impl CopyFilter {
    fn skips(self, name: &str, depth: usize) -> bool {
        if VCS_DIRS.contains(&name) {
            return true;
        }
        match self {
            Self::VersionControl => false,
            Self::Install => {
                name.starts_with(PRIVATE_PREFIX)
                    || (depth == 1 && EXCLUDED_ROOT_FILES.contains(&name))
            }
        }
    }
}

/// Recursively copy `src` into `dest`, returning the number of files copied.
pub fn copy_tree(src: &Path, dest: &Path, filter: CopyFilter) -> Result<usize> {
    std::fs::create_dir_all(dest).at(dest)?;
    let mut copied = 0;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !filter.skips(&entry.file_name().to_string_lossy(), entry.depth())
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            SkillError::io(path, std::io::Error::other(e.to_string()))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| SkillError::io(entry.path(), std::io::ErrorKind::InvalidInput.into()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).at(&target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target).at(&target)?;
            copied += 1;
        } else {
            debug!("Skipping non-regular entry {}", entry.path().display());
        }
    }

    Ok(copied)
}

/// Remove a file, directory or symlink (without following it).
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SkillError::io(path, e)),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path).at(path)
    } else {
        // Directory symlinks on Windows are removed like directories
        #[cfg(windows)]
        {
            if meta.file_type().is_symlink() && std::fs::remove_dir(path).is_ok() {
                return Ok(());
            }
        }
        std::fs::remove_file(path).at(path)
    }
}

/// Whether anything (including a dangling symlink) exists at `path`.
pub fn entry_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Replace `path` with `contents` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).at(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).at(parent)?;
    tmp.write_all(contents).at(tmp.path())?;
    tmp.as_file().sync_all().at(tmp.path())?;
    tmp.persist(path).map_err(|e| SkillError::io(path, e.error))?;
    Ok(())
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path of `target` relative to the directory `from`. `None` when the two
/// share no root (different drives).
pub fn relative_path(from: &Path, target: &Path) -> Option<PathBuf> {
    let from = normalize(from);
    let target = normalize(target);
    let from_parts: Vec<Component<'_>> = from.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();

    let common = from_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return None;
    }

    let mut out = PathBuf::new();
    for _ in common..from_parts.len() {
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part.as_os_str());
    }
    Some(out)
}
