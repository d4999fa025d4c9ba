//! `SKILL.md` metadata and skill discovery inside a fetched tree
//!
//! A skill is a directory with a `SKILL.md` whose YAML frontmatter names it:
//!
//! ```yaml
//! ---
//! name: pdf-tools
//! description: Fill and extract PDF forms
//! version: 1.2.0
//! ---
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::paths::SKILL_FILE;

/// How deep a `#name` selector search descends into a repository
const SEARCH_DEPTH: usize = 4;

/// Frontmatter fields we read; everything else is ignored
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SkillMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl SkillMetadata {
    /// Parse the leading `---` block of a `SKILL.md`.
    pub fn parse(content: &str) -> Option<Self> {
        let content = content.trim_start_matches('\u{feff}');
        let rest = content
            .strip_prefix("---\r\n")
            .or_else(|| content.strip_prefix("---\n"))?;
        let end = rest
            .find("\n---")
            .map(|i| i + 1)
            .or_else(|| rest.starts_with("---").then_some(0))?;
        let yaml = &rest[..end];
        if yaml.trim().is_empty() {
            return Some(Self::default());
        }
        match serde_yaml::from_str::<SkillMetadata>(yaml) {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!("Ignoring malformed SKILL.md frontmatter: {}", e);
                None
            }
        }
    }

    /// Read `dir/SKILL.md`, if present and well-formed.
    pub fn read(dir: &Path) -> Option<Self> {
        let content = fs::read_to_string(dir.join(SKILL_FILE)).ok()?;
        Self::parse(&content)
    }
}

pub fn has_skill_file(dir: &Path) -> bool {
    dir.join(SKILL_FILE).is_file()
}

fn is_named(dir: &Path, name: &str) -> bool {
    if !has_skill_file(dir) {
        return false;
    }
    let dir_matches = dir.file_name().is_some_and(|n| n == name);
    dir_matches
        || SkillMetadata::read(dir)
            .and_then(|meta| meta.name)
            .is_some_and(|declared| declared == name)
}

/// Find the skill directory called `name` under `root`.
///
/// Looks at `root` itself, then `root/<name>`, `root/skills/<name>`, then a
/// bounded walk matching either the directory name or the declared name.
pub fn locate_skill(root: &Path, name: &str) -> Option<PathBuf> {
    let direct = [
        root.to_path_buf(),
        root.join(name),
        root.join("skills").join(name),
    ];
    if let Some(found) = direct.into_iter().find(|dir| is_named(dir, name)) {
        return Some(found);
    }

    let mut matches: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(SEARCH_DEPTH)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let file_name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || !(file_name.starts_with('.') || file_name == "node_modules")
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .filter(|dir| is_named(dir, name))
        .collect();

    // Shallowest match wins; ties broken by path for determinism
    matches.sort_by(|a, b| {
        a.components()
            .count()
            .cmp(&b.components().count())
            .then_with(|| a.cmp(b))
    });
    matches.into_iter().next()
}
