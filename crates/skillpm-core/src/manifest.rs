//! `skills.toml`: the skills a project asks for
//!
//! ```toml
//! [skills]
//! pdf = "github:anthropics/skills/skills/pdf@v1.0.0"
//!
//! [defaults]
//! agents = ["claude-code", "cursor"]
//! mode = "symlink"
//!
//! [registries]
//! corp = "https://git.corp.example"
//! "@acme" = "https://npm.acme.example"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, Result, SkillError};
use crate::files::write_atomic;
use crate::installer::{AgentType, InstallMode};
use crate::reference::HostAliases;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallDefaults {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<InstallMode>,
}

impl InstallDefaults {
    fn is_empty(&self) -> bool {
        self.agents.is_empty() && self.mode.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Install name → reference string
    #[serde(default)]
    pub skills: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "InstallDefaults::is_empty")]
    pub defaults: InstallDefaults,
    /// Git host alias → base URL, or `@scope` → registry URL
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registries: BTreeMap<String, String>,
}

impl Manifest {
    /// Host alias table: well-known hosts plus non-scope `registries` entries.
    pub fn host_aliases(&self) -> HostAliases {
        HostAliases::with_custom(self.registries.iter().filter(|(key, _)| !key.starts_with('@')))
    }

    /// `@scope` → registry URL entries
    pub fn scoped_registries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.registries
            .iter()
            .filter(|(key, _)| key.starts_with('@'))
            .map(|(key, url)| (key.as_str(), url.as_str()))
    }
}

/// A manifest bound to its path
#[derive(Debug, Clone)]
pub struct ManifestFile {
    path: PathBuf,
    manifest: Manifest,
}

impl ManifestFile {
    /// Load `path`; a missing file is an empty manifest.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let manifest = if path.exists() {
            let contents = std::fs::read_to_string(&path).at(&path)?;
            toml::from_str(&contents).map_err(|e| SkillError::manifest(&path, e))?
        } else {
            Manifest::default()
        };
        Ok(Self { path, manifest })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn add_skill(&mut self, name: &str, reference: &str) -> Result<()> {
        if self.manifest.skills.get(name).map(String::as_str) == Some(reference) {
            return Ok(());
        }
        self.manifest
            .skills
            .insert(name.to_string(), reference.to_string());
        self.save()
    }

    pub fn remove_skill(&mut self, name: &str) -> Result<bool> {
        if self.manifest.skills.remove(name).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn set_defaults(&mut self, defaults: InstallDefaults) -> Result<()> {
        if self.manifest.defaults == defaults {
            return Ok(());
        }
        self.manifest.defaults = defaults;
        self.save()
    }

    fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(&self.manifest)
            .map_err(|e| SkillError::manifest(&self.path, e))?;
        write_atomic(&self.path, content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let manifest: Manifest = toml::from_str(
            r#"
[skills]
pdf = "github:o/r/skills/pdf@v1.0.0"

[defaults]
agents = ["claude-code", "cursor"]
mode = "copy"

[registries]
corp = "https://git.corp.example/"
"@acme" = "https://npm.acme.example"
"#,
        )
        .expect("parse");

        assert_eq!(manifest.skills["pdf"], "github:o/r/skills/pdf@v1.0.0");
        assert_eq!(
            manifest.defaults.agents,
            vec![AgentType::ClaudeCode, AgentType::Cursor]
        );
        assert_eq!(manifest.defaults.mode, Some(InstallMode::Copy));
        assert_eq!(
            manifest.host_aliases().base_url("corp"),
            Some("https://git.corp.example")
        );
        assert!(manifest.host_aliases().base_url("@acme").is_none());
        assert_eq!(
            manifest.scoped_registries().collect::<Vec<_>>(),
            vec![("@acme", "https://npm.acme.example")]
        );
    }

    #[test]
    fn add_and_remove_persist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("skills.toml");
        let mut file = ManifestFile::load(&path).expect("load");
        file.add_skill("pdf", "pdf@^1.0.0").expect("add");
        file.set_defaults(InstallDefaults {
            agents: vec![AgentType::Codex],
            mode: None,
        })
        .expect("defaults");

        let reloaded = ManifestFile::load(&path).expect("reload");
        assert_eq!(reloaded.manifest().skills["pdf"], "pdf@^1.0.0");
        assert_eq!(reloaded.manifest().defaults.agents, vec![AgentType::Codex]);

        let mut reloaded = reloaded;
        assert!(reloaded.remove_skill("pdf").expect("remove"));
        assert!(!reloaded.remove_skill("pdf").expect("remove again"));
    }
}
