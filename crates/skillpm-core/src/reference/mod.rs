//! Reference parsing
//!
//! Turns a user-supplied reference string into a [`ParsedReference`].
//! Registry, archive and git syntaxes overlap textually, so each family
//! owns an exclusion predicate and the families are tried in a fixed
//! order: registry, then archive, then git.
//!
//! ```text
//! pdf-tools@^1.2.0                                 registry (public)
//! @acme/pdf@latest                                 registry (scoped)
//! https://cdn.example.com/pdf.tar.gz@1.0.0         archive
//! github:owner/repo/skills/pdf@v1.0.0              git shorthand + sub-path
//! https://github.com/owner/repo/tree/main/skills/x git web URL
//! git@github.com:owner/repo.git#pdf                git SSH + skill selector
//! ```

mod archive;
mod git;
pub mod hosts;
mod registry;
mod version;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkillError};

pub use hosts::{HostAliases, DEFAULT_GIT_ALIAS};
pub use version::VersionSpec;

/// Concrete syntax a reference was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    GitShorthand,
    GitUrlHttps,
    GitUrlSsh,
    GitWebUrl,
    HttpArchive,
    RegistryScoped,
    RegistryPublic,
}

impl SourceKind {
    pub fn family(self) -> SourceFamily {
        match self {
            Self::RegistryScoped | Self::RegistryPublic => SourceFamily::Registry,
            Self::HttpArchive => SourceFamily::Archive,
            Self::GitShorthand | Self::GitUrlHttps | Self::GitUrlSsh | Self::GitWebUrl => {
                SourceFamily::Git
            }
        }
    }
}

/// Which resolver/fetcher pipeline handles a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFamily {
    Registry,
    Archive,
    Git,
}

type Predicate = fn(&str) -> bool;

/// Exclusion predicates in dispatch order. Git accepts whatever is left.
const DISPATCH: [(SourceFamily, Predicate); 2] = [
    (SourceFamily::Registry, registry::matches),
    (SourceFamily::Archive, archive::matches),
];

impl SourceFamily {
    /// Classify a raw reference without fully parsing it.
    pub fn classify(raw: &str) -> Self {
        DISPATCH
            .iter()
            .find(|(_, accepts)| accepts(raw))
            .map(|(family, _)| *family)
            .unwrap_or(SourceFamily::Git)
    }
}

/// Normalized descriptor of a reference string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub source_kind: SourceKind,
    /// Git host alias or host name; archive host; `None` for registries
    pub registry_alias: Option<String>,
    /// Host taken from a full URL
    pub host: Option<String>,
    /// Git owner (nested groups joined with `/`); empty otherwise
    pub owner: String,
    /// Git repository; empty otherwise
    pub repository: String,
    /// Registry scope without the `@`
    pub scope: Option<String>,
    /// Registry package name, archive stem, or git repository
    pub name: String,
    pub sub_path: Option<String>,
    pub version: VersionSpec,
    /// `#name` selector picking one skill out of a multi-skill source
    pub skill: Option<String>,
    /// Clone URL (git URL forms) or download URL (archives)
    pub url: Option<String>,
    pub raw: String,
}

impl ParsedReference {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(SkillError::syntax(raw, "empty reference"));
        }
        match SourceFamily::classify(raw) {
            SourceFamily::Registry => registry::parse(raw),
            SourceFamily::Archive => archive::parse(raw),
            SourceFamily::Git => git::parse(raw),
        }
    }

    pub fn family(&self) -> SourceFamily {
        self.source_kind.family()
    }

    /// Short, unscoped name the skill is installed under.
    pub fn skill_name(&self) -> String {
        if let Some(skill) = &self.skill {
            return skill.clone();
        }
        if let Some(last) = self
            .sub_path
            .as_deref()
            .and_then(|p| p.rsplit('/').next())
            .filter(|s| !s.is_empty())
        {
            return last.to_string();
        }
        self.name.clone()
    }

    /// Human-readable source without version, e.g. `github:owner/repo/skills/x`
    pub fn display_source(&self) -> String {
        match self.family() {
            SourceFamily::Registry => match &self.scope {
                Some(scope) => format!("@{}/{}", scope, self.name),
                None => self.name.clone(),
            },
            SourceFamily::Archive => self.url.clone().unwrap_or_else(|| self.raw.clone()),
            SourceFamily::Git => {
                let alias = self.registry_alias.as_deref().unwrap_or(DEFAULT_GIT_ALIAS);
                let mut out = format!("{}:{}/{}", alias, self.owner, self.repository);
                if let Some(sub) = &self.sub_path {
                    out.push('/');
                    out.push_str(sub);
                }
                out
            }
        }
    }

    /// Whether both references name the same skill of the same source,
    /// whatever versions they ask for.
    pub fn same_source(&self, other: &ParsedReference) -> bool {
        self.family() == other.family()
            && self.display_source() == other.display_source()
            && self.skill == other.skill
    }
}

impl FromStr for ParsedReference {
    type Err = SkillError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ParsedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_order_is_registry_archive_git() {
        assert_eq!(SourceFamily::classify("pdf"), SourceFamily::Registry);
        assert_eq!(SourceFamily::classify("@acme/pdf@1.0.0"), SourceFamily::Registry);
        assert_eq!(
            SourceFamily::classify("https://cdn.example.com/pdf.zip"),
            SourceFamily::Archive
        );
        assert_eq!(SourceFamily::classify("my-org/my-skill"), SourceFamily::Git);
        assert_eq!(
            SourceFamily::classify("https://cdn.example.com/owner/repo.git"),
            SourceFamily::Git
        );
    }

    #[test]
    fn same_source_ignores_versions_only() {
        let parse = |raw: &str| ParsedReference::parse(raw).expect("parse");
        let locked = parse("github:alice/tools/skills/pdf@v1.0.0");
        assert!(locked.same_source(&parse("alice/tools/skills/pdf@v2.0.0")));
        assert!(locked.same_source(&parse("github:alice/tools/skills/pdf")));
        assert!(!locked.same_source(&parse("github:bob/tools/skills/pdf@v1.0.0")));
        assert!(!locked.same_source(&parse("gitlab:alice/tools/skills/pdf@v1.0.0")));
        assert!(!parse("pdf@1.0.0").same_source(&parse("@acme/pdf@1.0.0")));
        assert!(!parse("o/r#pdf").same_source(&parse("o/r#docx")));
    }

    #[test]
    fn owner_repo_is_always_git() {
        let parsed = ParsedReference::parse("my-org/my-skill").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::GitShorthand);
        assert_eq!(parsed.owner, "my-org");
        assert_eq!(parsed.repository, "my-skill");
    }

    #[test]
    fn skill_name_prefers_selector_then_sub_path() {
        let parsed = ParsedReference::parse("github:o/r/skills/pdf").expect("parse");
        assert_eq!(parsed.skill_name(), "pdf");

        let parsed = ParsedReference::parse("github:o/r/skills/pdf#other").expect("parse");
        assert_eq!(parsed.skill_name(), "other");

        let parsed = ParsedReference::parse("github:o/r").expect("parse");
        assert_eq!(parsed.skill_name(), "r");

        let parsed = ParsedReference::parse("@acme/pdf").expect("parse");
        assert_eq!(parsed.skill_name(), "pdf");
    }

    #[test]
    fn raw_is_preserved_for_display() {
        let parsed: ParsedReference = "github:o/r@v1.0.0#pdf".parse().expect("parse");
        assert_eq!(parsed.to_string(), "github:o/r@v1.0.0#pdf");
        assert_eq!(parsed.display_source(), "github:o/r");
    }

    #[test]
    fn empty_input_is_a_syntax_error() {
        let err = ParsedReference::parse("  ").expect_err("should fail");
        assert!(matches!(err, SkillError::ReferenceSyntax { .. }));
    }
}
