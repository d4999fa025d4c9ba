//! Registry grammar: `@scope/name[@version]` and bare `name[@version]`

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ParsedReference, SourceKind, VersionSpec};
use crate::error::{Result, SkillError};

static SCOPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@([A-Za-z0-9][A-Za-z0-9._-]*)/([A-Za-z0-9][A-Za-z0-9._-]*)(?:@([^/]+))?$")
        .expect("valid scoped registry regex")
});

static PUBLIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)(?:@([^/]+))?$").expect("valid public registry regex")
});

/// Accepts only registry syntax. Anything containing `/` outside a scope,
/// a URL, or an `alias:` prefix is rejected so it can fall through to git.
pub fn matches(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.contains("://") {
        return false;
    }
    if SCOPED.is_match(raw) {
        return true;
    }
    let name = raw.split('@').next().unwrap_or_default();
    if name.contains('/') || name.contains(':') {
        return false;
    }
    PUBLIC.is_match(raw)
}

pub(super) fn parse(raw: &str) -> Result<ParsedReference> {
    let trimmed = raw.trim();

    let (kind, scope, name, version_text) = if let Some(caps) = SCOPED.captures(trimmed) {
        (
            SourceKind::RegistryScoped,
            Some(caps[1].to_string()),
            caps[2].to_string(),
            caps.get(3).map(|m| m.as_str()),
        )
    } else if let Some(caps) = PUBLIC.captures(trimmed) {
        (
            SourceKind::RegistryPublic,
            None,
            caps[1].to_string(),
            caps.get(2).map(|m| m.as_str()),
        )
    } else {
        return Err(SkillError::syntax(raw, "not a registry package name"));
    };

    let version = match version_text {
        Some(text) => VersionSpec::parse(text).map_err(|e| SkillError::syntax(raw, e))?,
        None => VersionSpec::Unspecified,
    };
    if matches!(version, VersionSpec::Branch(_) | VersionSpec::Commit(_)) {
        return Err(SkillError::syntax(
            raw,
            "branch and commit versions are only valid for git sources",
        ));
    }

    Ok(ParsedReference {
        source_kind: kind,
        registry_alias: None,
        host: None,
        owner: String::new(),
        repository: String::new(),
        scope,
        name,
        sub_path: None,
        version,
        skill: None,
        url: None,
        raw: trimmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_accepts_registry_forms() {
        assert!(matches("pdf-tools"));
        assert!(matches("pdf-tools@1.2.0"));
        assert!(matches("pdf-tools@beta"));
        assert!(matches("@acme/pdf"));
        assert!(matches("@acme/pdf@^1.0.0"));
    }

    #[test]
    fn predicate_rejects_git_and_urls() {
        assert!(!matches("my-org/my-skill"));
        assert!(!matches("github:owner/repo"));
        assert!(!matches("git@github.com:owner/repo.git"));
        assert!(!matches("https://example.com/skill.tar.gz"));
        assert!(!matches("owner/repo@v1.0.0"));
    }

    #[test]
    fn parses_scoped_package() {
        let parsed = parse("@acme/pdf@~1.2.0").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::RegistryScoped);
        assert_eq!(parsed.scope.as_deref(), Some("acme"));
        assert_eq!(parsed.name, "pdf");
        assert_eq!(parsed.version, VersionSpec::Range("~1.2.0".into()));
        assert!(parsed.owner.is_empty());
    }

    #[test]
    fn parses_public_package() {
        let parsed = parse("pdf").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::RegistryPublic);
        assert!(parsed.scope.is_none());
        assert_eq!(parsed.version, VersionSpec::Unspecified);
    }

    #[test]
    fn rejects_git_only_versions() {
        assert!(parse("pdf@branch:main").is_err());
    }
}
