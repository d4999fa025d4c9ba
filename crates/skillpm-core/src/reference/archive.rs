//! Archive grammar: `http(s)://`, `oss://`, `s3://` URLs with optional `@version`

use url::Url;

use super::hosts::well_known_alias;
use super::{ParsedReference, SourceKind, VersionSpec};
use crate::error::{Result, SkillError};

const SCHEMES: &[&str] = &["http://", "https://", "oss://", "s3://"];
const GIT_WEB_MARKERS: &[&str] = &["/tree/", "/blob/", "/raw/"];
const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar", ".zip"];

/// Accepts only archive locations; git repository URLs fall through.
pub fn matches(raw: &str) -> bool {
    let (location, _) = split_trailing_version(raw.trim());
    if !SCHEMES.iter().any(|scheme| location.starts_with(scheme)) {
        return false;
    }
    if location.ends_with(".git") {
        return false;
    }
    if GIT_WEB_MARKERS.iter().any(|marker| location.contains(marker)) {
        return false;
    }
    let Ok(url) = Url::parse(location) else {
        return false;
    };
    // On git hosts only release assets are downloads; `owner/repo` is a repository
    if url.host_str().and_then(well_known_alias).is_some() {
        return url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .is_some_and(has_archive_extension);
    }
    true
}

fn has_archive_extension(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Split `location@version` where `@` follows the last `/`.
fn split_trailing_version(raw: &str) -> (&str, Option<&str>) {
    let last_slash = raw.rfind('/').unwrap_or(0);
    match raw.rfind('@') {
        Some(at) if at > last_slash => (&raw[..at], Some(&raw[at + 1..])),
        _ => (raw, None),
    }
}

pub(super) fn parse(raw: &str) -> Result<ParsedReference> {
    let trimmed = raw.trim();
    let (location, version_text) = split_trailing_version(trimmed);

    let url = Url::parse(location).map_err(|e| SkillError::syntax(raw, e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| SkillError::syntax(raw, "archive URL has no host"))?
        .to_string();

    let file_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| SkillError::syntax(raw, "archive URL has no file name"))?;
    let name = archive_stem(file_name);
    if name.is_empty() {
        return Err(SkillError::syntax(raw, "archive file name is empty"));
    }

    let version = match version_text {
        Some(text) => VersionSpec::parse(text).map_err(|e| SkillError::syntax(raw, e))?,
        None => VersionSpec::Unspecified,
    };
    if !matches!(version, VersionSpec::Exact(_) | VersionSpec::Unspecified) {
        return Err(SkillError::syntax(
            raw,
            "archive sources only accept an exact version label",
        ));
    }

    Ok(ParsedReference {
        source_kind: SourceKind::HttpArchive,
        registry_alias: Some(host.clone()),
        host: Some(host),
        owner: String::new(),
        repository: String::new(),
        scope: None,
        name,
        sub_path: None,
        version,
        skill: None,
        url: Some(download_url(&url)),
        raw: trimmed.to_string(),
    })
}

/// Object-store schemes map to their public HTTPS endpoints.
fn download_url(url: &Url) -> String {
    let bucket = url.host_str().unwrap_or_default();
    let key = url.path().trim_start_matches('/');
    match url.scheme() {
        "s3" => format!("https://{bucket}.s3.amazonaws.com/{key}"),
        "oss" => format!("https://{bucket}.oss.aliyuncs.com/{key}"),
        _ => url.to_string(),
    }
}

fn archive_stem(file_name: &str) -> String {
    let lower = file_name.to_ascii_lowercase();
    ARCHIVE_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| file_name[..file_name.len() - ext.len()].to_string())
        .unwrap_or_else(|| file_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_accepts_downloads() {
        assert!(matches("https://cdn.example.com/skills/pdf.tar.gz"));
        assert!(matches("https://cdn.example.com/skills/pdf.tar.gz@1.0.0"));
        assert!(matches("oss://bucket/skills/pdf.zip"));
        assert!(matches("s3://bucket/pdf.tgz@2.0.0"));
        assert!(matches(
            "https://github.com/acme/skills/releases/download/v1.0.0/pdf.tar.gz"
        ));
        assert!(matches(
            "https://gitlab.com/acme/skills/-/archive/v1.0.0/skills-v1.0.0.zip@v1.0.0"
        ));
        assert_eq!(
            crate::reference::SourceFamily::classify(
                "https://github.com/acme/skills/releases/download/v1.0.0/pdf.tar.gz"
            ),
            crate::reference::SourceFamily::Archive
        );
    }

    #[test]
    fn predicate_rejects_git_urls() {
        assert!(!matches("https://git.example.com/owner/repo.git"));
        assert!(!matches("https://git.example.com/owner/repo/tree/main/x"));
        assert!(!matches("https://git.example.com/owner/repo/blob/main/SKILL.md"));
        assert!(!matches("https://git.example.com/owner/repo/raw/main/a"));
        assert!(!matches("https://github.com/owner/repo"));
        assert!(!matches("https://github.com/owner/repo/skills/pdf"));
        assert!(!matches("owner/repo"));
    }

    #[test]
    fn parses_versioned_archive() {
        let parsed = parse("https://cdn.example.com/skills/pdf-tools.tar.gz@1.4.0").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::HttpArchive);
        assert_eq!(parsed.name, "pdf-tools");
        assert_eq!(parsed.registry_alias.as_deref(), Some("cdn.example.com"));
        assert_eq!(parsed.version, VersionSpec::Exact("1.4.0".into()));
        assert_eq!(
            parsed.url.as_deref(),
            Some("https://cdn.example.com/skills/pdf-tools.tar.gz")
        );
    }

    #[test]
    fn maps_object_store_schemes() {
        let parsed = parse("s3://my-bucket/skills/pdf.zip").expect("parse");
        assert_eq!(
            parsed.url.as_deref(),
            Some("https://my-bucket.s3.amazonaws.com/skills/pdf.zip")
        );
        assert_eq!(parsed.name, "pdf");

        let parsed = parse("oss://my-bucket/pdf.tgz").expect("parse");
        assert_eq!(
            parsed.url.as_deref(),
            Some("https://my-bucket.oss.aliyuncs.com/pdf.tgz")
        );
    }
}
