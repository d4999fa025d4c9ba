//! Git grammar: `alias:owner/repo`, `owner/repo`, HTTPS/SSH clone URLs and
//! web URLs (`/tree/<branch>/<path>`), each with optional sub-path,
//! `@version` and `#skill`.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::hosts::{well_known_alias, DEFAULT_GIT_ALIAS};
use super::{ParsedReference, SourceKind, VersionSpec};
use crate::error::{Result, SkillError};
use crate::paths::SKILL_FILE;

static SCP_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:").expect("valid scp-like regex")
});

static ALIAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9._-]*$").expect("valid alias regex"));

static SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid path segment regex"));

const WEB_KEYWORDS: &[&str] = &["tree", "blob", "raw"];

/// Repository location before sub-path and version decoding.
struct Location {
    kind: SourceKind,
    alias: String,
    host: Option<String>,
    owner: String,
    repository: String,
    clone_url: Option<String>,
    rest: Vec<String>,
}

pub(super) fn parse(raw: &str) -> Result<ParsedReference> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SkillError::syntax(raw, "empty reference"));
    }

    let (body, skill) = split_fragment(trimmed);
    let (location_text, version_text) = split_version(body);
    let explicit = version_text
        .map(VersionSpec::parse)
        .transpose()
        .map_err(|e| SkillError::syntax(raw, e))?;

    let location = if let Some((scheme, _)) = location_text.split_once("://") {
        match scheme {
            "http" | "https" => parse_http(raw, location_text)?,
            "ssh" | "git+ssh" => parse_ssh_url(raw, location_text)?,
            other => {
                return Err(SkillError::syntax(
                    raw,
                    format!("unsupported URL scheme '{other}'"),
                ))
            }
        }
    } else if SCP_LIKE.is_match(location_text) {
        parse_scp(raw, location_text)?
    } else {
        parse_shorthand(raw, location_text)?
    };

    let strip_dash = location.kind != SourceKind::GitShorthand;
    let (web_branch, sub_segments) = decode_rest(&location.rest, strip_dash);
    let sub_path = join_sub_path(raw, &sub_segments)?;

    let kind = if web_branch.is_some() && location.kind == SourceKind::GitUrlHttps {
        SourceKind::GitWebUrl
    } else {
        location.kind
    };

    // An explicit `@version` always wins over a branch named in the path.
    let version = match (explicit, web_branch) {
        (Some(explicit), _) => explicit,
        (None, Some(branch)) => VersionSpec::Branch(branch),
        (None, None) => VersionSpec::Unspecified,
    };

    let skill = skill
        .map(|name| {
            if SEGMENT.is_match(name) {
                Ok(name.to_string())
            } else {
                Err(SkillError::syntax(raw, format!("invalid skill name '{name}'")))
            }
        })
        .transpose()?;

    Ok(ParsedReference {
        source_kind: kind,
        registry_alias: Some(location.alias),
        host: location.host,
        name: location.repository.clone(),
        owner: location.owner,
        repository: location.repository,
        scope: None,
        sub_path,
        version,
        skill,
        url: location.clone_url,
        raw: trimmed.to_string(),
    })
}

fn split_fragment(text: &str) -> (&str, Option<&str>) {
    match text.rsplit_once('#') {
        Some((body, fragment)) if !fragment.is_empty() => (body, Some(fragment)),
        Some((body, _)) => (body, None),
        None => (text, None),
    }
}

/// Split `location@version`, ignoring the `user@` of SSH and URL userinfo.
fn split_version(body: &str) -> (&str, Option<&str>) {
    let start = userinfo_end(body);
    match body[start..].find('@') {
        Some(offset) => {
            let at = start + offset;
            (&body[..at], Some(&body[at + 1..]))
        }
        None => (body, None),
    }
}

fn userinfo_end(body: &str) -> usize {
    if let Some(scheme_end) = body.find("://") {
        let authority_start = scheme_end + 3;
        let authority_end = body[authority_start..]
            .find('/')
            .map(|i| authority_start + i)
            .unwrap_or(body.len());
        return authority_end;
    }
    if SCP_LIKE.is_match(body) {
        return body.find(':').map(|i| i + 1).unwrap_or(0);
    }
    0
}

fn parse_http(raw: &str, text: &str) -> Result<Location> {
    let url = Url::parse(text).map_err(|e| SkillError::syntax(raw, e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| SkillError::syntax(raw, "URL has no host"))?
        .to_string();
    let segments: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let alias = well_known_alias(&host).unwrap_or(host.as_str()).to_string();
    let origin = match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    };

    // Clone URL: everything up to `<repo>.git`
    if let Some(last) = segments.last().filter(|s| s.ends_with(".git")) {
        let (owner, repository) =
            owner_and_repo(raw, &segments[..segments.len() - 1], last)?;
        return Ok(Location {
            kind: SourceKind::GitUrlHttps,
            alias,
            host: Some(host),
            owner,
            repository,
            clone_url: Some(text.to_string()),
            rest: Vec::new(),
        });
    }

    // GitLab nests groups and marks the end of the repository with `/-/`
    let repo_end = match segments
        .iter()
        .take_while(|s| !WEB_KEYWORDS.contains(&s.as_str()))
        .position(|s| s == "-")
    {
        Some(dash) if dash >= 2 => dash,
        _ => 2,
    };
    if segments.len() < repo_end {
        return Err(SkillError::syntax(raw, "URL must include owner and repository"));
    }
    let (owner, repository) =
        owner_and_repo(raw, &segments[..repo_end - 1], &segments[repo_end - 1])?;
    let clone_url = format!("{origin}/{owner}/{repository}.git");

    Ok(Location {
        kind: SourceKind::GitUrlHttps,
        alias,
        host: Some(host),
        owner,
        repository,
        clone_url: Some(clone_url),
        rest: segments[repo_end..].to_vec(),
    })
}

fn parse_ssh_url(raw: &str, text: &str) -> Result<Location> {
    let url = Url::parse(text).map_err(|e| SkillError::syntax(raw, e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| SkillError::syntax(raw, "SSH URL has no host"))?
        .to_string();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let Some((last, parents)) = segments.split_last() else {
        return Err(SkillError::syntax(raw, "SSH URL must include owner and repository"));
    };
    let parents: Vec<String> = parents.iter().map(|s| s.to_string()).collect();
    let (owner, repository) = owner_and_repo(raw, &parents, last)?;

    Ok(Location {
        kind: SourceKind::GitUrlSsh,
        alias: well_known_alias(&host).unwrap_or(host.as_str()).to_string(),
        host: Some(host),
        owner,
        repository,
        clone_url: Some(text.to_string()),
        rest: Vec::new(),
    })
}

fn parse_scp(raw: &str, text: &str) -> Result<Location> {
    let (user_host, path) = text
        .split_once(':')
        .ok_or_else(|| SkillError::syntax(raw, "malformed SSH location"))?;
    let host = user_host
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(user_host)
        .to_string();
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(SkillError::syntax(raw, "SSH location must include owner and repository"));
    };
    let (owner, repository) = owner_and_repo(raw, parents, last)?;

    Ok(Location {
        kind: SourceKind::GitUrlSsh,
        alias: well_known_alias(&host).unwrap_or(host.as_str()).to_string(),
        host: Some(host),
        owner,
        repository,
        clone_url: Some(text.to_string()),
        rest: Vec::new(),
    })
}

fn parse_shorthand(raw: &str, text: &str) -> Result<Location> {
    let (alias, path) = match text.split_once(':') {
        Some((alias, path)) if ALIAS.is_match(alias) => (alias.to_string(), path),
        Some(_) => return Err(SkillError::syntax(raw, "invalid host alias")),
        None => (DEFAULT_GIT_ALIAS.to_string(), text),
    };
    if path.contains(':') {
        return Err(SkillError::syntax(raw, "unexpected ':' in repository path"));
    }

    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if segments.len() < 2 {
        return Err(SkillError::syntax(raw, "expected owner/repo"));
    }
    let (owner, repository) = owner_and_repo(raw, &segments[..1], &segments[1])?;

    Ok(Location {
        kind: SourceKind::GitShorthand,
        alias,
        host: None,
        owner,
        repository,
        clone_url: None,
        rest: segments[2..].to_vec(),
    })
}

fn owner_and_repo(raw: &str, owner_segments: &[String], repo: &str) -> Result<(String, String)> {
    let repository = repo.strip_suffix(".git").unwrap_or(repo).to_string();
    if owner_segments.is_empty() {
        return Err(SkillError::syntax(raw, "missing repository owner"));
    }
    for segment in owner_segments.iter().map(String::as_str).chain([repository.as_str()]) {
        if !SEGMENT.is_match(segment) || segment == "." || segment == ".." {
            return Err(SkillError::syntax(
                raw,
                format!("invalid owner or repository name '{segment}'"),
            ));
        }
    }
    Ok((owner_segments.join("/"), repository))
}

/// Decode what follows `owner/repo`. `tree|blob|raw` as the *first* segment,
/// followed by a branch, switches to web-URL decoding; anywhere else it is
/// an ordinary directory name.
fn decode_rest(rest: &[String], strip_dash: bool) -> (Option<String>, Vec<String>) {
    let rest = match rest.first() {
        Some(first) if strip_dash && first == "-" => &rest[1..],
        _ => rest,
    };

    if rest.len() >= 2 && WEB_KEYWORDS.contains(&rest[0].as_str()) {
        let keyword = rest[0].as_str();
        let branch = rest[1].clone();
        let mut sub: Vec<String> = rest[2..].to_vec();
        // `/blob/<branch>/skills/x/SKILL.md` points at the entry document
        if keyword != "tree" && sub.last().is_some_and(|s| s == SKILL_FILE) {
            sub.pop();
        }
        return (Some(branch), sub);
    }

    (None, rest.to_vec())
}

fn join_sub_path(raw: &str, segments: &[String]) -> Result<Option<String>> {
    if segments.is_empty() {
        return Ok(None);
    }
    for segment in segments {
        if segment == "." || segment == ".." {
            return Err(SkillError::syntax(raw, "sub-path may not contain '.' or '..'"));
        }
    }
    Ok(Some(segments.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alias_shorthand_with_version() {
        let parsed = parse("gitlab:team/skills@v1.2.0").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::GitShorthand);
        assert_eq!(parsed.registry_alias.as_deref(), Some("gitlab"));
        assert_eq!(parsed.owner, "team");
        assert_eq!(parsed.repository, "skills");
        assert_eq!(parsed.version, VersionSpec::Exact("v1.2.0".into()));
        assert!(parsed.sub_path.is_none());
    }

    #[test]
    fn bare_owner_repo_defaults_to_github() {
        let parsed = parse("my-org/my-skill").expect("parse");
        assert_eq!(parsed.registry_alias.as_deref(), Some("github"));
        assert_eq!(parsed.version, VersionSpec::Unspecified);
    }

    #[test]
    fn shorthand_tree_switches_to_web_decoding() {
        let parsed = parse("github:owner/repo/tree/main/skills/x").expect("parse");
        assert_eq!(parsed.version, VersionSpec::Branch("main".into()));
        assert_eq!(parsed.sub_path.as_deref(), Some("skills/x"));
    }

    #[test]
    fn directory_named_like_keyword_is_not_a_branch() {
        let parsed = parse("github:owner/repo/my-tree-dir").expect("parse");
        assert_eq!(parsed.sub_path.as_deref(), Some("my-tree-dir"));
        assert_eq!(parsed.version, VersionSpec::Unspecified);

        let parsed = parse("github:owner/repo/tree").expect("parse");
        assert_eq!(parsed.sub_path.as_deref(), Some("tree"));
        assert_eq!(parsed.version, VersionSpec::Unspecified);

        let parsed = parse("github:owner/repo/skills/tree/main").expect("parse");
        assert_eq!(parsed.sub_path.as_deref(), Some("skills/tree/main"));
        assert_eq!(parsed.version, VersionSpec::Unspecified);
    }

    #[test]
    fn explicit_version_beats_web_branch() {
        let parsed = parse("github:owner/repo/tree/main/skills/x@v2.0.0").expect("parse");
        assert_eq!(parsed.version, VersionSpec::Exact("v2.0.0".into()));
        assert_eq!(parsed.sub_path.as_deref(), Some("skills/x"));

        let parsed =
            parse("https://github.com/owner/repo/tree/dev/skills/x@branch:release").expect("parse");
        assert_eq!(parsed.version, VersionSpec::Branch("release".into()));
    }

    #[test]
    fn parses_web_url() {
        let parsed = parse("https://github.com/owner/repo/tree/main/skills/pdf").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::GitWebUrl);
        assert_eq!(parsed.registry_alias.as_deref(), Some("github"));
        assert_eq!(parsed.version, VersionSpec::Branch("main".into()));
        assert_eq!(parsed.sub_path.as_deref(), Some("skills/pdf"));
        assert_eq!(
            parsed.url.as_deref(),
            Some("https://github.com/owner/repo.git")
        );
    }

    #[test]
    fn parses_blob_url_to_skill_directory() {
        let parsed =
            parse("https://github.com/owner/repo/blob/main/skills/pdf/SKILL.md").expect("parse");
        assert_eq!(parsed.sub_path.as_deref(), Some("skills/pdf"));
    }

    #[test]
    fn parses_gitlab_nested_web_url() {
        let parsed =
            parse("https://gitlab.com/group/sub/repo/-/tree/main/skills/a").expect("parse");
        assert_eq!(parsed.registry_alias.as_deref(), Some("gitlab"));
        assert_eq!(parsed.owner, "group/sub");
        assert_eq!(parsed.repository, "repo");
        assert_eq!(parsed.version, VersionSpec::Branch("main".into()));
        assert_eq!(parsed.sub_path.as_deref(), Some("skills/a"));
    }

    #[test]
    fn parses_https_clone_url() {
        let parsed = parse("https://git.example.com/team/skills.git@v1.0.0").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::GitUrlHttps);
        assert_eq!(parsed.registry_alias.as_deref(), Some("git.example.com"));
        assert_eq!(parsed.owner, "team");
        assert_eq!(parsed.repository, "skills");
        assert_eq!(
            parsed.url.as_deref(),
            Some("https://git.example.com/team/skills.git")
        );
        assert_eq!(parsed.version, VersionSpec::Exact("v1.0.0".into()));
    }

    #[test]
    fn parses_ssh_forms() {
        let parsed = parse("git@github.com:owner/repo.git").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::GitUrlSsh);
        assert_eq!(parsed.registry_alias.as_deref(), Some("github"));
        assert_eq!(parsed.version, VersionSpec::Unspecified);
        assert_eq!(parsed.url.as_deref(), Some("git@github.com:owner/repo.git"));

        let parsed = parse("git@github.com:owner/repo.git@v3").expect("parse");
        assert_eq!(parsed.version, VersionSpec::Exact("v3".into()));
        assert_eq!(parsed.url.as_deref(), Some("git@github.com:owner/repo.git"));

        let parsed = parse("ssh://git@git.example.com:2222/team/skills.git").expect("parse");
        assert_eq!(parsed.source_kind, SourceKind::GitUrlSsh);
        assert_eq!(parsed.owner, "team");
        assert_eq!(parsed.registry_alias.as_deref(), Some("git.example.com"));
    }

    #[test]
    fn parses_skill_fragment() {
        let parsed = parse("github:owner/repo@v1.0.0#pdf").expect("parse");
        assert_eq!(parsed.skill.as_deref(), Some("pdf"));
        assert_eq!(parsed.version, VersionSpec::Exact("v1.0.0".into()));
    }

    #[test]
    fn rejects_traversal_and_garbage() {
        assert!(parse("github:owner/repo/../etc").is_err());
        assert!(parse("owner").is_err());
        assert!(parse("ftp://host/owner/repo").is_err());
        assert!(parse("bad alias:owner/repo").is_err());
    }
}
