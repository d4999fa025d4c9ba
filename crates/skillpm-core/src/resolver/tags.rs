//! Semantic-version selection over tag and version lists

use semver::{Version, VersionReq};

/// Parse `v1.2.3` / `1.2.3` into a semantic version.
pub fn parse_version(tag: &str) -> Option<Version> {
    let trimmed = tag.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    Version::parse(bare).ok()
}

/// Highest version overall. Pre-releases only win when no release exists.
pub fn highest<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let versioned: Vec<(&str, Version)> = names
        .into_iter()
        .filter_map(|name| parse_version(name).map(|v| (name, v)))
        .collect();

    let stable = versioned
        .iter()
        .filter(|(_, v)| v.pre.is_empty())
        .max_by(|a, b| a.1.cmp(&b.1));
    stable
        .or_else(|| versioned.iter().max_by(|a, b| a.1.cmp(&b.1)))
        .map(|(name, _)| *name)
}

/// Highest version satisfying `range` (`^1.2`, `~0.3.1`, ...)
pub fn highest_matching<'a, I>(names: I, range: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let req = VersionReq::parse(range.trim()).ok()?;
    names
        .into_iter()
        .filter_map(|name| parse_version(name).map(|v| (name, v)))
        .filter(|(_, v)| req.matches(v))
        .max_by(|a, b| a.1.cmp(&b.1))
        .map(|(name, _)| name)
}
