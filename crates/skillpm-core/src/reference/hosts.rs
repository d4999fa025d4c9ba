//! Git host aliases (`github:owner/repo`)

use std::collections::BTreeMap;

use url::Url;

/// Alias used for bare `owner/repo` references
pub const DEFAULT_GIT_ALIAS: &str = "github";

const WELL_KNOWN: &[(&str, &str)] = &[
    ("github", "https://github.com"),
    ("gitlab", "https://gitlab.com"),
    ("bitbucket", "https://bitbucket.org"),
    ("gitee", "https://gitee.com"),
];

/// Host of a well-known alias, if any.
pub fn well_known_host(alias: &str) -> Option<&'static str> {
    WELL_KNOWN
        .iter()
        .find(|(name, _)| *name == alias)
        .and_then(|(_, base)| base.strip_prefix("https://"))
}

/// Alias for a host name, if the host is well known.
pub fn well_known_alias(host: &str) -> Option<&'static str> {
    let host = host.trim_start_matches("www.");
    WELL_KNOWN
        .iter()
        .find(|(_, base)| base.strip_prefix("https://") == Some(host))
        .map(|(name, _)| *name)
}

/// Alias → base URL table, seeded with well-known hosts and extended by the
/// manifest's `registries` section.
#[derive(Debug, Clone)]
pub struct HostAliases {
    entries: BTreeMap<String, String>,
}

impl Default for HostAliases {
    fn default() -> Self {
        Self {
            entries: WELL_KNOWN
                .iter()
                .map(|(alias, base)| (alias.to_string(), base.to_string()))
                .collect(),
        }
    }
}

impl HostAliases {
    /// Well-known hosts overridden by `custom` entries.
    pub fn with_custom<'a>(custom: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut aliases = Self::default();
        for (alias, base) in custom {
            aliases.insert(alias, base);
        }
        aliases
    }

    pub fn insert(&mut self, alias: &str, base_url: &str) {
        self.entries.insert(
            alias.to_string(),
            base_url.trim_end_matches('/').to_string(),
        );
    }

    /// Base URL for an alias (`github` → `https://github.com`)
    pub fn base_url(&self, alias: &str) -> Option<&str> {
        self.entries.get(alias).map(String::as_str)
    }

    /// HTTPS clone URL for `alias:owner/repo`
    pub fn clone_url(&self, alias: &str, owner: &str, repository: &str) -> Option<String> {
        let base = self.base_url(alias)?;
        Some(format!("{base}/{owner}/{repository}.git"))
    }

    /// Reverse lookup used when a full URL is given
    pub fn alias_for_url(&self, url: &Url) -> Option<&str> {
        let host = url.host_str()?;
        self.entries.iter().find_map(|(alias, base)| {
            let base_host = Url::parse(base).ok()?.host_str()?.to_string();
            (base_host == host).then_some(alias.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_lookups() {
        assert_eq!(well_known_host("gitlab"), Some("gitlab.com"));
        assert_eq!(well_known_alias("github.com"), Some("github"));
        assert_eq!(well_known_alias("www.github.com"), Some("github"));
        assert_eq!(well_known_alias("git.example.com"), None);
    }

    #[test]
    fn custom_registries_extend_and_override() {
        let custom: BTreeMap<String, String> = [
            ("corp".to_string(), "https://git.corp.example/".to_string()),
            ("github".to_string(), "https://github.mirror.example".to_string()),
        ]
        .into_iter()
        .collect();
        let aliases = HostAliases::with_custom(&custom);

        assert_eq!(
            aliases.clone_url("corp", "team", "skills").as_deref(),
            Some("https://git.corp.example/team/skills.git")
        );
        assert_eq!(aliases.base_url("github"), Some("https://github.mirror.example"));
        assert_eq!(aliases.base_url("gitlab"), Some("https://gitlab.com"));

        let url = Url::parse("https://git.corp.example/team/skills").expect("url");
        assert_eq!(aliases.alias_for_url(&url), Some("corp"));
    }
}
