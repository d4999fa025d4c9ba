//! Version resolution
//!
//! Maps a [`ParsedReference`] to the concrete version to fetch: a git tag
//! or commit, a registry version with its tarball, or an archive label.
//! Branch and default-branch requests are pinned to the commit the remote
//! reports, so the cache key of a moving ref never goes stale.

pub mod tags;

use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, SkillError};
use crate::git::GitBackend;
use crate::lock::LockEntry;
use crate::reference::{HostAliases, ParsedReference, SourceFamily, VersionSpec, DEFAULT_GIT_ALIAS};
use crate::registry::RegistryClient;

/// Label recorded for archives fetched without a version
pub const UNVERSIONED_LABEL: &str = "latest";

/// How to obtain the content of a resolved version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Clone `url` at a tag
    GitRef { url: String, name: String },
    /// Fetch `url` at an exact commit
    GitCommit { url: String, commit: String },
    /// Download an archive, verifying `integrity` when known
    Download { url: String, integrity: Option<String> },
}

/// Outcome of resolving one reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// Recorded in the lock file: tag, branch, commit or registry version
    pub version: String,
    /// Commit the remote reports, when known before fetching
    pub commit: Option<String>,
    /// Version component of the cache key
    pub cache_version: String,
    pub fetch: FetchPlan,
}

pub struct VersionResolver {
    git: Arc<dyn GitBackend>,
    registry: RegistryClient,
    hosts: HostAliases,
    registry_url: String,
    scoped_registries: Vec<(String, String)>,
}

impl VersionResolver {
    pub fn new(
        git: Arc<dyn GitBackend>,
        registry: RegistryClient,
        hosts: HostAliases,
        registry_url: &str,
    ) -> Self {
        Self {
            git,
            registry,
            hosts,
            registry_url: registry_url.trim_end_matches('/').to_string(),
            scoped_registries: Vec::new(),
        }
    }

    /// Route `@scope/...` packages to a private registry.
    pub fn with_scoped_registry(mut self, scope: &str, url: &str) -> Self {
        self.scoped_registries.push((
            scope.trim_start_matches('@').to_string(),
            url.trim_end_matches('/').to_string(),
        ));
        self
    }

    pub fn git(&self) -> &Arc<dyn GitBackend> {
        &self.git
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Registry base URL serving `reference`
    pub fn registry_url_for(&self, reference: &ParsedReference) -> &str {
        reference
            .scope
            .as_deref()
            .and_then(|scope| {
                self.scoped_registries
                    .iter()
                    .find(|(s, _)| s == scope)
                    .map(|(_, url)| url.as_str())
            })
            .unwrap_or(self.registry_url.as_str())
    }

    /// Clone URL for a git reference
    pub fn git_url(&self, reference: &ParsedReference) -> Result<String> {
        if let Some(url) = &reference.url {
            return Ok(url.clone());
        }
        let alias = reference.registry_alias.as_deref().unwrap_or(DEFAULT_GIT_ALIAS);
        self.hosts
            .clone_url(alias, &reference.owner, &reference.repository)
            .ok_or_else(|| {
                SkillError::syntax(&reference.raw, format!("unknown host alias '{alias}'"))
            })
    }

    pub async fn resolve(&self, reference: &ParsedReference) -> Result<ResolvedVersion> {
        match reference.family() {
            SourceFamily::Git => self.resolve_git(reference).await,
            SourceFamily::Registry => self.resolve_registry(reference).await,
            SourceFamily::Archive => self.resolve_archive(reference),
        }
    }

    async fn resolve_git(&self, reference: &ParsedReference) -> Result<ResolvedVersion> {
        let url = self.git_url(reference)?;
        let not_found = |requested: &str| SkillError::VersionNotFound {
            reference: reference.raw.clone(),
            requested: requested.to_string(),
        };

        let resolved = match &reference.version {
            VersionSpec::Exact(tag) => ResolvedVersion {
                version: tag.clone(),
                commit: None,
                cache_version: tag.clone(),
                fetch: FetchPlan::GitRef { url, name: tag.clone() },
            },
            VersionSpec::Commit(hash) => ResolvedVersion {
                version: hash.clone(),
                commit: Some(hash.clone()),
                cache_version: hash.clone(),
                fetch: FetchPlan::GitCommit { url, commit: hash.clone() },
            },
            VersionSpec::Branch(branch) => {
                let commit = self
                    .git
                    .remote_commit(&url, branch)
                    .await?
                    .ok_or_else(|| not_found(branch))?;
                ResolvedVersion {
                    version: branch.clone(),
                    cache_version: commit.clone(),
                    fetch: FetchPlan::GitCommit { url, commit: commit.clone() },
                    commit: Some(commit),
                }
            }
            VersionSpec::Unspecified => {
                let (branch, commit) = self.git.default_branch(&url).await?;
                ResolvedVersion {
                    version: branch,
                    cache_version: commit.clone(),
                    fetch: FetchPlan::GitCommit { url, commit: commit.clone() },
                    commit: Some(commit),
                }
            }
            VersionSpec::Latest | VersionSpec::Range(_) => {
                let remote_tags = self.git.list_tags(&url).await?;
                let names = remote_tags.iter().map(|t| t.name.as_str());
                let picked = match &reference.version {
                    VersionSpec::Range(range) => tags::highest_matching(names, range),
                    _ => tags::highest(names),
                }
                .ok_or_else(|| not_found(&reference.version.to_string()))?;
                let commit = remote_tags
                    .iter()
                    .find(|t| t.name == picked)
                    .map(|t| t.commit.clone());
                ResolvedVersion {
                    version: picked.to_string(),
                    commit,
                    cache_version: picked.to_string(),
                    fetch: FetchPlan::GitRef { url, name: picked.to_string() },
                }
            }
        };

        debug!("Resolved {} to {}", reference.raw, resolved.version);
        Ok(resolved)
    }

    async fn resolve_registry(&self, reference: &ParsedReference) -> Result<ResolvedVersion> {
        let registry_url = self.registry_url_for(reference).to_string();
        let release = self.registry.resolve(reference, &registry_url).await?;
        Ok(ResolvedVersion {
            cache_version: release.version.clone(),
            version: release.version,
            commit: None,
            fetch: FetchPlan::Download {
                url: release.tarball,
                integrity: release.integrity,
            },
        })
    }

    fn resolve_archive(&self, reference: &ParsedReference) -> Result<ResolvedVersion> {
        let url = reference
            .url
            .clone()
            .ok_or_else(|| SkillError::syntax(&reference.raw, "archive reference has no URL"))?;
        let label = match &reference.version {
            VersionSpec::Exact(label) => label.clone(),
            _ => UNVERSIONED_LABEL.to_string(),
        };
        Ok(ResolvedVersion {
            version: label.clone(),
            commit: None,
            cache_version: label,
            fetch: FetchPlan::Download { url, integrity: None },
        })
    }

    /// Rebuild the resolution recorded in a lock entry, without asking the
    /// remote for anything newer.
    pub async fn from_lock(
        &self,
        reference: &ParsedReference,
        entry: &LockEntry,
    ) -> Result<ResolvedVersion> {
        match reference.family() {
            SourceFamily::Git => {
                let url = self.git_url(reference)?;
                let tag_like = matches!(
                    reference.version,
                    VersionSpec::Exact(_) | VersionSpec::Latest | VersionSpec::Range(_)
                );
                let cache_version = if tag_like {
                    entry.resolved_version.clone()
                } else {
                    entry.commit_hash.clone()
                };
                Ok(ResolvedVersion {
                    version: entry.resolved_version.clone(),
                    commit: Some(entry.commit_hash.clone()),
                    cache_version,
                    fetch: FetchPlan::GitCommit {
                        url,
                        commit: entry.commit_hash.clone(),
                    },
                })
            }
            SourceFamily::Registry => {
                let mut pinned = reference.clone();
                pinned.version = VersionSpec::Exact(entry.resolved_version.clone());
                let mut resolved = self.resolve_registry(&pinned).await?;
                if let FetchPlan::Download { integrity, .. } = &mut resolved.fetch {
                    // The locked digest is authoritative
                    if entry.integrity.is_some() {
                        integrity.clone_from(&entry.integrity);
                    }
                }
                Ok(resolved)
            }
            SourceFamily::Archive => {
                let mut resolved = self.resolve_archive(reference)?;
                resolved.version = entry.resolved_version.clone();
                resolved.cache_version = entry.resolved_version.clone();
                if let FetchPlan::Download { integrity, .. } = &mut resolved.fetch {
                    integrity.clone_from(&entry.integrity);
                }
                Ok(resolved)
            }
        }
    }

    /// Commit (or registry version) the remote currently offers for
    /// `reference`. `None` when the source cannot say without downloading.
    pub async fn current_revision(
        &self,
        reference: &ParsedReference,
    ) -> Result<Option<ResolvedVersion>> {
        match reference.family() {
            SourceFamily::Archive => Ok(None),
            SourceFamily::Registry => self.resolve_registry(reference).await.map(Some),
            SourceFamily::Git => {
                let mut resolved = self.resolve_git(reference).await?;
                if resolved.commit.is_none() {
                    let url = self.git_url(reference)?;
                    resolved.commit = self.git.remote_commit(&url, &resolved.version).await?;
                    if resolved.commit.is_none() {
                        return Err(SkillError::VersionNotFound {
                            reference: reference.raw.clone(),
                            requested: resolved.version,
                        });
                    }
                }
                Ok(Some(resolved))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::git::{FetchTarget, RemoteTag};
    use async_trait::async_trait;
    use std::path::Path;

    struct StaticRemote;

    #[async_trait]
    impl GitBackend for StaticRemote {
        async fn list_tags(&self, _url: &str) -> Result<Vec<RemoteTag>> {
            Ok(["v1.0.0", "v1.2.0", "v2.0.0", "docs"]
                .iter()
                .enumerate()
                .map(|(i, name)| RemoteTag {
                    name: name.to_string(),
                    commit: format!("{i}").repeat(40),
                })
                .collect())
        }

        async fn remote_commit(&self, _url: &str, reference: &str) -> Result<Option<String>> {
            Ok(match reference {
                "main" => Some("m".repeat(40)),
                "v1.0.0" => Some("0".repeat(40)),
                _ => None,
            })
        }

        async fn default_branch(&self, _url: &str) -> Result<(String, String)> {
            Ok(("main".to_string(), "m".repeat(40)))
        }

        async fn fetch(&self, url: &str, _target: FetchTarget<'_>, _dest: &Path) -> Result<String> {
            Err(SkillError::network(url, "not used"))
        }
    }

    fn resolver() -> VersionResolver {
        let settings = Settings::default();
        VersionResolver::new(
            Arc::new(StaticRemote),
            RegistryClient::new(&settings).expect("client"),
            HostAliases::default(),
            &settings.registry_url,
        )
        .with_scoped_registry("@corp", "https://npm.corp.example/")
    }

    async fn resolve(raw: &str) -> Result<ResolvedVersion> {
        resolver().resolve(&ParsedReference::parse(raw).expect("parse")).await
    }

    #[tokio::test]
    async fn exact_tag_is_used_verbatim() {
        let resolved = resolve("github:o/r@v1.0.0").await.expect("resolve");
        assert_eq!(resolved.version, "v1.0.0");
        assert_eq!(resolved.cache_version, "v1.0.0");
        assert_eq!(
            resolved.fetch,
            FetchPlan::GitRef {
                url: "https://github.com/o/r.git".into(),
                name: "v1.0.0".into()
            }
        );
    }

    #[tokio::test]
    async fn latest_and_ranges_pick_semver_tags() {
        let latest = resolve("github:o/r@latest").await.expect("resolve");
        assert_eq!(latest.version, "v2.0.0");
        assert_eq!(latest.commit.as_deref(), Some("2".repeat(40).as_str()));

        let ranged = resolve("github:o/r@^1.0").await.expect("resolve");
        assert_eq!(ranged.version, "v1.2.0");

        let err = resolve("github:o/r@^3.0").await.expect_err("no match");
        assert!(matches!(err, SkillError::VersionNotFound { .. }));
    }

    #[tokio::test]
    async fn branches_are_pinned_to_commits() {
        let pinned = FetchPlan::GitCommit {
            url: "https://github.com/o/r.git".into(),
            commit: "m".repeat(40),
        };
        let branch = resolve("github:o/r@branch:main").await.expect("resolve");
        assert_eq!(branch.version, "main");
        assert_eq!(branch.cache_version, "m".repeat(40));
        // Content comes from the pinned commit even if the branch moves later
        assert_eq!(branch.fetch, pinned);

        let default = resolve("github:o/r").await.expect("resolve");
        assert_eq!(default.version, "main");
        assert_eq!(default.cache_version, "m".repeat(40));
        assert_eq!(default.fetch, pinned);

        let err = resolve("github:o/r@branch:gone").await.expect_err("missing");
        assert!(matches!(err, SkillError::VersionNotFound { .. }));
    }

    #[tokio::test]
    async fn archive_without_version_is_labelled_latest() {
        let resolved = resolve("https://cdn.example.com/pdf.zip").await.expect("resolve");
        assert_eq!(resolved.version, UNVERSIONED_LABEL);
        assert!(matches!(resolved.fetch, FetchPlan::Download { .. }));
    }

    #[test]
    fn scoped_registry_lookup() {
        let resolver = resolver();
        let corp = ParsedReference::parse("@corp/pdf").expect("parse");
        let public = ParsedReference::parse("@acme/pdf").expect("parse");
        assert_eq!(resolver.registry_url_for(&corp), "https://npm.corp.example");
        assert_eq!(resolver.registry_url_for(&public), "https://registry.npmjs.org");
    }

    #[tokio::test]
    async fn exact_tags_get_commits_for_update_checks() {
        let resolver = resolver();
        let parsed = ParsedReference::parse("github:o/r@v1.0.0").expect("parse");
        let current = resolver
            .current_revision(&parsed)
            .await
            .expect("query")
            .expect("git sources report a revision");
        assert_eq!(current.commit.as_deref(), Some("0".repeat(40).as_str()));
    }
}
