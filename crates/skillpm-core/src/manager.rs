//! Skill manager: parse → resolve → fetch → install → lock
//!
//! Owns the cache, lock and manifest for one install scope (a project
//! directory or the user's home) and drives every user-facing operation.
//! Batch operations process every reference and report failures per
//! reference instead of stopping at the first one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::archive;
use crate::cache::{CacheKey, CacheStore, CachedSkill, Fetched};
use crate::config::Settings;
use crate::error::{Result, SkillError};
use crate::git::{FetchTarget, GitBackend, SystemGit};
use crate::installer::{
    AgentType, InstallMode, InstallPolicy, InstallReport, InstallRequest, InstallTarget, Installer,
    LockState,
};
use crate::integrity;
use crate::lock::{LockEntry, LockStore};
use crate::manifest::{InstallDefaults, ManifestFile};
use crate::paths;
use crate::reference::{ParsedReference, SourceFamily};
use crate::registry::RegistryClient;
use crate::resolver::{FetchPlan, ResolvedVersion, VersionResolver};
use crate::skill::{self, SkillMetadata};

/// Where skills are installed and where the manifest and lock live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallScope {
    /// `<root>/.agents/skills`, `<root>/skills.toml`, `<root>/skills.lock`
    Project { root: PathBuf },
    /// `~/.agents/skills`, with manifest and lock under `~/.skillpm`
    Global { home: PathBuf },
}

impl InstallScope {
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::Project { root: root.into() }
    }

    pub fn global() -> Self {
        Self::Global {
            home: paths::home_dir(),
        }
    }

    /// Directory agent skill folders are resolved against
    pub fn base(&self) -> &Path {
        match self {
            Self::Project { root } => root,
            Self::Global { home } => home,
        }
    }

    fn state_dir(&self) -> PathBuf {
        match self {
            Self::Project { root } => root.clone(),
            Self::Global { home } => home.join(paths::CONFIG_DIR_NAME),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir().join(paths::MANIFEST_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(paths::LOCK_FILE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Agents to install for; empty means the manifest defaults
    pub agents: Vec<AgentType>,
    pub mode: Option<InstallMode>,
    pub force: bool,
    /// Record the reference (and explicit agents/mode) in the manifest
    pub save: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            mode: None,
            force: false,
            save: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    Installed,
    AlreadyInstalled,
    Updated,
    UpToDate,
}

#[derive(Debug)]
pub struct InstallOutcome {
    pub skill: String,
    pub reference: String,
    pub version: String,
    pub commit: String,
    pub status: InstallStatus,
    /// Per-target results; `None` when nothing had to be installed
    pub report: Option<InstallReport>,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub reference: String,
    pub error: SkillError,
}

/// Result of a multi-reference operation
#[derive(Debug, Default)]
pub struct BatchReport {
    pub successes: Vec<InstallOutcome>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// File `result` under successes or failures.
    pub fn record(&mut self, reference: &str, result: Result<InstallOutcome>) {
        match result {
            Ok(outcome) => self.successes.push(outcome),
            Err(error) => {
                error!("{}: {}", reference, error);
                self.failures.push(BatchFailure {
                    reference: reference.to_string(),
                    error,
                });
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    Outdated { current: String, latest: String },
    /// The source cannot report a newer version without downloading
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledSkill {
    pub name: String,
    pub entry: LockEntry,
    pub path: PathBuf,
    /// Whether the canonical directory is present on disk
    pub present: bool,
    pub description: Option<String>,
}

pub struct SkillManager {
    scope: InstallScope,
    cache: CacheStore,
    lock: LockStore,
    manifest: ManifestFile,
    resolver: VersionResolver,
    installer: Installer,
}

impl SkillManager {
    /// Manager using the system `git` binary.
    pub fn open(settings: &Settings, scope: InstallScope) -> Result<Self> {
        let git: Arc<dyn GitBackend> = Arc::new(SystemGit::new(settings));
        Self::with_git(settings, scope, git)
    }

    /// Manager with an explicit git backend.
    pub fn with_git(
        settings: &Settings,
        scope: InstallScope,
        git: Arc<dyn GitBackend>,
    ) -> Result<Self> {
        let manifest = ManifestFile::load(scope.manifest_path())?;
        let lock = LockStore::load(scope.lock_path())?;

        let mut resolver = VersionResolver::new(
            git,
            RegistryClient::new(settings)?,
            manifest.manifest().host_aliases(),
            &settings.registry_url,
        );
        for (registry_scope, url) in manifest.manifest().scoped_registries() {
            resolver = resolver.with_scoped_registry(registry_scope, url);
        }

        debug!(
            "Skill manager for {} (cache {})",
            scope.base().display(),
            settings.cache_dir.display()
        );
        Ok(Self {
            cache: CacheStore::new(&settings.cache_dir),
            installer: Installer::new(scope.base()),
            scope,
            lock,
            manifest,
            resolver,
        })
    }

    pub fn with_installer(mut self, installer: Installer) -> Self {
        self.installer = installer;
        self
    }

    pub fn scope(&self) -> &InstallScope {
        &self.scope
    }

    pub fn lock(&self) -> &LockStore {
        &self.lock
    }

    pub fn manifest(&self) -> &ManifestFile {
        &self.manifest
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Resolve, fetch and install one reference.
    pub async fn install_one(
        &mut self,
        raw: &str,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let parsed = ParsedReference::parse(raw)?;
        info!("Installing {}", parsed.raw);
        let resolved = self.resolver.resolve(&parsed).await?;
        let policy = InstallPolicy {
            force: options.force,
            upgrade: false,
        };
        self.complete(&parsed, resolved, options, policy, InstallStatus::Installed)
            .await
    }

    /// Install every reference; one failure never stops the rest.
    pub async fn install_many(
        &mut self,
        references: &[String],
        options: &InstallOptions,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for reference in references {
            let result = self.install_one(reference, options).await;
            report.record(reference, result);
        }
        report
    }

    /// Reproduce the lock file exactly, then install manifest entries the
    /// lock does not know about yet.
    pub async fn reinstall_all(&mut self, options: &InstallOptions) -> BatchReport {
        let mut report = BatchReport::default();
        let locked: Vec<(String, LockEntry)> = self
            .lock
            .entries()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();

        for (name, entry) in &locked {
            let result = self.install_locked(name, entry, options).await;
            report.record(&entry.reference, result);
        }

        let pending: Vec<String> = self
            .manifest
            .manifest()
            .skills
            .iter()
            .filter(|(name, _)| self.lock.get(name).is_none())
            .map(|(_, reference)| reference.clone())
            .collect();
        for reference in &pending {
            let result = self.install_one(reference, options).await;
            report.record(reference, result);
        }

        if locked.is_empty() && pending.is_empty() {
            info!("Nothing to install");
        }
        report
    }

    async fn install_locked(
        &mut self,
        name: &str,
        entry: &LockEntry,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let parsed = ParsedReference::parse(&entry.reference)?;
        if parsed.skill_name() != name {
            warn!(
                "Lock entry '{}' refers to '{}'; installing as '{}'",
                name,
                entry.reference,
                parsed.skill_name()
            );
        }
        let resolved = self.resolver.from_lock(&parsed, entry).await?;
        let policy = InstallPolicy {
            force: options.force,
            upgrade: false,
        };
        self.complete(&parsed, resolved, options, policy, InstallStatus::Installed)
            .await
    }

    /// Whether the source offers something newer than the locked version.
    pub async fn check_needs_update(&self, name: &str) -> Result<UpdateStatus> {
        let entry = self
            .lock
            .get(name)
            .ok_or_else(|| SkillError::NotInstalled(name.to_string()))?;
        let parsed = ParsedReference::parse(&entry.reference)?;

        let Some(current) = self.resolver.current_revision(&parsed).await? else {
            return Ok(UpdateStatus::Unknown);
        };
        if is_current(&parsed, entry, &current) {
            Ok(UpdateStatus::UpToDate)
        } else {
            Ok(UpdateStatus::Outdated {
                current: describe(&entry.resolved_version, Some(entry.commit_hash.as_str())),
                latest: describe(&current.version, current.commit.as_deref()),
            })
        }
    }

    /// Reinstall `name` at the newest version its reference allows.
    ///
    /// When the remote still reports the locked commit nothing is fetched.
    pub async fn update(&mut self, name: &str, options: &InstallOptions) -> Result<InstallOutcome> {
        let entry = self
            .lock
            .get(name)
            .cloned()
            .ok_or_else(|| SkillError::NotInstalled(name.to_string()))?;
        let parsed = ParsedReference::parse(&entry.reference)?;
        let policy = InstallPolicy {
            force: options.force,
            upgrade: true,
        };
        let options = InstallOptions {
            save: false,
            ..options.clone()
        };

        match self.resolver.current_revision(&parsed).await? {
            Some(current) if is_current(&parsed, &entry, &current) => {
                info!("{} is up to date ({})", name, entry.resolved_version);
                Ok(InstallOutcome {
                    skill: name.to_string(),
                    reference: entry.reference,
                    version: entry.resolved_version,
                    commit: entry.commit_hash,
                    status: InstallStatus::UpToDate,
                    report: None,
                })
            }
            Some(current) => {
                // A moved tag keeps its cache key; drop the stale content
                let key = self.cache_key(&parsed, &current);
                if let (Some(cached), Some(commit)) = (self.cache.lookup(&key), &current.commit) {
                    if cached.commit != *commit {
                        self.cache.remove(&key)?;
                    }
                }
                self.complete(&parsed, current, &options, policy, InstallStatus::Updated)
                    .await
            }
            None => {
                // Archives only reveal changes by downloading again
                let resolved = self.resolver.resolve(&parsed).await?;
                let key = self.cache_key(&parsed, &resolved);
                self.cache.remove(&key)?;
                let mut outcome = self
                    .complete(&parsed, resolved, &options, policy, InstallStatus::Updated)
                    .await?;
                if outcome.commit == entry.commit_hash {
                    outcome.status = InstallStatus::UpToDate;
                }
                Ok(outcome)
            }
        }
    }

    /// Update every locked skill.
    pub async fn update_all(&mut self, options: &InstallOptions) -> BatchReport {
        let names: Vec<(String, String)> = self
            .lock
            .entries()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.reference.clone()))
            .collect();
        let mut report = BatchReport::default();
        for (name, reference) in &names {
            let result = self.update(name, options).await;
            report.record(reference, result);
        }
        report
    }

    /// Remove `name` from `agents`. With no agents given, remove it
    /// everywhere together with its canonical copy, lock and manifest entries.
    pub fn uninstall(&mut self, name: &str, agents: &[AgentType]) -> Result<Vec<PathBuf>> {
        let canonical = self.installer.canonical_path(name);
        if self.lock.get(name).is_none() && !canonical.exists() {
            return Err(SkillError::NotInstalled(name.to_string()));
        }

        if !agents.is_empty() {
            let targets = self.targets_for(agents, InstallMode::default());
            let removed = self.installer.unlink(name, &targets)?;
            info!("Removed {} from {} agent(s)", name, removed.len());
            return Ok(removed);
        }

        let targets = self.targets_for(&AgentType::ALL, InstallMode::default());
        let removed = self.installer.uninstall(name, &targets)?;
        self.lock.remove(name)?;
        self.manifest.remove_skill(name)?;
        info!("Uninstalled {}", name);
        Ok(removed)
    }

    /// Lock entries joined with their canonical directories.
    pub fn list_installed(&self) -> Vec<InstalledSkill> {
        self.lock
            .entries()
            .iter()
            .map(|(name, entry)| {
                let path = self.installer.canonical_path(name);
                let present = path.is_dir();
                let description = SkillMetadata::read(&path).and_then(|meta| meta.description);
                InstalledSkill {
                    name: name.clone(),
                    entry: entry.clone(),
                    path,
                    present,
                    description,
                }
            })
            .collect()
    }

    pub fn list_cached(&self) -> Result<Vec<CachedSkill>> {
        self.cache.list()
    }

    pub fn clear_cache(&self) -> Result<usize> {
        self.cache.clear()
    }

    fn cache_key(&self, parsed: &ParsedReference, resolved: &ResolvedVersion) -> CacheKey {
        CacheKey::for_reference(
            parsed,
            &resolved.cache_version,
            self.resolver.registry_url_for(parsed),
        )
    }

    fn targets_for(&self, agents: &[AgentType], mode: InstallMode) -> Vec<InstallTarget> {
        let mut targets: Vec<InstallTarget> = Vec::new();
        for agent in agents {
            if targets.iter().all(|t| t.agent != *agent) {
                targets.push(self.installer.target(*agent, mode));
            }
        }
        targets
    }

    /// Explicit options, then manifest defaults, then the canonical directory alone.
    fn targets(&self, options: &InstallOptions) -> Vec<InstallTarget> {
        let defaults = &self.manifest.manifest().defaults;
        let agents: &[AgentType] = if !options.agents.is_empty() {
            &options.agents
        } else if !defaults.agents.is_empty() {
            &defaults.agents
        } else {
            &[AgentType::Universal]
        };
        let mode = options.mode.or(defaults.mode).unwrap_or_default();
        self.targets_for(agents, mode)
    }

    /// Shared tail of install, reinstall and update.
    async fn complete(
        &mut self,
        parsed: &ParsedReference,
        resolved: ResolvedVersion,
        options: &InstallOptions,
        policy: InstallPolicy,
        status: InstallStatus,
    ) -> Result<InstallOutcome> {
        let name = parsed.skill_name();
        let key = self.cache_key(parsed, &resolved);
        let registry_url = self.resolver.registry_url_for(parsed).to_string();

        let resolver = &self.resolver;
        let entry = self
            .cache
            .get_or_fetch(&key, &parsed.raw, |dest| {
                fetch_into(resolver, parsed, &resolved, &registry_url, dest)
            })
            .await?;

        let skill_root = match &parsed.skill {
            Some(selector) => skill::locate_skill(&entry.path, selector).ok_or_else(|| {
                SkillError::SkillNotFound {
                    reference: parsed.raw.clone(),
                    name: selector.clone(),
                }
            })?,
            None => entry.path.clone(),
        };

        let lock_entry = LockEntry {
            reference: parsed.raw.clone(),
            resolved_version: resolved.version.clone(),
            commit_hash: entry.commit.clone(),
            integrity: entry.integrity.clone(),
        };
        let lock_state = match self.lock.get(&name) {
            None => LockState::Untracked,
            Some(existing)
                if existing.reference == lock_entry.reference
                    && existing.resolved_version == lock_entry.resolved_version
                    && existing.commit_hash == lock_entry.commit_hash =>
            {
                LockState::Current
            }
            Some(existing) => {
                let same_source = ParsedReference::parse(&existing.reference)
                    .is_ok_and(|locked| locked.same_source(parsed));
                if same_source {
                    LockState::Tracked
                } else {
                    LockState::Foreign
                }
            }
        };

        let targets = self.targets(options);
        let mut report = self.installer.install(
            InstallRequest {
                source: &skill_root,
                skill: &name,
                lock_state,
            },
            &targets,
            policy,
        )?;

        if !report.any_success() {
            return Err(report
                .take_first_error()
                .unwrap_or_else(|| SkillError::NotInstalled(name.clone())));
        }
        for (agent, _) in report.symlink_fallbacks() {
            warn!(
                "Could not symlink {} for {}; installed a copy instead",
                name, agent
            );
        }
        for (agent, result) in report.results.iter().filter(|(_, r)| !r.success) {
            if let Some(err) = &result.error {
                warn!("{} was not installed for {}: {}", name, agent, err);
            }
        }

        if self.lock.get(&name) != Some(&lock_entry) {
            self.lock.record(&name, lock_entry.clone())?;
        }
        if options.save {
            self.manifest.add_skill(&name, &parsed.raw)?;
            if !options.agents.is_empty() || options.mode.is_some() {
                let defaults = &self.manifest.manifest().defaults;
                let updated = InstallDefaults {
                    agents: targets.iter().map(|t| t.agent).collect(),
                    mode: options.mode.or(defaults.mode),
                };
                self.manifest.set_defaults(updated)?;
            }
        }

        let status = if report.already_installed() {
            InstallStatus::AlreadyInstalled
        } else {
            status
        };
        Ok(InstallOutcome {
            skill: name,
            reference: lock_entry.reference,
            version: lock_entry.resolved_version,
            commit: lock_entry.commit_hash,
            status,
            report: Some(report),
        })
    }
}

/// Populate a cache staging directory for `resolved`.
async fn fetch_into(
    resolver: &VersionResolver,
    parsed: &ParsedReference,
    resolved: &ResolvedVersion,
    registry_url: &str,
    dest: PathBuf,
) -> Result<Fetched> {
    let (url, target) = match &resolved.fetch {
        FetchPlan::GitRef { url, name } => (url, FetchTarget::Ref(name.as_str())),
        FetchPlan::GitCommit { url, commit } => (url, FetchTarget::Commit(commit.as_str())),
        FetchPlan::Download { url, integrity } => {
            let expected = integrity.as_deref();
            return download_into(resolver, parsed, url, expected, registry_url, &dest).await;
        }
    };

    let commit = resolver.git().fetch(url, target, &dest).await?;
    if let Some(expected) = &resolved.commit {
        if !commit.starts_with(expected.as_str()) && !expected.starts_with(commit.as_str()) {
            debug!(
                "{} moved from {} to {} since it was resolved",
                target.as_str(),
                expected,
                commit
            );
        }
    }
    Ok(Fetched {
        commit,
        source_url: Some(url.clone()),
        integrity: None,
        root: None,
    })
}

async fn download_into(
    resolver: &VersionResolver,
    parsed: &ParsedReference,
    url: &str,
    expected: Option<&str>,
    registry_url: &str,
    dest: &Path,
) -> Result<Fetched> {
    let auth_url = match parsed.family() {
        SourceFamily::Registry => registry_url,
        _ => "",
    };
    let bytes = resolver.registry().download(&parsed.raw, url, auth_url).await?;

    match expected {
        Some(expected) => integrity::verify(&parsed.raw, &bytes, expected)?,
        None if parsed.family() == SourceFamily::Registry => {
            warn!("{} publishes no integrity digest; skipping verification", parsed.raw);
        }
        None => {}
    }

    let root = archive::unpack(&parsed.raw, &bytes, dest)?;
    Ok(Fetched {
        commit: integrity::sha256_hex(&bytes),
        source_url: Some(url.to_string()),
        integrity: Some(
            expected
                .map(str::to_string)
                .unwrap_or_else(|| integrity::sri_sha256(&bytes)),
        ),
        root: Some(root),
    })
}

/// Whether `current` (fresh from the remote) matches the locked entry.
fn is_current(parsed: &ParsedReference, entry: &LockEntry, current: &ResolvedVersion) -> bool {
    match parsed.family() {
        SourceFamily::Git => {
            current.version == entry.resolved_version
                && current.commit.as_deref() == Some(entry.commit_hash.as_str())
        }
        SourceFamily::Registry | SourceFamily::Archive => current.version == entry.resolved_version,
    }
}

fn describe(version: &str, commit: Option<&str>) -> String {
    match commit {
        Some(commit) if commit != version && commit.len() >= 7 && version.len() < 40 => {
            format!("{} ({})", version, &commit[..7])
        }
        _ => version.to_string(),
    }
}
