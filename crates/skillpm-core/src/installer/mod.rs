//! Materializing cached skills into agent directories
//!
//! Each skill is copied once into the canonical `.agents/skills/<name>`
//! directory. Agent targets then get either a relative symlink to it or,
//! in copy mode, their own full copy. A failed symlink degrades to a copy
//! for that target alone.

pub mod agents;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IoContext, Result, SkillError};
use crate::files::{self, CopyFilter};
use crate::paths;
use crate::skill;

pub use agents::AgentType;

/// Creates a directory symlink at `link` pointing to `target`
pub type Symlinker = fn(target: &Path, link: &Path) -> std::io::Result<()>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    #[default]
    Symlink,
    Copy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub agent: AgentType,
    pub skills_dir: PathBuf,
    pub mode: InstallMode,
}

impl InstallTarget {
    pub fn new(agent: AgentType, base: &Path, mode: InstallMode) -> Self {
        Self {
            agent,
            skills_dir: agent.skills_dir(base),
            mode,
        }
    }
}

/// How an install relates to what the lock file already records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No entry under this name
    Untracked,
    /// An entry for the same source at a different version
    Tracked,
    /// An entry locked from a different source
    Foreign,
    /// Same reference and resolved version
    Current,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallPolicy {
    /// Remove whatever occupies a destination
    pub force: bool,
    /// Replace destinations holding an older tracked version
    pub upgrade: bool,
}

/// One skill to install
#[derive(Debug, Clone, Copy)]
pub struct InstallRequest<'a> {
    /// Root of the skill inside the cache
    pub source: &'a Path,
    pub skill: &'a str,
    pub lock_state: LockState,
}

/// Outcome for one (skill, target) pair
#[derive(Debug)]
pub struct InstallResult {
    pub success: bool,
    pub path: PathBuf,
    pub canonical_path: Option<PathBuf>,
    pub symlink_failed: bool,
    pub already_installed: bool,
    pub error: Option<SkillError>,
}

impl InstallResult {
    fn installed(path: PathBuf, canonical: &Path) -> Self {
        Self {
            success: true,
            path,
            canonical_path: Some(canonical.to_path_buf()),
            symlink_failed: false,
            already_installed: false,
            error: None,
        }
    }

    fn failed(path: PathBuf, error: SkillError) -> Self {
        Self {
            success: false,
            path,
            canonical_path: None,
            symlink_failed: false,
            already_installed: false,
            error: Some(error),
        }
    }
}

#[derive(Debug)]
pub struct InstallReport {
    pub skill: String,
    pub canonical_path: PathBuf,
    pub results: BTreeMap<AgentType, InstallResult>,
}

impl InstallReport {
    pub fn any_success(&self) -> bool {
        self.results.values().any(|r| r.success)
    }

    /// Nothing was written: every target already held this version.
    pub fn already_installed(&self) -> bool {
        !self.results.is_empty() && self.results.values().all(|r| r.already_installed)
    }

    pub fn symlink_fallbacks(&self) -> impl Iterator<Item = (&AgentType, &InstallResult)> {
        self.results.iter().filter(|(_, r)| r.symlink_failed)
    }

    /// Remove and return the first target error, if any.
    pub fn take_first_error(&mut self) -> Option<SkillError> {
        self.results.values_mut().find_map(|r| r.error.take())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Replace,
    Keep,
    Conflict,
}

#[derive(Debug, Clone)]
pub struct Installer {
    base: PathBuf,
    symlinker: Symlinker,
}

impl Installer {
    /// Installer rooted at a project directory, or at home for global installs.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let base = std::path::absolute(&base).unwrap_or(base);
        Self {
            base,
            symlinker: create_dir_symlink,
        }
    }

    /// Replace the symlink primitive (tests simulate unsupported filesystems).
    pub fn with_symlinker(mut self, symlinker: Symlinker) -> Self {
        self.symlinker = symlinker;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn canonical_path(&self, skill: &str) -> PathBuf {
        paths::canonical_skills_dir(&self.base).join(skill)
    }

    pub fn target(&self, agent: AgentType, mode: InstallMode) -> InstallTarget {
        InstallTarget::new(agent, &self.base, mode)
    }

    pub fn install(
        &self,
        request: InstallRequest<'_>,
        targets: &[InstallTarget],
        policy: InstallPolicy,
    ) -> Result<InstallReport> {
        validate_skill_name(request.skill)?;
        if !skill::has_skill_file(request.source) {
            warn!(
                "{} has no {}; installing anyway",
                request.source.display(),
                paths::SKILL_FILE
            );
        }

        let canonical = self.canonical_path(request.skill);
        let canonical_action = plan_canonical(&canonical, request.lock_state, policy);
        if canonical_action == Action::Conflict {
            return Err(conflict(request.skill, &canonical));
        }

        let planned: Vec<(&InstallTarget, PathBuf, Action)> = targets
            .iter()
            .map(|target| {
                let dest = target.skills_dir.join(request.skill);
                let action = if same_path(&dest, &canonical) {
                    canonical_action
                } else {
                    plan_target(&dest, &canonical, target.mode, request.lock_state, policy)
                };
                (target, dest, action)
            })
            .collect();

        // Nothing has been touched yet; fail cleanly when no target can proceed
        if !planned.is_empty() && planned.iter().all(|(_, _, a)| *a == Action::Conflict) {
            let (_, dest, _) = &planned[0];
            return Err(conflict(request.skill, dest));
        }

        match canonical_action {
            Action::Create | Action::Replace => {
                files::remove_path(&canonical)?;
                files::copy_tree(request.source, &canonical, CopyFilter::Install)?;
                debug!("Stored {} at {}", request.skill, canonical.display());
            }
            Action::Keep | Action::Conflict => {}
        }

        let mut results = BTreeMap::new();
        for (target, dest, action) in planned {
            let result = if same_path(&dest, &canonical) {
                let mut result = InstallResult::installed(canonical.clone(), &canonical);
                result.already_installed = canonical_action == Action::Keep;
                result
            } else {
                self.apply(request.skill, target, dest, action, &canonical)
            };
            results.insert(target.agent, result);
        }

        let report = InstallReport {
            skill: request.skill.to_string(),
            canonical_path: canonical,
            results,
        };
        if report.already_installed() {
            info!("{} is already installed", request.skill);
        }
        Ok(report)
    }

    fn apply(
        &self,
        skill: &str,
        target: &InstallTarget,
        dest: PathBuf,
        action: Action,
        canonical: &Path,
    ) -> InstallResult {
        match action {
            Action::Conflict => InstallResult::failed(dest.clone(), conflict(skill, &dest)),
            Action::Keep => {
                let mut result = InstallResult::installed(dest, canonical);
                result.already_installed = true;
                result
            }
            Action::Create | Action::Replace => match self.materialize(target, &dest, canonical) {
                Ok(symlink_failed) => {
                    info!("Installed {} for {} at {}", skill, target.agent, dest.display());
                    let mut result = InstallResult::installed(dest, canonical);
                    result.symlink_failed = symlink_failed;
                    result
                }
                Err(err) => {
                    warn!("Failed to install {} for {}: {}", skill, target.agent, err);
                    InstallResult::failed(dest, err)
                }
            },
        }
    }

    /// Returns whether a requested symlink fell back to a copy.
    fn materialize(&self, target: &InstallTarget, dest: &Path, canonical: &Path) -> Result<bool> {
        files::remove_path(dest)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }

        match target.mode {
            InstallMode::Copy => {
                files::copy_tree(canonical, dest, CopyFilter::Install)?;
                Ok(false)
            }
            InstallMode::Symlink => {
                let link_target = dest
                    .parent()
                    .and_then(|parent| files::relative_path(parent, canonical))
                    .unwrap_or_else(|| canonical.to_path_buf());
                match (self.symlinker)(&link_target, dest) {
                    Ok(()) => Ok(false),
                    Err(e) => {
                        warn!(
                            "Symlink {} -> {} failed ({}); copying instead",
                            dest.display(),
                            link_target.display(),
                            e
                        );
                        files::remove_path(dest)?;
                        files::copy_tree(canonical, dest, CopyFilter::Install)?;
                        Ok(true)
                    }
                }
            }
        }
    }

    /// Remove `skill` from the given agent directories only.
    /// Returns the paths that were removed.
    pub fn unlink(&self, skill: &str, targets: &[InstallTarget]) -> Result<Vec<PathBuf>> {
        validate_skill_name(skill)?;
        let canonical = self.canonical_path(skill);
        let mut removed = Vec::new();

        for target in targets {
            let dest = target.skills_dir.join(skill);
            if same_path(&dest, &canonical) || !files::entry_exists(&dest) {
                continue;
            }
            let is_copy = std::fs::symlink_metadata(&dest).is_ok_and(|m| m.is_dir());
            if is_managed_link(&dest, &canonical) || is_copy {
                files::remove_path(&dest)?;
                removed.push(dest);
            }
        }
        Ok(removed)
    }

    /// Remove `skill` from `targets` and from canonical storage.
    pub fn uninstall(&self, skill: &str, targets: &[InstallTarget]) -> Result<Vec<PathBuf>> {
        let mut removed = self.unlink(skill, targets)?;
        let canonical = self.canonical_path(skill);
        if files::entry_exists(&canonical) {
            files::remove_path(&canonical)?;
            removed.push(canonical);
        }
        Ok(removed)
    }
}

fn plan_canonical(canonical: &Path, lock_state: LockState, policy: InstallPolicy) -> Action {
    if !files::entry_exists(canonical) {
        return Action::Create;
    }
    match lock_state {
        LockState::Current if !policy.force => Action::Keep,
        LockState::Current | LockState::Tracked => Action::Replace,
        LockState::Untracked | LockState::Foreign if policy.force => Action::Replace,
        LockState::Untracked | LockState::Foreign => Action::Conflict,
    }
}

fn plan_target(
    dest: &Path,
    canonical: &Path,
    mode: InstallMode,
    lock_state: LockState,
    policy: InstallPolicy,
) -> Action {
    if !files::entry_exists(dest) {
        return Action::Create;
    }
    if is_managed_link(dest, canonical) && lock_state != LockState::Foreign {
        let keep =
            mode == InstallMode::Symlink && lock_state == LockState::Current && !policy.force;
        return if keep { Action::Keep } else { Action::Replace };
    }
    if policy.force {
        return Action::Replace;
    }
    match lock_state {
        LockState::Current => Action::Keep,
        LockState::Tracked if policy.upgrade => Action::Replace,
        LockState::Tracked | LockState::Untracked | LockState::Foreign => Action::Conflict,
    }
}

fn conflict(skill: &str, path: &Path) -> SkillError {
    SkillError::Conflict {
        skill: skill.to_string(),
        path: path.to_path_buf(),
    }
}

fn validate_skill_name(skill: &str) -> Result<()> {
    let invalid = skill.is_empty()
        || skill == "."
        || skill == ".."
        || skill.contains(['/', '\\'])
        || skill.chars().any(char::is_control);
    if invalid {
        return Err(SkillError::syntax(skill, "invalid skill name"));
    }
    Ok(())
}

fn same_path(a: &Path, b: &Path) -> bool {
    files::normalize(a) == files::normalize(b)
}

/// Whether `dest` is a symlink resolving to `canonical`.
fn is_managed_link(dest: &Path, canonical: &Path) -> bool {
    let is_link = std::fs::symlink_metadata(dest).is_ok_and(|m| m.file_type().is_symlink());
    if !is_link {
        return false;
    }
    let Ok(target) = std::fs::read_link(dest) else {
        return false;
    };
    let resolved = if target.is_absolute() {
        target
    } else {
        dest.parent().unwrap_or_else(|| Path::new("")).join(target)
    };
    if same_path(&resolved, canonical) {
        return true;
    }
    matches!(
        (std::fs::canonicalize(&resolved), std::fs::canonicalize(canonical)),
        (Ok(a), Ok(b)) if a == b
    )
}

#[cfg(unix)]
fn create_dir_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_dir_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(not(any(unix, windows)))]
fn create_dir_symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}
