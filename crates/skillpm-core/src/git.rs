//! Git remote access through the system `git` binary.
//!
//! Every invocation is non-interactive: terminal and askpass prompts are
//! disabled, SSH runs in batch mode and accepts unknown host keys while
//! still rejecting changed ones, and each command carries a timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::Settings;
use crate::error::{Result, SkillError};

const SSH_BATCH_OPTIONS: &str = "-o BatchMode=yes -o StrictHostKeyChecking=accept-new";

/// What to check out after a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTarget<'a> {
    /// Branch or tag name
    Ref(&'a str),
    /// Full or abbreviated commit hash
    Commit(&'a str),
}

impl FetchTarget<'_> {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ref(name) => name,
            Self::Commit(hash) => hash,
        }
    }
}

/// A tag advertised by a remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTag {
    pub name: String,
    pub commit: String,
}

/// Remote operations the resolver and cache need. Implemented by
/// [`SystemGit`]; tests substitute an in-memory fake.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// All tags on the remote, annotated tags peeled to their commit
    async fn list_tags(&self, url: &str) -> Result<Vec<RemoteTag>>;

    /// Commit the remote currently has for a branch or tag name
    async fn remote_commit(&self, url: &str, reference: &str) -> Result<Option<String>>;

    /// Default branch name and its head commit
    async fn default_branch(&self, url: &str) -> Result<(String, String)>;

    /// Shallow-fetch `target` into `dest`, returning the checked-out commit
    async fn fetch(&self, url: &str, target: FetchTarget<'_>, dest: &Path) -> Result<String>;
}

/// [`GitBackend`] backed by `git` subprocesses
#[derive(Debug, Clone)]
pub struct SystemGit {
    ls_remote_timeout: Duration,
    fetch_timeout: Duration,
}

impl SystemGit {
    pub fn new(settings: &Settings) -> Self {
        Self {
            ls_remote_timeout: settings.ls_remote_timeout,
            fetch_timeout: settings.fetch_timeout,
        }
    }

    async fn run_git(
        &self,
        url: &str,
        args: &[&str],
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<std::process::Output> {
        let git = git_executable().ok_or_else(|| {
            SkillError::network(url, "git executable not found in PATH")
        })?;

        let mut command = Command::new(git);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        for (key, value) in non_interactive_env(std::env::var("GIT_SSH_COMMAND").ok()) {
            command.env(key, value);
        }

        debug!("git {}", args.join(" "));
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                SkillError::network(
                    url,
                    format!(
                        "git {} timed out after {}s",
                        subcommand(args),
                        timeout.as_secs()
                    ),
                )
            })?
            .map_err(|e| SkillError::network(url, format!("failed to run git: {e}")))?;

        if output.status.success() {
            Ok(output)
        } else {
            let detail = command_error_detail(&output.stdout, &output.stderr);
            Err(SkillError::network(
                url,
                format!("git {} failed: {}", subcommand(args), detail),
            ))
        }
    }

    async fn fetch_commit(&self, url: &str, commit: &str, dest: &Path) -> Result<String> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| SkillError::io(dest, e))?;
        self.run_git(url, &["init", "--quiet"], Some(dest), self.ls_remote_timeout)
            .await?;
        self.run_git(
            url,
            &["remote", "add", "origin", url],
            Some(dest),
            self.ls_remote_timeout,
        )
        .await?;

        let shallow = self
            .run_git(
                url,
                &["fetch", "--quiet", "--depth", "1", "origin", commit],
                Some(dest),
                self.fetch_timeout,
            )
            .await;
        let target = match shallow {
            Ok(_) => "FETCH_HEAD",
            Err(err) => {
                // Abbreviated hashes cannot be fetched directly
                debug!("shallow fetch of {} failed, fetching full history: {}", commit, err);
                self.run_git(
                    url,
                    &["fetch", "--quiet", "origin"],
                    Some(dest),
                    self.fetch_timeout,
                )
                .await?;
                commit
            }
        };

        self.run_git(
            url,
            &["-c", "advice.detachedHead=false", "checkout", "--quiet", target],
            Some(dest),
            self.ls_remote_timeout,
        )
        .await?;
        self.head_commit(url, dest).await
    }

    async fn head_commit(&self, url: &str, repo: &Path) -> Result<String> {
        let output = self
            .run_git(url, &["rev-parse", "HEAD"], Some(repo), self.ls_remote_timeout)
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitBackend for SystemGit {
    async fn list_tags(&self, url: &str) -> Result<Vec<RemoteTag>> {
        let output = self
            .run_git(url, &["ls-remote", "--tags", url], None, self.ls_remote_timeout)
            .await?;
        Ok(parse_tag_refs(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn remote_commit(&self, url: &str, reference: &str) -> Result<Option<String>> {
        let heads = format!("refs/heads/{reference}");
        let tags = format!("refs/tags/{reference}");
        let peeled = format!("refs/tags/{reference}^{{}}");
        let output = self
            .run_git(
                url,
                &["ls-remote", url, heads.as_str(), tags.as_str(), peeled.as_str()],
                None,
                self.ls_remote_timeout,
            )
            .await?;
        Ok(pick_ref_commit(
            &String::from_utf8_lossy(&output.stdout),
            reference,
        ))
    }

    async fn default_branch(&self, url: &str) -> Result<(String, String)> {
        let output = self
            .run_git(
                url,
                &["ls-remote", "--symref", url, "HEAD"],
                None,
                self.ls_remote_timeout,
            )
            .await?;
        parse_symref_head(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| SkillError::network(url, "remote did not advertise a default branch"))
    }

    async fn fetch(&self, url: &str, target: FetchTarget<'_>, dest: &Path) -> Result<String> {
        let reference = match target {
            FetchTarget::Commit(hash) => return self.fetch_commit(url, hash, dest).await,
            FetchTarget::Ref(name) => name,
        };

        let dest_str = dest.to_string_lossy();
        self.run_git(
            url,
            &[
                "-c",
                "advice.detachedHead=false",
                "clone",
                "--quiet",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                reference,
                url,
                dest_str.as_ref(),
            ],
            None,
            self.fetch_timeout,
        )
        .await?;
        self.head_commit(url, dest).await
    }
}

fn git_executable() -> Option<PathBuf> {
    which::which("git").ok()
}

/// Environment applied to every git subprocess.
fn non_interactive_env(user_ssh_command: Option<String>) -> Vec<(&'static str, String)> {
    let ssh_command = match user_ssh_command.filter(|c| !c.trim().is_empty()) {
        Some(existing) => format!("{existing} {SSH_BATCH_OPTIONS}"),
        None => format!("ssh {SSH_BATCH_OPTIONS}"),
    };
    vec![
        ("GIT_TERMINAL_PROMPT", "0".to_string()),
        ("GIT_ASKPASS", "echo".to_string()),
        ("SSH_ASKPASS", "echo".to_string()),
        ("GCM_INTERACTIVE", "never".to_string()),
        ("GIT_SSH_COMMAND", ssh_command),
    ]
}

fn subcommand<'a>(args: &[&'a str]) -> &'a str {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
            continue;
        }
        if !arg.starts_with('-') {
            return arg;
        }
    }
    "command"
}

fn command_error_detail(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    "unknown git error".to_string()
}

fn parse_tag_refs(output: &str) -> Vec<RemoteTag> {
    let mut tags: Vec<RemoteTag> = Vec::new();

    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let mut parts = line.split('\t');
        let commit = parts.next().unwrap_or_default().trim();
        let Some(name) = parts
            .next()
            .and_then(|r| r.trim().strip_prefix("refs/tags/"))
        else {
            continue;
        };

        if let Some(base) = name.strip_suffix("^{}") {
            // Peeled entry: the commit an annotated tag points at
            match tags.iter_mut().find(|t| t.name == base) {
                Some(existing) => existing.commit = commit.to_string(),
                None => tags.push(RemoteTag {
                    name: base.to_string(),
                    commit: commit.to_string(),
                }),
            }
            continue;
        }

        if tags.iter().all(|t| t.name != name) {
            tags.push(RemoteTag {
                name: name.to_string(),
                commit: commit.to_string(),
            });
        }
    }

    tags
}

fn pick_ref_commit(output: &str, reference: &str) -> Option<String> {
    let mut head = None;
    let mut tag = None;
    let mut peeled = None;

    for line in output.lines() {
        let mut parts = line.split('\t');
        let commit = parts.next().unwrap_or_default().trim().to_string();
        let name = parts.next().unwrap_or_default().trim();
        if commit.is_empty() {
            continue;
        }
        if name.strip_prefix("refs/heads/") == Some(reference) {
            head = Some(commit);
        } else if name.strip_prefix("refs/tags/") == Some(reference) {
            tag = Some(commit);
        } else if name
            .strip_prefix("refs/tags/")
            .and_then(|n| n.strip_suffix("^{}"))
            == Some(reference)
        {
            peeled = Some(commit);
        }
    }

    peeled.or(tag).or(head)
}

fn parse_symref_head(output: &str) -> Option<(String, String)> {
    let mut branch = None;
    let mut commit = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("ref: ") {
            let target = rest.split('\t').next().unwrap_or_default().trim();
            branch = target.strip_prefix("refs/heads/").map(str::to_string);
            continue;
        }
        let mut parts = line.split('\t');
        let sha = parts.next().unwrap_or_default().trim();
        if parts.next().map(str::trim) == Some("HEAD") && !sha.is_empty() {
            commit = Some(sha.to_string());
        }
    }

    Some((branch?, commit?))
}
