//! skillpm - package manager for AI agent skills
//!
//! Installs skills from git repositories, npm-style registries and archive
//! URLs into the skill directories of coding agents:
//! - `skillpm install` resolves, caches, links and locks skills
//! - `skillpm update` / `outdated` follow branches, ranges and dist-tags
//! - a bare `skillpm install` replays `skills.lock` exactly

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use skillpm_core::cache::CacheStore;
use skillpm_core::manager::{BatchReport, InstallOutcome};
use skillpm_core::{
    AgentType, InstallMode, InstallOptions, InstallScope, InstallStatus, Settings, SkillManager,
    UpdateStatus,
};

/// skillpm - package manager for AI agent skills
#[derive(Parser)]
#[command(name = "skillpm", version)]
#[command(about = "Install and version skills for coding agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ScopeArgs {
    /// Operate on the user-wide installation under the home directory
    #[arg(short, long)]
    global: bool,
}

impl ScopeArgs {
    fn scope(&self) -> Result<InstallScope> {
        if self.global {
            Ok(InstallScope::global())
        } else {
            Ok(InstallScope::project(std::env::current_dir()?))
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Install skills, or reinstall everything in skills.lock
    ///
    /// References take the forms `owner/repo[/path][@version][#skill]`,
    /// `alias:owner/repo`, git URLs, `@scope/name[@version]`, `name[@version]`
    /// and archive URLs (`https://`, `s3://`, `oss://`).
    Install {
        /// Skill references; none reinstalls from the lock file
        references: Vec<String>,

        /// Agent to install for (repeatable)
        #[arg(short, long = "agent", value_name = "AGENT")]
        agents: Vec<AgentType>,

        /// Copy into agent directories instead of symlinking
        #[arg(long)]
        copy: bool,

        /// Overwrite anything occupying a destination
        #[arg(short, long)]
        force: bool,

        /// Do not record references in skills.toml
        #[arg(long)]
        no_save: bool,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Update one skill, or every locked skill
    Update {
        name: Option<String>,

        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Report skills whose source has moved on
    Outdated {
        name: Option<String>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Remove a skill
    Uninstall {
        name: String,

        /// Only remove it from these agents (repeatable)
        #[arg(short, long = "agent", value_name = "AGENT")]
        agents: Vec<AgentType>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List installed skills
    List {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Inspect or clear the shared download cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached entries
    List,
    /// Remove every cached entry
    Clear,
}

fn init_logging(settings: &Settings) {
    let default_level = if settings.debug { "debug" } else { "info" };
    let filter = if settings.debug {
        EnvFilter::new(default_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!settings.no_color)
        .with_target(false)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    init_logging(&settings);
    tracing::debug!(
        "Cache at {}, registry {}",
        settings.cache_dir.display(),
        settings.registry_url
    );

    match cli.command {
        Commands::Install {
            references,
            agents,
            copy,
            force,
            no_save,
            scope,
        } => {
            let mut manager = SkillManager::open(&settings, scope.scope()?)?;
            let options = InstallOptions {
                agents,
                mode: copy.then_some(InstallMode::Copy),
                force,
                save: !no_save,
            };
            let report = if references.is_empty() {
                manager.reinstall_all(&options).await
            } else {
                manager.install_many(&references, &options).await
            };
            finish(report)
        }
        Commands::Update { name, force, scope } => {
            let mut manager = SkillManager::open(&settings, scope.scope()?)?;
            let options = InstallOptions {
                force,
                ..InstallOptions::default()
            };
            let report = match name {
                Some(name) => {
                    let mut report = BatchReport::default();
                    let result = manager.update(&name, &options).await;
                    report.record(&name, result);
                    report
                }
                None => manager.update_all(&options).await,
            };
            finish(report)
        }
        Commands::Outdated { name, scope } => {
            let manager = SkillManager::open(&settings, scope.scope()?)?;
            let names: Vec<String> = match name {
                Some(name) => vec![name],
                None => manager.lock().entries().keys().cloned().collect(),
            };
            let mut failed = false;
            for name in names {
                match manager.check_needs_update(&name).await {
                    Ok(UpdateStatus::UpToDate) => println!("{name}: up to date"),
                    Ok(UpdateStatus::Outdated { current, latest }) => {
                        println!("{name}: {current} -> {latest}")
                    }
                    Ok(UpdateStatus::Unknown) => println!("{name}: unknown (archive source)"),
                    Err(e) => {
                        eprintln!("{name}: {e}");
                        failed = true;
                    }
                }
            }
            if failed {
                bail!("could not check every skill");
            }
            Ok(())
        }
        Commands::Uninstall {
            name,
            agents,
            scope,
        } => {
            let mut manager = SkillManager::open(&settings, scope.scope()?)?;
            for path in manager.uninstall(&name, &agents)? {
                println!("removed {}", path.display());
            }
            Ok(())
        }
        Commands::List { scope } => {
            let manager = SkillManager::open(&settings, scope.scope()?)?;
            let installed = manager.list_installed();
            if installed.is_empty() {
                println!("No skills installed");
            }
            for skill in installed {
                let missing = if skill.present { "" } else { " (missing)" };
                println!(
                    "{} {} {}{}",
                    skill.name, skill.entry.resolved_version, skill.entry.reference, missing
                );
                if let Some(description) = skill.description {
                    println!("    {description}");
                }
            }
            Ok(())
        }
        Commands::Cache { command } => {
            let cache = CacheStore::new(&settings.cache_dir);
            match command {
                CacheCommands::List => {
                    for cached in cache.list()? {
                        println!(
                            "{} {} {}",
                            cached.key,
                            cached.entry.commit,
                            cached.entry.fetched_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
                CacheCommands::Clear => {
                    let removed = cache.clear()?;
                    println!("Removed {removed} cache entries");
                }
            }
            Ok(())
        }
    }
}

fn print_outcome(outcome: &InstallOutcome) {
    let status = match outcome.status {
        InstallStatus::Installed => "installed",
        InstallStatus::AlreadyInstalled => "already installed",
        InstallStatus::Updated => "updated",
        InstallStatus::UpToDate => "up to date",
    };
    println!("{} {} ({})", outcome.skill, outcome.version, status);
}

/// Print a batch summary; any failure becomes a non-zero exit.
fn finish(report: BatchReport) -> Result<()> {
    for outcome in &report.successes {
        print_outcome(outcome);
    }
    for failure in &report.failures {
        eprintln!("failed: {}: {}", failure.reference, failure.error);
    }
    if !report.is_success() {
        bail!(
            "{} of {} skill(s) failed",
            report.failures.len(),
            report.failures.len() + report.successes.len()
        );
    }
    Ok(())
}
