//! skillpm core
//!
//! Package management for agent skills: parse a reference, resolve it to a
//! concrete version, fetch it into a shared content cache, install it for
//! one or more coding agents and record the result in `skills.lock`.

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod files;
pub mod git;
pub mod installer;
pub mod integrity;
pub mod lock;
pub mod manager;
pub mod manifest;
pub mod paths;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod skill;

pub use config::Settings;
pub use error::{Result, SkillError};
pub use installer::{AgentType, InstallMode};
pub use manager::{
    BatchReport, InstallOptions, InstallOutcome, InstallScope, InstallStatus, SkillManager,
    UpdateStatus,
};
pub use reference::ParsedReference;
