//! Supported agents and where each one looks for skills

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::paths::CANONICAL_SKILLS_DIR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    ClaudeCode,
    Cursor,
    Codex,
    Windsurf,
    GeminiCli,
    GithubCopilot,
    Opencode,
    /// Reads the canonical `.agents/skills` directory directly
    Universal,
}

impl AgentType {
    pub const ALL: [AgentType; 8] = [
        Self::ClaudeCode,
        Self::Cursor,
        Self::Codex,
        Self::Windsurf,
        Self::GeminiCli,
        Self::GithubCopilot,
        Self::Opencode,
        Self::Universal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Cursor => "cursor",
            Self::Codex => "codex",
            Self::Windsurf => "windsurf",
            Self::GeminiCli => "gemini-cli",
            Self::GithubCopilot => "github-copilot",
            Self::Opencode => "opencode",
            Self::Universal => "universal",
        }
    }

    /// Skills directory relative to the project root (or home, for global installs)
    pub fn skills_subdir(self) -> &'static str {
        match self {
            Self::ClaudeCode => ".claude/skills",
            Self::Cursor => ".cursor/skills",
            Self::Codex => ".codex/skills",
            Self::Windsurf => ".windsurf/skills",
            Self::GeminiCli => ".gemini/skills",
            Self::GithubCopilot => ".github/skills",
            Self::Opencode => ".opencode/skills",
            Self::Universal => CANONICAL_SKILLS_DIR,
        }
    }

    pub fn skills_dir(self, base: &Path) -> PathBuf {
        base.join(self.skills_subdir())
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        // Common short forms
        let wanted = match wanted.as_str() {
            "claude" => "claude-code",
            "gemini" => "gemini-cli",
            "copilot" => "github-copilot",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|agent| agent.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|a| a.as_str()).collect();
                format!("unknown agent '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}
