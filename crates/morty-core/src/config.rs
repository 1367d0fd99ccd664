//! Configuration for the orchestrator kernel.
//!
//! Matches the global `config.json` described in spec.md Section 6: optional
//! overrides for the assistant command path, default timeout, max retries,
//! and log format. Precedence (spec Section 6, 7): CLI flags > `--config`
//! file > environment (`CLAUDE_CODE_CLI`, `MORTY_HOME`) > these defaults.
//!
//! The struct/`Default`-then-merge shape follows the teacher's
//! `loop_core::config::Config`; unlike the teacher's `.loop/config`
//! key=value dotfile, spec Section 6 names this file `config.json`, so it is
//! parsed with `serde_json` rather than a line-oriented parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Daemon-wide and per-run configuration (spec Section 6, 4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Assistant executable, overridden by the `CLAUDE_CODE_CLI` env var
    /// (spec Section 6).
    pub claude_cli: String,
    /// Default per-job deadline in seconds (0 = unbounded, spec Section 4.6).
    pub timeout_sec: u32,
    /// `MaxRetries` from spec Section 4.8 (default 3).
    pub max_retries: u32,
    /// Grace period between graceful and forceful termination (spec Section 4.6).
    pub kill_grace_sec: u32,
    /// Log format hint passed through to the ambient logging subsystem.
    pub log_format: String,
    /// Byte cap for captured subprocess output (spec Section 4.6: "a
    /// configurable byte cap").
    pub capture_cap_bytes: usize,
    /// Whether the engine should auto-commit on COMPLETED (spec Section 4.8 step 11).
    pub auto_commit: bool,
    /// Commit author/committer override for the Committer (spec Section 4.9).
    pub commit_identity: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            claude_cli: "claude".to_string(),
            timeout_sec: 600,
            max_retries: 3,
            kill_grace_sec: 10,
            log_format: "text".to_string(),
            capture_cap_bytes: 10 * 1024 * 1024,
            auto_commit: true,
            commit_identity: None,
        }
    }
}

impl Config {
    /// Load config from `config.json`, falling back to defaults for
    /// anything the file omits, and layering environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `CLAUDE_CODE_CLI` / `MORTY_HOME`-derived overrides (spec Section 6).
    ///
    /// `MORTY_HOME` itself doesn't name a `Config` field (it relocates the
    /// global config directory the file is loaded from), so only
    /// `CLAUDE_CODE_CLI` is applied here.
    fn apply_env(&mut self) {
        if let Ok(cli) = std::env::var("CLAUDE_CODE_CLI") {
            if !cli.is_empty() {
                self.claude_cli = cli;
            }
        }
    }

    /// Resolve `$MORTY_HOME`, defaulting to `~/.morty` (spec Section 6).
    pub fn home_dir() -> PathBuf {
        if let Ok(home) = std::env::var("MORTY_HOME") {
            if !home.is_empty() {
                return PathBuf::from(home);
            }
        }
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join(".morty"))
            .unwrap_or_else(|| PathBuf::from(".morty"))
    }

    /// The project's hidden morty directory (spec Section 3, 6): holds
    /// `plan/`, `research/`, `status.json`, `logs/`.
    pub fn project_dir(workspace_root: &Path) -> PathBuf {
        workspace_root.join(".morty")
    }
}
