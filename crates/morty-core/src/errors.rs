//! Flat error taxonomy for the orchestrator kernel (spec.md Section 7).
//!
//! Each component gets its own `thiserror` enum, matching the teacher's
//! per-module `XxxError` convention. `MortyError` unifies them at the
//! boundary the CLI binary talks to, the way the teacher's daemon exposes a
//! single `AppResult` to its HTTP handlers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error reading state document: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse state document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("state document is corrupted: {0}")]
    Corrupted(String),
    #[error("invalid state transition: {from} -> {to}")]
    Transition { from: String, to: String },
    #[error("no such job recorded in state: {0}")]
    NotFound(String),
}

impl StateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Parse(_) => "StateParse",
            Self::Corrupted(_) => "StateCorrupted",
            Self::Transition { .. } => "StateTransition",
            Self::NotFound(_) => "StateNotFound",
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan file not found: {0}")]
    FileNotFound(String),
    #[error("failed to parse plan file: {0}")]
    Parse(String),
    #[error("no jobs found in plan")]
    NoJobs,
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound(_) => "ParserFileNotFound",
            Self::Parse(_) => "ParserParse",
            Self::NoJobs => "ParserNoJobs",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("assistant executable not found: {0}")]
    NotFound(String),
    #[error("assistant call exceeded its deadline (timeout after {0} seconds)")]
    Timeout(u32),
    #[error("assistant call was killed: {0}")]
    Killed(String),
    #[error("io error spawning assistant: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "CallCLINotFound",
            Self::Timeout(_) => "CallCLITimeout",
            Self::Killed(_) => "CallCLIKilled",
            Self::Io(_) => "CallCLINotFound",
        }
    }
}

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("could not extract a completion marker from output: {0}")]
    Parse(String),
}

impl ResultError {
    pub fn code(&self) -> &'static str {
        "ResultParse"
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotRepo(String),
    #[error("git commit failed: {0}")]
    Commit(String),
    #[error("io error running git: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotRepo(_) => "GitNotRepo",
            Self::Commit(_) | Self::Io(_) => "GitCommit",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("max retries exhausted")]
    MaxRetry,
    #[error("job is blocked on incomplete prerequisites")]
    Blocked,
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Result(#[from] ResultError),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Precondition(_) => "ExecutorPrecondition",
            Self::MaxRetry => "ExecutorMaxRetry",
            Self::Blocked => "ExecutorBlocked",
            Self::State(e) => e.code(),
            Self::Process(e) => e.code(),
            Self::Result(e) => e.code(),
        }
    }
}

/// Top-level error type unifying every component, carrying a stable code,
/// a human message, and the originating component name (spec Section 7:
/// "All surfaced errors carry a stable code, a human-readable message, an
/// originating component name, and optionally a wrapped cause").
#[derive(Debug, Error)]
pub enum MortyError {
    #[error("[state] {0}")]
    State(#[from] StateError),
    #[error("[parser] {0}")]
    Plan(#[from] PlanError),
    #[error("[process] {0}")]
    Process(#[from] ProcessError),
    #[error("[result] {0}")]
    Result(#[from] ResultError),
    #[error("[git] {0}")]
    Git(#[from] GitError),
    #[error("[engine] {0}")]
    Engine(#[from] EngineError),
}

impl MortyError {
    /// The stable identifier from spec Section 7's flat taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::State(e) => e.code(),
            Self::Plan(e) => e.code(),
            Self::Process(e) => e.code(),
            Self::Result(e) => e.code(),
            Self::Git(e) => e.code(),
            Self::Engine(e) => e.code(),
        }
    }

    /// The originating component name.
    pub fn component(&self) -> &'static str {
        match self {
            Self::State(_) => "state_store",
            Self::Plan(_) => "plan_parser",
            Self::Process(_) => "process_runner",
            Self::Result(_) => "result_parser",
            Self::Git(_) => "committer",
            Self::Engine(_) => "engine",
        }
    }
}
