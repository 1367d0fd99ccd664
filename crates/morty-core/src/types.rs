//! Core data model for the orchestrator kernel.
//!
//! These types mirror the data model in spec.md Section 3: `Plan`, `Job`,
//! `Task` come out of the plan parser; `JobState`, `ModuleState`, and the
//! top-level state document are what the state store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// --- Plan-side types (Section 3, 4.1) ---

/// A single checkbox item within a job block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Stable index within the job (0-based, contiguous).
    pub index: usize,
    /// Task description, text after the checkbox marker.
    pub description: String,
    /// Parsed from `[x]` (case-insensitive) vs `[ ]`.
    pub done: bool,
    /// Indentation nesting level (0 = top-level).
    pub nesting: usize,
}

/// A unit of work the assistant completes in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// The ordinal index parsed from the `Job <N>:` heading.
    pub index: u32,
    /// Stable job name, the heading remainder after `Job <N>:`.
    pub name: String,
    /// One-line goal.
    pub goal: String,
    /// Names of jobs (possibly in other modules) that must be COMPLETED first.
    pub prerequisites: Vec<String>,
    pub tasks: Vec<Task>,
    /// Free-text acceptance criteria repeated back to the assistant.
    pub validators: Vec<String>,
    /// Append-only structured notes already present in the plan file.
    pub debug_log: Vec<String>,
    /// Soft signal: all tasks checked and a trailing status marker was seen.
    pub completion_marked: bool,
}

/// A parsed module: one plan file, its jobs in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Module name (from the `**Module职责**:` line, falling back to file stem).
    pub module: String,
    /// Plan file this was parsed from.
    pub file: PathBuf,
    /// Level-1 heading text.
    pub title: String,
    /// Free text responsibility line, if present.
    pub responsibility: Option<String>,
    pub jobs: Vec<Job>,
}

// --- State-side types (Section 3, 4.2, 4.3) ---

/// Job lifecycle status (spec Section 4.3: the state-machine values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Blocked => "BLOCKED",
        }
    }

    /// Whether this status never transitions further (spec Section 4.3:
    /// `COMPLETED -> anything` is disallowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-task status mirrored in the state document (Section 3: `per-task status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Completed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }
}

/// Per-job progress record, as stored in the state document (Section 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    #[serde(default)]
    pub task_status: Vec<TaskState>,
    /// Increments each time the engine runs this job.
    #[serde(default)]
    pub loop_count: u32,
    /// Increments on each transition into FAILED.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Structured notes the engine appends when it surfaces an error (spec
    /// Section 7: "appends a structured entry to the job's debug log when
    /// it surfaces an error"). Append-only; never pruned.
    #[serde(default)]
    pub debug_log: Vec<DebugLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    /// A freshly-pending job state for a job first seen by the scheduler.
    pub fn new_pending(tasks_total: usize, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Pending,
            tasks_total,
            tasks_completed: 0,
            task_status: vec![TaskState::Pending; tasks_total],
            loop_count: 0,
            retry_count: 0,
            failure_reason: None,
            debug_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derived overall status of a module (Section 3: "COMPLETED iff all jobs
/// COMPLETED, otherwise the dominant non-terminal status").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleState {
    pub name: String,
    /// Plan-file basename this module was parsed from.
    pub plan_file: String,
    pub jobs: BTreeMap<String, JobState>,
}

impl ModuleState {
    pub fn new(name: impl Into<String>, plan_file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plan_file: plan_file.into(),
            jobs: BTreeMap::new(),
        }
    }

    /// Derived status: COMPLETED iff every job is COMPLETED; else the
    /// "dominant" non-terminal status among RUNNING > FAILED > BLOCKED >
    /// PENDING, in that priority order.
    pub fn status(&self) -> JobStatus {
        if self.jobs.is_empty() {
            return JobStatus::Pending;
        }
        if self.jobs.values().all(|j| j.status == JobStatus::Completed) {
            return JobStatus::Completed;
        }
        for candidate in [
            JobStatus::Running,
            JobStatus::Failed,
            JobStatus::Blocked,
            JobStatus::Pending,
        ] {
            if self.jobs.values().any(|j| j.status == candidate) {
                return candidate;
            }
        }
        JobStatus::Pending
    }
}

/// Global cursor fields of the state document (Section 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    pub status: JobStatus,
    pub current_module: Option<String>,
    pub current_job: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub total_loops: u64,
}

impl GlobalState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Pending,
            current_module: None,
            current_job: None,
            start_time: now,
            last_update: now,
            total_loops: 0,
        }
    }

    pub fn set_current(&mut self, module: &str, job: &str, status: JobStatus) {
        self.current_module = Some(module.to_string());
        self.current_job = Some(job.to_string());
        self.status = status;
    }

    pub fn clear_current(&mut self) {
        self.current_module = None;
        self.current_job = None;
        self.status = JobStatus::Pending;
    }
}

/// The durable state document: `{version, global, modules}` (Section 3, 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: String,
    pub global: GlobalState,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleState>,
    /// Fields the kernel doesn't know about are preserved on save
    /// (spec Section 6: "Unknown fields are preserved on save").
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub const STATE_VERSION: &str = "1.0";

impl StateDocument {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            global: GlobalState::new(now),
            modules: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A checkpoint commit decoded from the commit-subject grammar (Section 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopCommit {
    pub hash: String,
    pub loop_index: u64,
    pub module: String,
    pub job: String,
    /// `COMPLETED` or `FAILED`.
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A structured debug-log entry the engine appends on a surfaced error
/// (spec Section 7: "fields `phenomenon, reproduction, hypothesis,
/// verification, fix, progress` (all optional strings)").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugLogEntry {
    pub phenomenon: Option<String>,
    pub reproduction: Option<String>,
    pub hypothesis: Option<String>,
    pub verification: Option<String>,
    pub fix: Option<String>,
    pub progress: Option<String>,
}

/// Scheduler selection mode (spec Section 4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionMode {
    Auto,
    Module(String),
    Job { module: String, job: String },
    RestartAll,
    RestartModule(String),
    RestartJob { module: String, job: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Running).unwrap(),
            "\"RUNNING\""
        );
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"BLOCKED\"").unwrap(),
            JobStatus::Blocked
        );
    }

    #[test]
    fn completed_is_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }

    #[test]
    fn module_state_status_all_completed() {
        let mut m = ModuleState::new("m", "m.md");
        let now = Utc::now();
        let mut js = JobState::new_pending(1, now);
        js.status = JobStatus::Completed;
        js.tasks_completed = 1;
        m.jobs.insert("Hello".into(), js);
        assert_eq!(m.status(), JobStatus::Completed);
    }

    #[test]
    fn module_state_status_dominant_non_terminal() {
        let mut m = ModuleState::new("m", "m.md");
        let now = Utc::now();
        m.jobs
            .insert("A".into(), JobState::new_pending(1, now));
        let mut running = JobState::new_pending(1, now);
        running.status = JobStatus::Running;
        m.jobs.insert("B".into(), running);
        assert_eq!(m.status(), JobStatus::Running);
    }

    #[test]
    fn module_state_status_empty_is_pending() {
        let m = ModuleState::new("m", "m.md");
        assert_eq!(m.status(), JobStatus::Pending);
    }
}
