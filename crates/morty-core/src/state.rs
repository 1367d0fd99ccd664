//! Durable state store (spec.md Section 4.2).
//!
//! Persists a single `StateDocument` as `status.json` under the project's
//! `.morty` directory, written atomically (tmp file + rename) the way the
//! teacher's `loopd::storage` commits a SQLite transaction before returning.
//! Unlike the teacher, which keeps runs in SQLite, spec Section 6 pins the
//! on-disk format to one JSON document, so this store talks to the
//! filesystem directly instead of through `sqlx`.

use crate::errors::StateError;
use crate::types::{GlobalState, JobState, ModuleState, StateDocument, STATE_VERSION};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Loads, mutates, and atomically persists the state document at a fixed
/// path (spec Section 4.2: `Load`, `Save`, `Backup`, and the job/current
/// accessors).
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// `path` is typically `<project>/.morty/status.json`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or synthesize a fresh one if the file doesn't
    /// exist yet (spec Section 4.2: first run has no state document).
    pub fn load(&self) -> Result<StateDocument, StateError> {
        if !self.path.exists() {
            return Ok(StateDocument::new(Utc::now()));
        }
        let content = std::fs::read_to_string(&self.path)?;
        let doc: StateDocument = serde_json::from_str(&content).map_err(|e| {
            StateError::Corrupted(format!("{}: {e}", self.path.display()))
        })?;
        if doc.version != STATE_VERSION {
            return Err(StateError::Corrupted(format!(
                "unsupported state document version {:?} (expected {STATE_VERSION:?})",
                doc.version
            )));
        }
        Ok(doc)
    }

    /// Persist `doc` atomically: write to a sibling tmp file, then rename
    /// over the real path, so a crash mid-write never leaves a truncated
    /// `status.json` (spec Section 4.2, Section 8 property P7).
    pub fn save(&self, doc: &StateDocument) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(doc)?;
        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| format!("{}.tmp", n.to_string_lossy()))
            .unwrap_or_else(|| "status.json.tmp".to_string());
        self.path.with_file_name(file_name)
    }

    /// Copy the current document to a timestamped backup file alongside it
    /// (spec Section 4.2: `Backup`). If a backup with that timestamp
    /// already exists, a numeric suffix is appended until a free name is
    /// found.
    pub fn backup(&self) -> Result<PathBuf, StateError> {
        let doc = self.load()?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "status".to_string());
        let ext = self
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "json".to_string());

        let mut candidate = self
            .path
            .with_file_name(format!("{stem}.{stamp}.{ext}"));
        let mut suffix = 1u32;
        while candidate.exists() {
            candidate = self
                .path
                .with_file_name(format!("{stem}.{stamp}-{suffix}.{ext}"));
            suffix += 1;
        }
        let serialized = serde_json::to_string_pretty(&doc)?;
        std::fs::write(&candidate, serialized)?;
        Ok(candidate)
    }

    /// Fetch a single job's state, if the module/job are known.
    pub fn get_job(&self, module: &str, job: &str) -> Result<Option<JobState>, StateError> {
        let doc = self.load()?;
        Ok(doc
            .modules
            .get(module)
            .and_then(|m| m.jobs.get(job))
            .cloned())
    }

    /// Insert or replace a job's state, creating the module entry if this
    /// is the first job seen for it, then persist.
    pub fn set_job(
        &self,
        module: &str,
        plan_file: &str,
        job: &str,
        state: JobState,
    ) -> Result<(), StateError> {
        let mut doc = self.load()?;
        let module_state = doc
            .modules
            .entry(module.to_string())
            .or_insert_with(|| ModuleState::new(module, plan_file));
        module_state.jobs.insert(job.to_string(), state);
        doc.global.last_update = Utc::now();
        self.save(&doc)
    }

    /// Mark one task within a job's `task_status` vector, recomputing
    /// `tasks_completed`.
    pub fn update_task_status(
        &self,
        module: &str,
        job: &str,
        task_index: usize,
        completed: bool,
    ) -> Result<(), StateError> {
        let mut doc = self.load()?;
        let job_state = doc
            .modules
            .get_mut(module)
            .and_then(|m| m.jobs.get_mut(job))
            .ok_or_else(|| StateError::NotFound(format!("{module}/{job}")))?;
        if let Some(slot) = job_state.task_status.get_mut(task_index) {
            *slot = if completed {
                crate::types::TaskState::Completed
            } else {
                crate::types::TaskState::Pending
            };
        }
        job_state.tasks_completed = job_state
            .task_status
            .iter()
            .filter(|t| matches!(t, crate::types::TaskState::Completed))
            .count();
        job_state.updated_at = Utc::now();
        doc.global.last_update = Utc::now();
        self.save(&doc)
    }

    /// Read the global cursor (current module/job/status).
    pub fn get_current(&self) -> Result<GlobalState, StateError> {
        Ok(self.load()?.global)
    }

    /// Point the global cursor at a module/job and persist.
    pub fn set_current(
        &self,
        module: &str,
        job: &str,
        status: crate::types::JobStatus,
    ) -> Result<(), StateError> {
        let mut doc = self.load()?;
        doc.global.set_current(module, job, status);
        doc.global.last_update = Utc::now();
        self.save(&doc)
    }

    /// Clear the global cursor, e.g. when no runnable job remains.
    pub fn clear_current(&self) -> Result<(), StateError> {
        let mut doc = self.load()?;
        doc.global.clear_current();
        doc.global.last_update = Utc::now();
        self.save(&doc)
    }
}
