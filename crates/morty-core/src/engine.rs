//! Execution engine: runs one job end-to-end (spec.md Section 4.8).
//!
//! Wires the State Store, Prompt Builder, Process Runner, Result Parser,
//! and Committer together into the single `ExecuteJob(module, job)`
//! sequence, the way the teacher's `loopd::orchestrator` drives one run
//! through its own component chain. Single-threaded with respect to state
//! mutation (spec Section 5): one call drives exactly one job.

use crate::errors::EngineError;
use crate::types::{DebugLogEntry, JobState, JobStatus, Plan, TaskState};
use crate::{commit, machine, prompt, process, result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Everything one `ExecuteJob` call needs beyond the state store itself.
pub struct EngineContext<'a> {
    pub state: &'a crate::state::StateStore,
    pub plan: &'a Plan,
    pub plan_dir: &'a Path,
    pub prompts_dir: &'a Path,
    pub logs_dir: &'a Path,
    pub repo_root: &'a Path,
    pub claude_cli: &'a str,
    pub deadline: Duration,
    pub grace_period: Duration,
    pub capture_cap_bytes: usize,
    pub max_retries: u32,
    pub auto_commit: bool,
    pub commit_identity: Option<&'a str>,
}

/// Outcome of one `ExecuteJob` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// Job was already COMPLETED; no work done (spec Section 4.8, step 2).
    AlreadyCompleted,
    Completed,
    Failed { reason: String },
}

/// Run `module/job` to completion or failure (spec Section 4.8).
pub async fn execute_job(
    ctx: &EngineContext<'_>,
    module: &str,
    job_name: &str,
) -> Result<ExecuteOutcome, EngineError> {
    let job = ctx
        .plan
        .jobs
        .iter()
        .find(|j| j.name == job_name)
        .ok_or_else(|| EngineError::Precondition(format!("no such job {module}/{job_name}")))?;

    // Step 1: load state, resolve JobState (creating one if this is the
    // first time the scheduler has pointed at this job).
    let now = Utc::now();
    let mut job_state = ctx
        .state
        .get_job(module, job_name)?
        .unwrap_or_else(|| JobState::new_pending(job.tasks.len(), now));

    // Step 2: COMPLETED short-circuits with no work.
    if job_state.status == JobStatus::Completed {
        return Ok(ExecuteOutcome::AlreadyCompleted);
    }

    // Prerequisite check (spec Section 2: the engine's first step). Job-scoped
    // selection bypasses the scheduler's own prerequisite skip, so the engine
    // enforces this itself against the state document, independent of any
    // BLOCKED status ever having been persisted.
    if !job.prerequisites.is_empty() {
        for prereq_name in &job.prerequisites {
            let prereq_state = ctx.state.get_job(module, prereq_name)?;
            let completed = prereq_state.map(|s| s.status == JobStatus::Completed).unwrap_or(false);
            if !completed {
                return Err(EngineError::Blocked);
            }
        }
    }

    // Step 3: RUNNING means a crashed prior run; proceed as if freshly
    // selected (no explicit transition needed, we fall through to step 6).

    // Step 4: FAILED retry gating.
    if job_state.status == JobStatus::Failed {
        if job_state.retry_count >= ctx.max_retries {
            return Err(EngineError::MaxRetry);
        }
        job_state.status = machine::transition(JobStatus::Failed, JobStatus::Pending)
            .map_err(EngineError::State)?;
    }

    // Step 5: BLOCKED short-circuits.
    if job_state.status == JobStatus::Blocked {
        return Err(EngineError::Blocked);
    }

    // Step 6: PENDING -> RUNNING, persist, set global cursor.
    if job_state.status == JobStatus::Pending {
        job_state.status = machine::transition(JobStatus::Pending, JobStatus::Running)
            .map_err(EngineError::State)?;
    } else {
        // Crashed RUNNING: stays RUNNING, but loop_count still advances below.
        job_state.status = JobStatus::Running;
    }
    job_state.loop_count += 1;
    job_state.updated_at = Utc::now();
    ctx.state
        .set_job(module, &ctx.plan.file.display().to_string(), job_name, job_state.clone())?;
    ctx.state.set_current(module, job_name, JobStatus::Running)?;

    // Step 7: build the prompt, create the per-job log file.
    let plan_text = std::fs::read_to_string(&ctx.plan.file).unwrap_or_default();
    let completed_jobs_summary = completed_summary(ctx);
    let prompt_ctx = prompt::PromptContext {
        module,
        job,
        job_state: &job_state,
        completed_jobs_summary,
        plan_text: &plan_text,
        plan_dir: ctx.plan_dir,
        prompts_dir: ctx.prompts_dir,
    };
    let rendered_prompt = prompt::build(&prompt_ctx);

    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let log_path = ctx
        .logs_dir
        .join(format!("{module}_{job_name}_{timestamp}.log"));

    // Step 8: invoke the Process Runner.
    let spec = process::ProcessSpec {
        program: ctx.claude_cli.to_string(),
        args: Vec::new(),
        cwd: Some(ctx.repo_root.to_path_buf()),
        env: Vec::new(),
        stdin: Some(rendered_prompt),
        deadline: ctx.deadline,
        grace_period: ctx.grace_period,
        output_mode: process::OutputMode::Capture,
        capture_cap_bytes: ctx.capture_cap_bytes,
        log_path: Some(log_path.clone()),
        log_header: Some(format!("module={module} job={job_name} ts={timestamp}")),
    };

    let outcome = process::run(&spec).await;

    let mut captured_stdout = String::new();
    let run_outcome = match outcome {
        Ok(outcome) => {
            captured_stdout = outcome.stdout.clone();
            match result::parse(&outcome.stdout) {
                Ok(parsed) if parsed.outcome == result::Outcome::Completed => Ok(parsed),
                Ok(parsed) => Err(format!("assistant reported status {}", parsed.raw_status)),
                Err(e) => Err(format!("could not parse assistant output: {e}")),
            }
        }
        Err(e) => Err(format!("process runner failed: {e}")),
    };

    match run_outcome {
        Ok(_) => {
            // Step 10: COMPLETED.
            for slot in job_state.task_status.iter_mut() {
                *slot = TaskState::Completed;
            }
            job_state.tasks_completed = job_state.tasks_total;
            job_state.status = machine::transition(JobStatus::Running, JobStatus::Completed)
                .map_err(EngineError::State)?;
            job_state.failure_reason = None;
            job_state.updated_at = Utc::now();
            ctx.state.set_job(
                module,
                &ctx.plan.file.display().to_string(),
                job_name,
                job_state,
            )?;
            ctx.state.clear_current()?;

            // Step 11: optional auto-commit.
            if ctx.auto_commit {
                match commit::commit(ctx.repo_root, module, job_name, "COMPLETED", ctx.commit_identity) {
                    Ok(Some(hash)) => info!(%hash, "checkpoint committed"),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "checkpoint commit failed, state is unaffected"),
                }
            }

            // Step 12: advance the loop counter.
            bump_total_loops(ctx)?;

            Ok(ExecuteOutcome::Completed)
        }
        Err(reason) => {
            // Step 9: any non-COMPLETED outcome is a failure.
            job_state.status = machine::transition(JobStatus::Running, JobStatus::Failed)
                .map_err(EngineError::State)?;
            job_state.retry_count += 1;
            job_state.failure_reason = Some(reason.clone());
            job_state
                .debug_log
                .push(debug_log_entry(&reason, &captured_stdout));
            job_state.updated_at = Utc::now();
            ctx.state.set_job(
                module,
                &ctx.plan.file.display().to_string(),
                job_name,
                job_state,
            )?;
            ctx.state.clear_current()?;

            bump_total_loops(ctx)?;

            Ok(ExecuteOutcome::Failed { reason })
        }
    }
}

fn bump_total_loops(ctx: &EngineContext<'_>) -> Result<(), EngineError> {
    let mut doc = ctx.state.load()?;
    doc.global.total_loops += 1;
    doc.global.last_update = Utc::now();
    ctx.state.save(&doc)?;
    Ok(())
}

/// Build the structured debug-log entry appended on a surfaced error (spec
/// Section 7). `phenomenon` is the failure reason the engine itself
/// produced; `reproduction` carries any error-looking lines the assistant
/// printed, for a human skimming the log to reproduce the failure.
fn debug_log_entry(reason: &str, stdout: &str) -> DebugLogEntry {
    let error_lines = result::extract_error_lines(stdout);
    DebugLogEntry {
        phenomenon: Some(reason.to_string()),
        reproduction: (!error_lines.is_empty()).then(|| error_lines.join("\n")),
        hypothesis: None,
        verification: None,
        fix: None,
        progress: None,
    }
}

fn completed_summary(ctx: &EngineContext<'_>) -> Vec<String> {
    ctx.plan
        .jobs
        .iter()
        .filter_map(|j| {
            let state = ctx.state.get_job(&ctx.plan.module, &j.name).ok().flatten()?;
            if state.status == JobStatus::Completed {
                Some(format!(
                    "{}/{}: done ({} tasks)",
                    ctx.plan.module, j.name, state.tasks_completed
                ))
            } else {
                None
            }
        })
        .collect()
}
