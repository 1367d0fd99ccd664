//! Scheduler: picks the next (module, job) to run (spec.md Section 4.4).
//!
//! A pure function over the parsed plan set and the current state document;
//! it never mutates the store itself. Reset scopes (`restart-*`) return a
//! list of jobs whose state the caller must reset to PENDING before calling
//! `auto`/module-/job-scoped selection again, mirroring the teacher's
//! `loopd::scheduler` split between "what to reset" and "what to run next".

use crate::types::{JobStatus, Plan, SelectionMode, StateDocument};

/// The outcome of a selection: either a job to run, an explicit BLOCKED
/// report (spec Section 4.4: "the scheduler reports that explicitly rather
/// than silently skipping it"), or nothing runnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Run { module: String, job: String },
    Blocked { module: String, job: String },
    Nothing,
}

/// One job identified by its (module, job) pair, carried alongside the
/// prerequisites the scheduler needs cross-module visibility into.
struct Candidate<'a> {
    module: &'a str,
    job: &'a str,
    prerequisites: &'a [String],
}

/// Select the next unit to run. `plans` must already be sorted the way the
/// caller wants modules considered (spec Section 4.4: "modules in the order
/// they first appear across plan files sorted by filename"). `max_retries`
/// is the configured `MaxRetries` ceiling (spec Section 4.4: "FAILED with
/// `retry_count < MaxRetries`"); job-scoped selection ignores it; the
/// engine itself is the final word, the scheduler just avoids re-offering a
/// job the engine would refuse.
pub fn select(
    plans: &[Plan],
    state: &StateDocument,
    mode: &SelectionMode,
    max_retries: u32,
) -> Selection {
    match mode {
        SelectionMode::Auto => select_auto(plans, state, None, max_retries),
        SelectionMode::Module(module) => select_auto(plans, state, Some(module.as_str()), max_retries),
        SelectionMode::Job { module, job } => select_job(state, module, job),
        SelectionMode::RestartAll | SelectionMode::RestartModule(_) | SelectionMode::RestartJob { .. } => {
            // Callers reset via `reset_targets` before calling select again
            // with the corresponding scoped mode; `select` itself treats a
            // restart mode as "nothing decided yet".
            Selection::Nothing
        }
    }
}

/// Jobs that a restart-scoped mode resets to PENDING before rescheduling,
/// as `(module, job)` pairs. The caller is expected to zero each job's
/// `tasks_completed` and reset its `task_status` via the state store, then
/// call `select` again with the corresponding scoped mode
/// (`RestartAll` -> `Auto`, `RestartModule(m)` -> `Module(m)`,
/// `RestartJob{module,job}` -> `Job{module,job}`).
pub fn reset_targets(plans: &[Plan], mode: &SelectionMode) -> Vec<(String, String)> {
    match mode {
        SelectionMode::RestartAll => plans
            .iter()
            .flat_map(|p| p.jobs.iter().map(move |j| (p.module.clone(), j.name.clone())))
            .collect(),
        SelectionMode::RestartModule(module) => plans
            .iter()
            .filter(|p| &p.module == module)
            .flat_map(|p| p.jobs.iter().map(move |j| (p.module.clone(), j.name.clone())))
            .collect(),
        SelectionMode::RestartJob { module, job } => vec![(module.clone(), job.clone())],
        _ => Vec::new(),
    }
}

fn select_auto(
    plans: &[Plan],
    state: &StateDocument,
    only_module: Option<&str>,
    max_retries: u32,
) -> Selection {
    let candidates = flatten_candidates(plans);

    for candidate in &candidates {
        if let Some(only) = only_module {
            if candidate.module != only {
                continue;
            }
        }

        let status = current_status(state, candidate.module, candidate.job);
        let runnable = match status {
            JobStatus::Pending => true,
            JobStatus::Failed => retry_count(state, candidate.module, candidate.job) < max_retries,
            _ => false,
        };
        if !runnable {
            continue;
        }

        if let Some((blocking_module, blocking_job)) =
            unmet_prerequisite(&candidates, state, candidate)
        {
            return Selection::Blocked {
                module: blocking_module,
                job: blocking_job,
            };
        }

        return Selection::Run {
            module: candidate.module.to_string(),
            job: candidate.job.to_string(),
        };
    }
    Selection::Nothing
}

fn select_job(state: &StateDocument, module: &str, job: &str) -> Selection {
    let status = current_status(state, module, job);
    match status {
        JobStatus::Pending | JobStatus::Failed => Selection::Run {
            module: module.to_string(),
            job: job.to_string(),
        },
        _ => Selection::Nothing,
    }
}

fn flatten_candidates(plans: &[Plan]) -> Vec<Candidate<'_>> {
    plans
        .iter()
        .flat_map(|p| {
            p.jobs.iter().map(move |j| Candidate {
                module: p.module.as_str(),
                job: j.name.as_str(),
                prerequisites: j.prerequisites.as_slice(),
            })
        })
        .collect()
}

/// The job's own (module, job) pair if one of its prerequisites, resolved
/// anywhere across the candidate set, is not COMPLETED. Returns that
/// prerequisite's own identity so the caller can report what's blocking.
fn unmet_prerequisite(
    candidates: &[Candidate<'_>],
    state: &StateDocument,
    candidate: &Candidate<'_>,
) -> Option<(String, String)> {
    for prereq_name in candidate.prerequisites {
        let resolved = candidates
            .iter()
            .find(|c| c.job == prereq_name.as_str())
            .map(|c| (c.module.to_string(), c.job.to_string()))
            .unwrap_or_else(|| (candidate.module.to_string(), prereq_name.clone()));
        let status = current_status(state, &resolved.0, &resolved.1);
        if status != JobStatus::Completed {
            return Some((candidate.module.to_string(), candidate.job.to_string()));
        }
    }
    None
}

fn current_status(state: &StateDocument, module: &str, job: &str) -> JobStatus {
    state
        .modules
        .get(module)
        .and_then(|m| m.jobs.get(job))
        .map(|j| j.status)
        .unwrap_or(JobStatus::Pending)
}

fn retry_count(state: &StateDocument, module: &str, job: &str) -> u32 {
    state
        .modules
        .get(module)
        .and_then(|m| m.jobs.get(job))
        .map(|j| j.retry_count)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Job, JobState, Task};
    use chrono::Utc;
    use std::path::PathBuf;

    fn plan_with_jobs(module: &str, jobs: Vec<Job>) -> Plan {
        Plan {
            module: module.to_string(),
            file: PathBuf::from(format!("{module}.md")),
            title: module.to_string(),
            responsibility: None,
            jobs,
        }
    }

    fn job(index: u32, name: &str, prerequisites: Vec<String>) -> Job {
        Job {
            index,
            name: name.to_string(),
            goal: String::new(),
            prerequisites,
            tasks: vec![Task {
                index: 0,
                description: "do it".to_string(),
                done: false,
                nesting: 0,
            }],
            validators: Vec::new(),
            debug_log: Vec::new(),
            completion_marked: false,
        }
    }

    #[test]
    fn auto_picks_first_pending_job() {
        let plans = vec![plan_with_jobs(
            "m",
            vec![job(1, "A", vec![]), job(2, "B", vec![])],
        )];
        let state = StateDocument::new(Utc::now());
        let selection = select(&plans, &state, &SelectionMode::Auto, 3);
        assert_eq!(
            selection,
            Selection::Run {
                module: "m".to_string(),
                job: "A".to_string()
            }
        );
    }

    #[test]
    fn blocked_job_is_reported_not_skipped() {
        let plans = vec![plan_with_jobs(
            "m",
            vec![job(1, "A", vec![]), job(2, "B", vec!["A".to_string()])],
        )];
        let mut state = StateDocument::new(Utc::now());
        let mut a_state = JobState::new_pending(1, Utc::now());
        a_state.status = JobStatus::Running; // A not completed yet
        state
            .modules
            .entry("m".to_string())
            .or_insert_with(|| crate::types::ModuleState::new("m", "m.md"))
            .jobs
            .insert("A".to_string(), a_state);

        // Selecting job-scoped B directly still runs it (job-scoped mode
        // bypasses the auto scan's blocking report).
        let selection = select(
            &plans,
            &state,
            &SelectionMode::Job {
                module: "m".to_string(),
                job: "B".to_string(),
            },
            3,
        );
        assert_eq!(
            selection,
            Selection::Run {
                module: "m".to_string(),
                job: "B".to_string()
            }
        );

        // But auto scanning past A (still running, so not runnable) lands
        // on B and finds it blocked.
        let selection = select(&plans, &state, &SelectionMode::Auto, 3);
        assert_eq!(
            selection,
            Selection::Blocked {
                module: "m".to_string(),
                job: "B".to_string()
            }
        );
    }

    #[test]
    fn completed_jobs_are_skipped_by_auto() {
        let plans = vec![plan_with_jobs("m", vec![job(1, "A", vec![])])];
        let mut state = StateDocument::new(Utc::now());
        let mut a_state = JobState::new_pending(1, Utc::now());
        a_state.status = JobStatus::Completed;
        a_state.tasks_completed = 1;
        state
            .modules
            .entry("m".to_string())
            .or_insert_with(|| crate::types::ModuleState::new("m", "m.md"))
            .jobs
            .insert("A".to_string(), a_state);

        assert_eq!(select(&plans, &state, &SelectionMode::Auto, 3), Selection::Nothing);
    }

    #[test]
    fn module_scoped_ignores_other_modules() {
        let plans = vec![
            plan_with_jobs("m1", vec![job(1, "A", vec![])]),
            plan_with_jobs("m2", vec![job(1, "B", vec![])]),
        ];
        let state = StateDocument::new(Utc::now());
        let selection = select(&plans, &state, &SelectionMode::Module("m2".to_string()), 3);
        assert_eq!(
            selection,
            Selection::Run {
                module: "m2".to_string(),
                job: "B".to_string()
            }
        );
    }

    #[test]
    fn job_scoped_ignores_plan_order() {
        let plans = vec![plan_with_jobs(
            "m",
            vec![job(1, "A", vec![]), job(2, "B", vec![])],
        )];
        let state = StateDocument::new(Utc::now());
        let selection = select(
            &plans,
            &state,
            &SelectionMode::Job {
                module: "m".to_string(),
                job: "B".to_string(),
            },
            3,
        );
        assert_eq!(
            selection,
            Selection::Run {
                module: "m".to_string(),
                job: "B".to_string()
            }
        );
    }

    #[test]
    fn restart_all_targets_every_job() {
        let plans = vec![
            plan_with_jobs("m1", vec![job(1, "A", vec![])]),
            plan_with_jobs("m2", vec![job(1, "B", vec![])]),
        ];
        let targets = reset_targets(&plans, &SelectionMode::RestartAll);
        assert_eq!(
            targets,
            vec![
                ("m1".to_string(), "A".to_string()),
                ("m2".to_string(), "B".to_string())
            ]
        );
    }

    #[test]
    fn restart_module_targets_only_that_module() {
        let plans = vec![
            plan_with_jobs("m1", vec![job(1, "A", vec![])]),
            plan_with_jobs("m2", vec![job(1, "B", vec![])]),
        ];
        let targets = reset_targets(&plans, &SelectionMode::RestartModule("m2".to_string()));
        assert_eq!(targets, vec![("m2".to_string(), "B".to_string())]);
    }

    #[test]
    fn nothing_to_do_when_all_completed() {
        let plans = vec![plan_with_jobs("m", vec![])];
        let state = StateDocument::new(Utc::now());
        assert_eq!(select(&plans, &state, &SelectionMode::Auto, 3), Selection::Nothing);
    }

    #[test]
    fn auto_skips_failed_job_at_or_past_max_retries() {
        let plans = vec![plan_with_jobs("m", vec![job(1, "A", vec![])])];
        let mut state = StateDocument::new(Utc::now());
        let mut a_state = JobState::new_pending(1, Utc::now());
        a_state.status = JobStatus::Failed;
        a_state.retry_count = 3;
        state
            .modules
            .entry("m".to_string())
            .or_insert_with(|| crate::types::ModuleState::new("m", "m.md"))
            .jobs
            .insert("A".to_string(), a_state);

        assert_eq!(select(&plans, &state, &SelectionMode::Auto, 3), Selection::Nothing);
    }

    #[test]
    fn auto_still_offers_failed_job_below_max_retries() {
        let plans = vec![plan_with_jobs("m", vec![job(1, "A", vec![])])];
        let mut state = StateDocument::new(Utc::now());
        let mut a_state = JobState::new_pending(1, Utc::now());
        a_state.status = JobStatus::Failed;
        a_state.retry_count = 2;
        state
            .modules
            .entry("m".to_string())
            .or_insert_with(|| crate::types::ModuleState::new("m", "m.md"))
            .jobs
            .insert("A".to_string(), a_state);

        assert_eq!(
            select(&plans, &state, &SelectionMode::Auto, 3),
            Selection::Run {
                module: "m".to_string(),
                job: "A".to_string()
            }
        );
    }
}
