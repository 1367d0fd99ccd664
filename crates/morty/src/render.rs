//! Terminal output for the morty CLI.
//!
//! Plain `println!` tabular formatting, the same register as the teacher's
//! `loopctl::render`, retargeted from run/step listings to module/job
//! status and rollback history.

use morty_core::{JobState, JobStatus, LoopCommit, ModuleState};

/// Print the status of every module and job (the `status` subcommand).
pub fn print_status(modules: &std::collections::BTreeMap<String, ModuleState>) {
    if modules.is_empty() {
        println!("No modules found under plan/.");
        return;
    }

    println!("{:<20}  {:<10}  {}", "MODULE", "STATUS", "JOBS");
    println!("{}", "-".repeat(70));
    for module in modules.values() {
        println!(
            "{:<20}  {:<10}  {} done / {} total",
            module.name,
            format_status(module.status()),
            module
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Completed)
                .count(),
            module.jobs.len(),
        );
        for (job_name, job_state) in &module.jobs {
            println!(
                "  {:<30}  {:<10}  {}/{} tasks  retries={}",
                job_name,
                format_status(job_state.status),
                job_state.tasks_completed,
                job_state.tasks_total,
                job_state.retry_count,
            );
        }
    }
}

/// Print the outcome of one engine invocation.
pub fn print_job_result(module: &str, job: &str, job_state: Option<&JobState>) {
    match job_state {
        Some(state) => println!(
            "{module}/{job}: {} ({}/{} tasks)",
            format_status(state.status),
            state.tasks_completed,
            state.tasks_total,
        ),
        None => println!("{module}/{job}: no state recorded"),
    }
}

/// Print a selection-blocked report.
pub fn print_blocked(module: &str, job: &str) {
    println!("{module}/{job}: BLOCKED (waiting on an incomplete prerequisite)");
}

/// Print "nothing left to run".
pub fn print_nothing_to_run() {
    println!("Nothing runnable: every job is COMPLETED or BLOCKED.");
}

/// Print the rollback list (newest first).
pub fn print_rollback_list(commits: &[LoopCommit]) {
    if commits.is_empty() {
        println!("No morty checkpoint commits found.");
        return;
    }

    println!(
        "{:<6}  {:<9}  {:<24}  {:<10}  {}",
        "LOOP", "HASH", "JOB", "STATUS", "TIMESTAMP"
    );
    println!("{}", "-".repeat(80));
    for commit in commits {
        println!(
            "{:<6}  {:<9}  {:<24}  {:<10}  {}",
            commit.loop_index,
            truncate(&commit.hash, 9),
            format!("{}/{}", commit.module, commit.job),
            commit.status,
            commit
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

/// Print confirmation of a reset, naming the backup branch it created.
pub fn print_reset_done(hash: &str, backup_branch: &str) {
    println!("Reset to {} complete.", truncate(hash, 9));
    println!("Backup branch: {backup_branch}");
}

fn format_status(status: JobStatus) -> &'static str {
    status.as_str()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        s[..max_len].to_string()
    }
}
