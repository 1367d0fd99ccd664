//! Rollback facility (spec.md Section 4.10).
//!
//! Lists and resets to prior checkpoint commits, parsed from the
//! commit-subject grammar (spec Section 6). Built on the same `git` CLI
//! shell-out style as `commit.rs` and the teacher's `loopd::git`.

use crate::errors::GitError;
use crate::types::{JobStatus, LoopCommit, StateDocument};
use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use std::process::Command;

/// Parse a commit subject against the morty grammar (spec Section 6):
/// canonical `morty: loop <N> - <module>/<job> - <status>`, or the
/// historical `morty[loop:<N>]: [<module>/<job>: <status>]` form.
pub fn parse_subject(subject: &str) -> Option<LoopCommitSubject> {
    parse_canonical(subject).or_else(|| parse_historical(subject))
}

/// The parsed `{loop_index, module, job, status}` fields of a commit
/// subject, before the hash/timestamp are attached by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopCommitSubject {
    pub loop_index: u64,
    pub module: String,
    pub job: String,
    pub status: String,
}

fn parse_canonical(subject: &str) -> Option<LoopCommitSubject> {
    let rest = subject.strip_prefix("morty: loop ")?;
    let (num_str, rest) = rest.split_once(" - ")?;
    let loop_index: u64 = num_str.trim().parse().ok()?;
    let (module_job, status) = rest.rsplit_once(" - ")?;
    let (module, job) = module_job.split_once('/')?;
    Some(LoopCommitSubject {
        loop_index,
        module: module.to_string(),
        job: job.to_string(),
        status: status.trim().to_string(),
    })
}

fn parse_historical(subject: &str) -> Option<LoopCommitSubject> {
    // `morty[loop:<N>]: [<module>/<job>: <status>]`
    let rest = subject.strip_prefix("morty[loop:")?;
    let (num_str, rest) = rest.split_once(']')?;
    let loop_index: u64 = num_str.trim().parse().ok()?;
    let rest = rest.trim().strip_prefix(':')?.trim();
    let rest = rest.strip_prefix('[')?.strip_suffix(']')?;
    let (module_job, status) = rest.split_once(':')?;
    let (module, job) = module_job.split_once('/')?;
    Some(LoopCommitSubject {
        loop_index,
        module: module.trim().to_string(),
        job: job.trim().to_string(),
        status: status.trim().to_string(),
    })
}

/// List the last `limit` morty commits, newest first (spec Section 4.10: "List").
pub fn list(repo_root: &Path, limit: usize) -> Result<Vec<LoopCommit>, GitError> {
    let output = Command::new("git")
        .args(["log", "--format=%H%x1f%s%x1f%ct"])
        .current_dir(repo_root)
        .output();
    let Ok(output) = output else {
        return Ok(Vec::new());
    };
    if !output.status.success() {
        // No repository, or no commits yet: recovered locally as an empty
        // list (spec Section 7: "no morty commits -> empty list").
        return Ok(Vec::new());
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let mut commits = Vec::new();
    for line in text.lines() {
        let mut fields = line.split('\u{1f}');
        let (Some(hash), Some(subject), Some(ts)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Some(parsed) = parse_subject(subject) else {
            continue;
        };
        let timestamp = ts
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        commits.push(LoopCommit {
            hash: hash.to_string(),
            loop_index: parsed.loop_index,
            module: parsed.module,
            job: parsed.job,
            status: parsed.status,
            timestamp,
        });
        if commits.len() >= limit {
            break;
        }
    }
    Ok(commits)
}

/// `ResetToCommit(hash)` (spec Section 4.10): create a timestamped backup
/// branch, destructively reset to `hash`, then reconcile `state` in place.
pub fn reset_to_commit(
    repo_root: &Path,
    hash: &str,
    state: &mut StateDocument,
    now: DateTime<Utc>,
) -> Result<String, GitError> {
    require_repo(repo_root)?;

    let backup_branch = format!("morty-backup-{}", now.format("%Y%m%dT%H%M%SZ"));
    run_git(repo_root, &["branch", &backup_branch, "HEAD"])?;
    run_git(repo_root, &["reset", "--hard", hash])?;

    let all_commits = list(repo_root, usize::MAX)?;
    let chosen_time = commit_timestamp(repo_root, hash);
    reconcile_state(state, &all_commits, hash, chosen_time.as_deref());

    Ok(backup_branch)
}

/// A rollback reset is a destructive, surfaced operation (spec Section 7:
/// "Surfaced" errors include prerequisite/state violations), so unlike
/// `list`'s tolerant empty-result fallback, resetting against a path with
/// no `.git` reports `GitNotRepo` rather than failing on the first git
/// subcommand with an opaque message.
fn require_repo(repo_root: &Path) -> Result<(), GitError> {
    let output = Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(repo_root)
        .output()
        .map_err(GitError::Io)?;
    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::NotRepo(repo_root.display().to_string()))
    }
}

fn commit_timestamp(repo_root: &Path, hash: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["show", "-s", "--format=%ct", hash])
        .current_dir(repo_root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// For every job whose most-recent morty commit is at or before the
/// chosen commit, keep COMPLETED; otherwise reset to PENDING and zero
/// `tasks_completed` (spec Section 4.10, step 3).
fn reconcile_state(
    state: &mut StateDocument,
    all_commits: &[LoopCommit],
    chosen_hash: &str,
    chosen_time: Option<&str>,
) {
    let chosen_index = all_commits
        .iter()
        .position(|c| c.hash == chosen_hash)
        .unwrap_or(0);
    let _ = chosen_time;

    // `all_commits` is newest-first; commits at index >= chosen_index are
    // at-or-before the chosen commit in history order.
    for module_state in state.modules.values_mut() {
        for (job_name, job_state) in module_state.jobs.iter_mut() {
            let most_recent = all_commits
                .iter()
                .position(|c| &c.module == &module_state.name && &c.job == job_name);
            let keep_completed = most_recent.is_some_and(|idx| idx >= chosen_index);
            if keep_completed {
                job_state.status = JobStatus::Completed;
            } else {
                job_state.status = JobStatus::Pending;
                job_state.tasks_completed = 0;
                for slot in job_state.task_status.iter_mut() {
                    *slot = crate::types::TaskState::Pending;
                }
            }
        }
    }
}

fn run_git(repo_root: &Path, args: &[&str]) -> Result<(), GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()?;
    if !output.status.success() {
        return Err(GitError::Commit(String::from_utf8_lossy(&output.stderr).into_owned()));
    }
    Ok(())
}
