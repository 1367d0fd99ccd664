//! Checkpoint Committer (spec.md Section 4.9).
//!
//! Shells out to the `git` binary the same way the teacher's `loopd::git`
//! does (`Command::new("git").args([...]).current_dir(...).output()`), but
//! synthesizes the morty commit-subject grammar instead of the teacher's
//! worktree/merge machinery, which has no counterpart in this spec.

use crate::errors::GitError;
use std::path::Path;
use std::process::Command;

/// One accepted historical rendering of the subject grammar plus the
/// canonical one emitted on write (spec Section 6: "the parser accepts
/// both on read and emits the canonical one").
pub const CANONICAL_PREFIX: &str = "morty: loop";

/// A short change summary appended to the commit body (spec Section 4.9:
/// "files added/modified/deleted, lines added/deleted").
#[derive(Debug, Clone, Default)]
pub struct ChangeSummary {
    pub files_added: u32,
    pub files_modified: u32,
    pub files_deleted: u32,
    pub lines_added: u32,
    pub lines_deleted: u32,
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} file(s) added, {} modified, {} deleted; +{} -{} lines",
            self.files_added, self.files_modified, self.files_deleted, self.lines_added, self.lines_deleted
        )
    }
}

/// `Commit(module, job, status) -> commit_hash | no-op` (spec Section 4.9).
pub fn commit(
    repo_root: &Path,
    module: &str,
    job: &str,
    status: &str,
    identity: Option<&str>,
) -> Result<Option<String>, GitError> {
    ensure_repo(repo_root)?;

    if is_clean(repo_root)? {
        return Ok(None);
    }

    let summary = diff_summary(repo_root)?;

    run_git(repo_root, &["add", "-A"])?;

    let loop_index = next_loop_index(repo_root)?;
    let subject = format!("{CANONICAL_PREFIX} {loop_index} - {module}/{job} - {status}");
    let body = summary.to_string();
    let message = format!("{subject}\n\n{body}\n");

    let mut args = vec!["commit".to_string(), "-m".to_string(), message];
    if let Some(identity) = identity {
        if let Some((name, email)) = identity.split_once('<') {
            let name = name.trim();
            let email = email.trim_end_matches('>').trim();
            args.push(format!("--author={name} <{email}>"));
        }
    }
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run_git(repo_root, &arg_refs)?;

    hash_of_head(repo_root).map(Some)
}

fn ensure_repo(repo_root: &Path) -> Result<(), GitError> {
    if repo_root.join(".git").exists() {
        return Ok(());
    }
    let output = Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(repo_root)
        .output()?;
    if output.status.success() {
        return Ok(());
    }
    run_git(repo_root, &["init"])?;
    Ok(())
}

fn is_clean(repo_root: &Path) -> Result<bool, GitError> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(repo_root)
        .output()?;
    Ok(output.stdout.is_empty())
}

fn diff_summary(repo_root: &Path) -> Result<ChangeSummary, GitError> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(repo_root)
        .output()?;
    let status_text = String::from_utf8_lossy(&output.stdout);
    let mut summary = ChangeSummary::default();
    for line in status_text.lines() {
        let code = line.get(0..2).unwrap_or("");
        if code.contains('?') || code.starts_with('A') {
            summary.files_added += 1;
        } else if code.starts_with('D') {
            summary.files_deleted += 1;
        } else {
            summary.files_modified += 1;
        }
    }

    let diff_stat = Command::new("git")
        .args(["diff", "--numstat", "HEAD"])
        .current_dir(repo_root)
        .output();
    if let Ok(diff_stat) = diff_stat {
        let text = String::from_utf8_lossy(&diff_stat.stdout);
        for line in text.lines() {
            let mut cols = line.split_whitespace();
            if let (Some(added), Some(deleted)) = (cols.next(), cols.next()) {
                summary.lines_added += added.parse().unwrap_or(0);
                summary.lines_deleted += deleted.parse().unwrap_or(0);
            }
        }
    }

    Ok(summary)
}

/// One greater than the highest `loop_index` found in commit subjects
/// matching the morty pattern, or zero if none exist.
fn next_loop_index(repo_root: &Path) -> Result<u64, GitError> {
    let output = Command::new("git")
        .args(["log", "--format=%s"])
        .current_dir(repo_root)
        .output();
    let Ok(output) = output else {
        return Ok(0);
    };
    if !output.status.success() {
        return Ok(0);
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let max = text
        .lines()
        .filter_map(crate::rollback::parse_subject)
        .map(|parsed| parsed.loop_index)
        .max();
    Ok(max.map_or(0, |m| m + 1))
}

fn hash_of_head(repo_root: &Path) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()?;
    if !output.status.success() {
        return Err(GitError::Commit(String::from_utf8_lossy(&output.stderr).into_owned()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
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
