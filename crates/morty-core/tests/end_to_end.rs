//! End-to-end scenarios from spec.md Section 8 (S1, S2, S3, S5, S6), driving
//! the real scheduler + engine + state store + committer together against a
//! temporary git repository and a stub assistant shell script, the way the
//! teacher's `loopd` integration test drives its router end-to-end instead
//! of unit-testing handlers in isolation.

use chrono::Utc;
use morty_core::types::{JobStatus, SelectionMode};
use morty_core::{engine, plan, scheduler, EngineError, StateStore};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

fn init_repo(dir: &Path) {
    for args in [
        vec!["init"],
        vec!["config", "user.email", "morty@example.com"],
        vec!["config", "user.name", "Morty"],
    ] {
        let status = Command::new("git").args(&args).current_dir(dir).status().unwrap();
        assert!(status.success());
    }
    std::fs::write(dir.join("README.md"), "seed\n").unwrap();
    Command::new("git").args(["add", "-A"]).current_dir(dir).status().unwrap();
    Command::new("git")
        .args(["commit", "-m", "initial"])
        .current_dir(dir)
        .status()
        .unwrap();
}

fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }
    path
}

fn last_subject(dir: &Path) -> String {
    let output = Command::new("git")
        .args(["log", "-1", "--format=%s"])
        .current_dir(dir)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit_count(dir: &Path) -> usize {
    let output = Command::new("git")
        .args(["rev-list", "--count", "HEAD"])
        .current_dir(dir)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().parse().unwrap()
}

/// S1 — happy single-job run: stub writes hello.py and reports COMPLETED.
#[tokio::test]
async fn s1_happy_single_job_run() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let plan_file = dir.path().join("m.md");
    std::fs::write(
        &plan_file,
        "# Module m\n\n### Job 1: Hello\nTasks:\n- [ ] print hello\n",
    )
    .unwrap();
    let outcome = plan::parse_file(&plan_file).unwrap();
    let prompts_dir = dir.path().join("prompts");
    let logs_dir = dir.path().join("logs");
    std::fs::create_dir_all(&prompts_dir).unwrap();
    std::fs::create_dir_all(&logs_dir).unwrap();

    let stub = write_stub(
        dir.path(),
        "stub.sh",
        "#!/bin/sh\ncat >/dev/null\ncd \"$(dirname \"$0\")\"\necho 'print(\"hello\")' > hello.py\necho '<!-- RALPH_STATUS -->'\necho '{\"status\": \"COMPLETED\", \"module\": \"m\", \"job\": \"Hello\", \"tasks_total\": 1, \"tasks_completed\": 1}'\necho '<!-- END_RALPH_STATUS -->'\n",
    );

    let store = StateStore::new(dir.path().join("status.json"));
    let ctx = engine::EngineContext {
        state: &store,
        plan: &outcome.plan,
        plan_dir: dir.path(),
        prompts_dir: &prompts_dir,
        logs_dir: &logs_dir,
        repo_root: dir.path(),
        claude_cli: stub.to_str().unwrap(),
        deadline: Duration::ZERO,
        grace_period: Duration::from_millis(200),
        capture_cap_bytes: 1024 * 1024,
        max_retries: 3,
        auto_commit: true,
        commit_identity: None,
    };

    let result = engine::execute_job(&ctx, "m", "Hello").await.unwrap();
    assert_eq!(result, engine::ExecuteOutcome::Completed);

    assert!(dir.path().join("hello.py").exists());

    let job = store.get_job("m", "Hello").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.tasks_completed, 1);

    assert_eq!(commit_count(dir.path()), 2);
    assert_eq!(last_subject(dir.path()), "morty: loop 1 - m/Hello - COMPLETED");
}

/// S2 — failure then retry: stub fails the first call, completes the second.
#[tokio::test]
async fn s2_failure_then_retry_succeeds() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let plan_file = dir.path().join("m.md");
    std::fs::write(
        &plan_file,
        "# Module m\n\n### Job 1: Hello\nTasks:\n- [ ] print hello\n",
    )
    .unwrap();
    let outcome = plan::parse_file(&plan_file).unwrap();
    let prompts_dir = dir.path().join("prompts");
    let logs_dir = dir.path().join("logs");
    std::fs::create_dir_all(&prompts_dir).unwrap();
    std::fs::create_dir_all(&logs_dir).unwrap();

    let counter_file = dir.path().join("calls");
    let stub_body = format!(
        "#!/bin/sh\ncat >/dev/null\ncounter_file=\"{}\"\ncount=$(cat \"$counter_file\" 2>/dev/null || echo 0)\ncount=$((count + 1))\necho \"$count\" > \"$counter_file\"\nif [ \"$count\" -eq 1 ]; then\n  echo '<!-- RALPH_STATUS -->'\n  echo '{{\"status\": \"FAILED\", \"module\": \"m\", \"job\": \"Hello\"}}'\n  echo '<!-- END_RALPH_STATUS -->'\nelse\n  echo '<!-- RALPH_STATUS -->'\n  echo '{{\"status\": \"COMPLETED\", \"module\": \"m\", \"job\": \"Hello\"}}'\n  echo '<!-- END_RALPH_STATUS -->'\nfi\n",
        counter_file.display()
    );
    let stub = write_stub(dir.path(), "stub.sh", &stub_body);

    let store = StateStore::new(dir.path().join("status.json"));
    let ctx = engine::EngineContext {
        state: &store,
        plan: &outcome.plan,
        plan_dir: dir.path(),
        prompts_dir: &prompts_dir,
        logs_dir: &logs_dir,
        repo_root: dir.path(),
        claude_cli: stub.to_str().unwrap(),
        deadline: Duration::ZERO,
        grace_period: Duration::from_millis(200),
        capture_cap_bytes: 1024 * 1024,
        max_retries: 3,
        auto_commit: true,
        commit_identity: None,
    };

    let first = engine::execute_job(&ctx, "m", "Hello").await.unwrap();
    assert!(matches!(first, engine::ExecuteOutcome::Failed { .. }));
    let job = store.get_job("m", "Hello").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 1);
    assert_eq!(commit_count(dir.path()), 1, "a failed run produces no commit");

    let second = engine::execute_job(&ctx, "m", "Hello").await.unwrap();
    assert_eq!(second, engine::ExecuteOutcome::Completed);
    let job = store.get_job("m", "Hello").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 1, "retry_count is not reset on eventual success");
    assert_eq!(commit_count(dir.path()), 2);
}

/// S3 — prerequisite block: invoking the engine directly on a job whose
/// prerequisite isn't COMPLETED returns ExecutorBlocked, without running the
/// assistant, transitioning state, or producing a commit. Job-scoped
/// selection bypasses the scheduler's own prerequisite skip, so this has to
/// hold at the engine level, not just in `scheduler::select`.
#[tokio::test]
async fn s3_prerequisite_block_is_reported() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let plan_file = dir.path().join("m.md");
    std::fs::write(
        &plan_file,
        "# Module m\n\n### Job 1: A\nTasks:\n- [ ] do a\n\n### Job 2: B\nPrerequisites:\n- A\n\nTasks:\n- [ ] do b\n",
    )
    .unwrap();
    let outcome = plan::parse_file(&plan_file).unwrap();
    let prompts_dir = dir.path().join("prompts");
    let logs_dir = dir.path().join("logs");
    std::fs::create_dir_all(&prompts_dir).unwrap();
    std::fs::create_dir_all(&logs_dir).unwrap();

    let store = StateStore::new(dir.path().join("status.json"));
    let commits_before = commit_count(dir.path());

    let ctx = engine::EngineContext {
        state: &store,
        plan: &outcome.plan,
        plan_dir: dir.path(),
        prompts_dir: &prompts_dir,
        logs_dir: &logs_dir,
        repo_root: dir.path(),
        claude_cli: "definitely-not-a-real-binary-xyz",
        deadline: Duration::ZERO,
        grace_period: Duration::from_millis(200),
        capture_cap_bytes: 1024 * 1024,
        max_retries: 3,
        auto_commit: true,
        commit_identity: None,
    };

    let err = engine::execute_job(&ctx, "m", "B").await.unwrap_err();
    assert!(matches!(err, EngineError::Blocked));

    let job = store.get_job("m", "B").unwrap();
    assert!(
        job.map(|j| j.status == JobStatus::Pending).unwrap_or(true),
        "B's status remains PENDING; the engine never persists a blocked job as RUNNING"
    );
    assert_eq!(commit_count(dir.path()), commits_before, "a blocked job produces no commit");
}

/// S4 — timeout: stub sleeps past the deadline without ever emitting a
/// marker. Expected: the process is terminated, the job is FAILED with a
/// timeout/deadline reason, and no commit is produced.
#[tokio::test]
async fn s4_timeout_terminates_and_fails_job() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let plan_file = dir.path().join("m.md");
    std::fs::write(
        &plan_file,
        "# Module m\n\n### Job 1: Hello\nTasks:\n- [ ] print hello\n",
    )
    .unwrap();
    let outcome = plan::parse_file(&plan_file).unwrap();
    let prompts_dir = dir.path().join("prompts");
    let logs_dir = dir.path().join("logs");
    std::fs::create_dir_all(&prompts_dir).unwrap();
    std::fs::create_dir_all(&logs_dir).unwrap();

    let stub = write_stub(dir.path(), "stub.sh", "#!/bin/sh\ncat >/dev/null\nsleep 5\n");

    let store = StateStore::new(dir.path().join("status.json"));
    let commits_before = commit_count(dir.path());
    let ctx = engine::EngineContext {
        state: &store,
        plan: &outcome.plan,
        plan_dir: dir.path(),
        prompts_dir: &prompts_dir,
        logs_dir: &logs_dir,
        repo_root: dir.path(),
        claude_cli: stub.to_str().unwrap(),
        deadline: Duration::from_millis(100),
        grace_period: Duration::from_millis(100),
        capture_cap_bytes: 1024 * 1024,
        max_retries: 3,
        auto_commit: true,
        commit_identity: None,
    };

    let result = engine::execute_job(&ctx, "m", "Hello").await.unwrap();
    match result {
        engine::ExecuteOutcome::Failed { reason } => {
            assert!(
                reason.to_lowercase().contains("timeout") || reason.to_lowercase().contains("deadline"),
                "unexpected failure reason: {reason}"
            );
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    let job = store.get_job("m", "Hello").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(commit_count(dir.path()), commits_before, "a timed-out run produces no commit");
}

/// S5 — rollback to the first of two checkpoint commits.
#[tokio::test]
async fn s5_rollback_resets_later_job_keeps_earlier() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let plan_file = dir.path().join("m.md");
    std::fs::write(
        &plan_file,
        "# Module m\n\n### Job 1: Hello\nTasks:\n- [ ] a\n\n### Job 2: World\nTasks:\n- [ ] b\n",
    )
    .unwrap();
    let outcome = plan::parse_file(&plan_file).unwrap();
    let prompts_dir = dir.path().join("prompts");
    let logs_dir = dir.path().join("logs");
    std::fs::create_dir_all(&prompts_dir).unwrap();
    std::fs::create_dir_all(&logs_dir).unwrap();

    let stub_hello = write_stub(
        dir.path(),
        "stub_hello.sh",
        "#!/bin/sh\ncat >/dev/null\ncd \"$(dirname \"$0\")\"\necho hi > hello.txt\necho '<!-- RALPH_STATUS -->'\necho '{\"status\": \"COMPLETED\", \"module\": \"m\", \"job\": \"Hello\"}'\necho '<!-- END_RALPH_STATUS -->'\n",
    );
    let stub_world = write_stub(
        dir.path(),
        "stub_world.sh",
        "#!/bin/sh\ncat >/dev/null\ncd \"$(dirname \"$0\")\"\necho world > world.txt\necho '<!-- RALPH_STATUS -->'\necho '{\"status\": \"COMPLETED\", \"module\": \"m\", \"job\": \"World\"}'\necho '<!-- END_RALPH_STATUS -->'\n",
    );

    let store = StateStore::new(dir.path().join("status.json"));

    let ctx_hello = engine::EngineContext {
        state: &store,
        plan: &outcome.plan,
        plan_dir: dir.path(),
        prompts_dir: &prompts_dir,
        logs_dir: &logs_dir,
        repo_root: dir.path(),
        claude_cli: stub_hello.to_str().unwrap(),
        deadline: Duration::ZERO,
        grace_period: Duration::from_millis(200),
        capture_cap_bytes: 1024 * 1024,
        max_retries: 3,
        auto_commit: true,
        commit_identity: None,
    };
    engine::execute_job(&ctx_hello, "m", "Hello").await.unwrap();
    let first_hash = {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    };

    let ctx_world = engine::EngineContext {
        claude_cli: stub_world.to_str().unwrap(),
        ..ctx_hello
    };
    engine::execute_job(&ctx_world, "m", "World").await.unwrap();

    let mut doc = store.load().unwrap();
    let backup_branch =
        morty_core::rollback::reset_to_commit(dir.path(), &first_hash, &mut doc, Utc::now()).unwrap();
    store.save(&doc).unwrap();

    assert!(!dir.path().join("world.txt").exists());
    assert!(dir.path().join("hello.txt").exists());
    assert_eq!(doc.modules["m"].jobs["Hello"].status, JobStatus::Completed);
    assert_eq!(doc.modules["m"].jobs["World"].status, JobStatus::Pending);
    assert_eq!(doc.modules["m"].jobs["World"].tasks_completed, 0);
    assert!(backup_branch.starts_with("morty-backup-"));
}

/// S6 — restart-module resets a COMPLETED job to PENDING without touching
/// git history, and the scheduler re-selects it afterward.
#[test]
fn s6_restart_module_resets_without_touching_history() {
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let plan_file = dir.path().join("m.md");
    std::fs::write(
        &plan_file,
        "# Module m\n\n### Job 1: Hello\nTasks:\n- [ ] a\n",
    )
    .unwrap();
    let outcome = plan::parse_file(&plan_file).unwrap();
    let plans = vec![outcome.plan];

    let store = StateStore::new(dir.path().join("status.json"));
    let mut job_state = morty_core::types::JobState::new_pending(1, Utc::now());
    job_state.status = JobStatus::Completed;
    job_state.tasks_completed = 1;
    store
        .set_job("m", &plan_file.display().to_string(), "Hello", job_state)
        .unwrap();

    let commits_before = commit_count(dir.path());

    let mode = SelectionMode::RestartModule("m".to_string());
    let targets = scheduler::reset_targets(&plans, &mode);
    assert_eq!(targets, vec![("m".to_string(), "Hello".to_string())]);
    for (module, job) in targets {
        let mut state = store.get_job(&module, &job).unwrap().unwrap();
        state.status = JobStatus::Pending;
        state.tasks_completed = 0;
        store
            .set_job(&module, &plan_file.display().to_string(), &job, state)
            .unwrap();
    }

    let job = store.get_job("m", "Hello").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.tasks_completed, 0);
    assert_eq!(commit_count(dir.path()), commits_before, "restart never touches git history");

    let doc = store.load().unwrap();
    let selection = scheduler::select(&plans, &doc, &SelectionMode::Module("m".to_string()), 3);
    assert_eq!(
        selection,
        scheduler::Selection::Run {
            module: "m".to_string(),
            job: "Hello".to_string(),
        }
    );
}
