//! Hierarchical plan parser (spec.md Section 4.1).
//!
//! Reads one plan file (or raw text) into a `Plan` of ordered `Job`s, each
//! with ordered `Task`s, prerequisites, validators, and debug-log slots.
//! Parsing is pure: it never writes to disk. The code-fence-skipping and
//! section-tracking discipline follows the teacher's `plan::select_task`
//! scanner; this module builds the full hierarchical structure spec.md
//! Section 4.1 asks for rather than selecting a single next task.

use crate::errors::PlanError;
use crate::types::{Job, Plan, Task};
use std::path::{Path, PathBuf};

/// Outcome of parsing one plan file: the structured `Plan` plus any
/// non-fatal diagnostics (spec Section 4.1: "malformed checkbox ignored
/// with warning, not fatal").
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub plan: Plan,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Goal,
    Prerequisites,
    Tasks,
    Validators,
    DebugLog,
}

const GOAL_LABELS: &[&str] = &["goal", "目标"];
const PREREQ_LABELS: &[&str] = &["prerequisites", "prerequisite", "前置条件"];
const VALIDATOR_LABELS: &[&str] = &["validator", "validators", "validator(s)", "验证器"];
const DEBUG_LABELS: &[&str] = &["debug log", "debug logs", "debug log(s)", "调试日志"];

/// Parse a plan file from disk.
pub fn parse_file(path: &Path) -> Result<ParseOutcome, PlanError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| PlanError::FileNotFound(path.display().to_string()))?;
    parse_content(&content, path)
}

/// Parse raw plan text. `source` is used only to derive a fallback module
/// name (the file stem) and to stamp `Plan::file`.
pub fn parse_content(content: &str, source: &Path) -> Result<ParseOutcome, PlanError> {
    if content.trim().is_empty() {
        return Err(PlanError::NoJobs);
    }

    let mut warnings = Vec::new();
    let mut title = String::new();
    let mut module_name: Option<String> = None;
    let mut responsibility: Option<String> = None;
    let mut jobs: Vec<Job> = Vec::new();

    let mut in_fence = false;
    let mut section = Section::None;
    let mut current: Option<Job> = None;
    let mut job_block_raw = String::new();
    let mut job_all_checked = true;
    let mut seen_any_job = false;

    macro_rules! flush_job {
        () => {
            if let Some(mut job) = current.take() {
                seen_any_job = true;
                let marker_seen = job_block_raw.contains("已完成")
                    || job_block_raw.to_uppercase().contains("COMPLETED");
                job.completion_marked =
                    job_all_checked && !job.tasks.is_empty() && marker_seen;
                jobs.push(job);
            }
            job_block_raw.clear();
            job_all_checked = true;
        };
    }

    for raw_line in content.lines() {
        let trimmed = raw_line.trim();

        if trimmed.trim_start().starts_with("```") {
            in_fence = !in_fence;
            if current.is_some() {
                job_block_raw.push_str(raw_line);
                job_block_raw.push('\n');
            }
            continue;
        }
        if in_fence {
            if current.is_some() {
                job_block_raw.push_str(raw_line);
                job_block_raw.push('\n');
            }
            continue;
        }

        if current.is_some() {
            job_block_raw.push_str(raw_line);
            job_block_raw.push('\n');
        }

        // Level-1 heading: plan title.
        if let Some(rest) = trimmed.strip_prefix("# ") {
            if title.is_empty() {
                title = rest.trim().to_string();
            }
            continue;
        }

        // Level-3 heading: `### Job <N>: <name>` or `### job_<N>: <name>`.
        if let Some(rest) = trimmed.strip_prefix("### ") {
            if let Some((index, name)) = parse_job_heading(rest) {
                flush_job!();
                current = Some(Job {
                    index,
                    name,
                    goal: String::new(),
                    prerequisites: Vec::new(),
                    tasks: Vec::new(),
                    validators: Vec::new(),
                    debug_log: Vec::new(),
                    completion_marked: false,
                });
                section = Section::None;
                job_all_checked = true;
                continue;
            }
        }

        // Labeled sub-section headers: `#### Label`, a bolded `**Label**:`
        // line, or a bare `Label:` line (the form the spec's own examples
        // use, with or without an inline value on the same line).
        if current.is_some() {
            if let Some((label, inline_value)) = heading_label(trimmed) {
                if let Some(new_section) = classify_label(&label) {
                    if new_section == Section::Goal && !inline_value.is_empty() {
                        if let Some(job) = current.as_mut() {
                            if job.goal.is_empty() {
                                job.goal = inline_value;
                            }
                        }
                        section = Section::None;
                    } else {
                        section = new_section;
                    }
                    continue;
                }
            }
        }

        // Module/responsibility line, recognized anywhere before the first job.
        if current.is_none() {
            if let Some((label, value)) = split_label_value(trimmed) {
                if is_module_label(&label) {
                    module_name = Some(value.trim().to_string());
                    responsibility = Some(value.trim().to_string());
                    continue;
                }
            }
        }

        let Some(job) = current.as_mut() else {
            continue;
        };

        match section {
            Section::Goal => {
                if !trimmed.is_empty() && job.goal.is_empty() {
                    job.goal = strip_bullet(trimmed).to_string();
                }
            }
            Section::Prerequisites => {
                if let Some(item) = list_item(trimmed) {
                    if !item.is_empty() {
                        job.prerequisites.push(item.to_string());
                    }
                }
            }
            Section::Validators => {
                if let Some(item) = list_item(trimmed) {
                    if !item.is_empty() {
                        job.validators.push(item.to_string());
                    }
                }
            }
            Section::DebugLog => {
                if let Some(item) = list_item(trimmed) {
                    let lower = item.trim().to_lowercase();
                    if !item.is_empty() && lower != "无" && lower != "none" {
                        job.debug_log.push(item.to_string());
                    }
                }
            }
            Section::Tasks | Section::None => {
                if let Some(bullet) = list_item_raw(raw_line) {
                    match parse_task(bullet.text, bullet.nesting) {
                        Ok(Some(mut task)) => {
                            task.index = job.tasks.len();
                            if !task.done {
                                job_all_checked = false;
                            }
                            job.tasks.push(task);
                        }
                        Ok(None) => {
                            // Plain list item outside a tasks section; ignore.
                        }
                        Err(msg) => {
                            warnings.push(format!(
                                "job {}: malformed checkbox ignored: {msg}",
                                job.name
                            ));
                        }
                    }
                }
            }
        }
    }
    flush_job!();

    if !seen_any_job || jobs.is_empty() {
        return Err(PlanError::NoJobs);
    }

    let module = module_name.unwrap_or_else(|| {
        source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
            .to_string()
    });

    Ok(ParseOutcome {
        plan: Plan {
            module,
            file: source.to_path_buf(),
            title,
            responsibility,
            jobs,
        },
        warnings,
    })
}

/// Parse a `Job <N>: <name>` or `job_<N>: <name>` heading remainder.
fn parse_job_heading(rest: &str) -> Option<(u32, String)> {
    let rest = rest.trim();
    let lower = rest.to_lowercase();
    let prefix_len = if lower.starts_with("job_") {
        4
    } else if lower.starts_with("job ") {
        4
    } else {
        return None;
    };
    let after_prefix = &rest[prefix_len..];
    let colon_pos = after_prefix.find(|c| c == ':' || c == '\u{ff1a}')?;
    let (num_str, name_part) = after_prefix.split_at(colon_pos);
    let index: u32 = num_str.trim().parse().ok()?;
    let name = name_part[1..].trim().to_string();
    Some((index, name))
}

/// Recognize a `#### Label`, bolded `**Label**:`, or bare `Label:` header
/// line, returning the label text and whatever value trails the colon
/// (empty when the section's content is on following lines).
fn heading_label(trimmed: &str) -> Option<(String, String)> {
    if let Some(rest) = trimmed.strip_prefix("#### ") {
        let label = rest.trim_end_matches(':').trim_end_matches('\u{ff1a}').trim().to_string();
        return Some((label, String::new()));
    }
    let (label, value) = split_label_value(trimmed)?;
    Some((strip_bold(&label).to_string(), value))
}

fn classify_label(label: &str) -> Option<Section> {
    let lower = label.to_lowercase();
    if GOAL_LABELS.iter().any(|l| lower == *l) {
        return Some(Section::Goal);
    }
    if PREREQ_LABELS.iter().any(|l| lower == *l) {
        return Some(Section::Prerequisites);
    }
    if VALIDATOR_LABELS.iter().any(|l| lower == *l) {
        return Some(Section::Validators);
    }
    if DEBUG_LABELS.iter().any(|l| lower == *l) {
        return Some(Section::DebugLog);
    }
    if lower.starts_with("tasks") {
        return Some(Section::Tasks);
    }
    None
}

fn is_module_label(label: &str) -> bool {
    let stripped = strip_bold(label);
    let lower = stripped.to_lowercase();
    stripped.contains("模块") || stripped.contains("责任") || stripped.contains("职责")
        || lower.contains("module")
}

/// Split a `Label: value` or `**Label**：value` line at the first colon
/// (ASCII or fullwidth).
fn split_label_value(line: &str) -> Option<(String, String)> {
    let pos = line.find(|c| c == ':' || c == '\u{ff1a}')?;
    let (label, value) = line.split_at(pos);
    Some((label.trim().to_string(), value[1..].trim().to_string()))
}

fn strip_bold(s: &str) -> &str {
    s.trim().trim_start_matches("**").trim_end_matches("**").trim()
}

fn strip_bullet(line: &str) -> &str {
    line.trim_start_matches(['-', '*']).trim_start()
}

/// A parsed list-item bullet, with its nesting level.
struct ListBullet<'a> {
    text: &'a str,
    nesting: usize,
}

/// Recognize list items regardless of section (`- `, `* `), tracking
/// indentation depth as the nesting level. A checkbox item is also
/// accepted with no leading bullet at all (spec Section 4.1: tasks are
/// checkbox items "optionally preceded by a bullet").
fn list_item_raw(raw_line: &str) -> Option<ListBullet<'_>> {
    let indent = raw_line.len() - raw_line.trim_start().len();
    let trimmed = raw_line.trim_start();
    if let Some(after_marker) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
        return Some(ListBullet {
            text: after_marker,
            nesting: indent / 2,
        });
    }
    if trimmed.starts_with('[') {
        return Some(ListBullet {
            text: trimmed,
            nesting: indent / 2,
        });
    }
    None
}

fn list_item(trimmed: &str) -> Option<&str> {
    trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .map(str::trim)
}

/// Parse a single task bullet's text (already stripped of its `- `/`* `
/// marker) into a `Task`, or `None` if it isn't a checkbox item at all
/// (spec Section 4.1: malformed checkboxes are ignored with a warning).
fn parse_task(text: &str, nesting: usize) -> Result<Option<Task>, String> {
    if !text.starts_with('[') {
        return Ok(None);
    }
    let Some(close) = text.find(']') else {
        return Err(format!("unterminated checkbox in {text:?}"));
    };
    let marker = &text[1..close];
    let done = match marker.trim() {
        "x" | "X" => true,
        "" => false,
        other => return Err(format!("unrecognized checkbox marker '[{other}]'")),
    };
    let after = &text[close + 1..];
    if !after.starts_with(' ') {
        return Err(format!("missing space after checkbox in {text:?}"));
    }
    let description = after[1..].trim().to_string();
    if description.is_empty() {
        return Err("empty task description".to_string());
    }
    Ok(Some(Task {
        index: 0, // overwritten by caller once appended
        description,
        done,
        nesting,
    }))
}
