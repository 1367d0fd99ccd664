//! Prompt assembly for the execution engine (spec.md Section 4.5).
//!
//! Builds the single string handed to the assistant on standard input, by
//! concatenating five parts in a fixed order: a base template, a compact
//! JSON progress block, the full plan file text, a job-context task list,
//! and a closing instruction block describing the RALPH_STATUS marker the
//! assistant must emit. Template substitution follows the teacher's
//! `{{name}}` placeholder convention in its prompt templates.

use crate::types::{Job, JobState, TaskState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Everything the prompt builder needs about one job beyond the plan text
/// itself, assembled by the caller from the state store.
pub struct PromptContext<'a> {
    pub module: &'a str,
    pub job: &'a Job,
    pub job_state: &'a JobState,
    /// `"<module>/<job>: done (N tasks)"` lines for already-completed jobs,
    /// in plan order.
    pub completed_jobs_summary: Vec<String>,
    /// Full, unmodified text of the plan file this job belongs to.
    pub plan_text: &'a str,
    pub plan_dir: &'a Path,
    pub prompts_dir: &'a Path,
}

#[derive(Serialize)]
struct CurrentBlock<'a> {
    module: &'a str,
    job: &'a str,
    status: &'a str,
    loop_count: u32,
}

#[derive(Serialize)]
struct CurrentJobBlock<'a> {
    name: &'a str,
    description: &'a str,
    tasks: Vec<String>,
    dependencies: &'a [String],
    validator: &'a [String],
}

#[derive(Serialize)]
struct ContextBlock<'a> {
    completed_jobs_summary: &'a [String],
    current_job: CurrentJobBlock<'a>,
}

#[derive(Serialize)]
struct ProgressBlock<'a> {
    current: CurrentBlock<'a>,
    context: ContextBlock<'a>,
}

/// Name of the base template read verbatim from the prompts directory
/// (spec Section 4.5, part 1).
pub const BASE_TEMPLATE_NAME: &str = "doing.md";

/// Build the full assistant prompt from `ctx`, reading `doing.md` from
/// `ctx.prompts_dir`. Falls back to a minimal built-in template if the file
/// is absent, so a project without a customized prompts directory still
/// gets a working prompt.
pub fn build(ctx: &PromptContext<'_>) -> String {
    let template_path = ctx.prompts_dir.join(BASE_TEMPLATE_NAME);
    let base_template = std::fs::read_to_string(&template_path).unwrap_or_else(|_| {
        "Continue the software-construction plan. Follow the task list below.\n".to_string()
    });

    let mut parts = Vec::new();
    parts.push(substitute_placeholders(&base_template, ctx));
    parts.push(progress_block(ctx));
    parts.push(format!(
        "## Plan file ({})\n\n{}",
        ctx.module, ctx.plan_text
    ));
    parts.push(job_context_section(ctx));
    parts.push(instruction_block(ctx));

    parts.join("\n\n")
}

/// Replace `{{name}}` / `{{ name }}` placeholders for the fixed set of
/// names spec Section 4.5 lists; anything else is left intact.
fn substitute_placeholders(template: &str, ctx: &PromptContext<'_>) -> String {
    let task_index = ctx
        .job
        .tasks
        .iter()
        .position(|t| !t.done)
        .map(|i| i.to_string())
        .unwrap_or_default();
    let task_desc = ctx
        .job
        .tasks
        .iter()
        .find(|t| !t.done)
        .map(|t| t.description.as_str())
        .unwrap_or("");

    let mut values: BTreeMap<&str, String> = BTreeMap::new();
    values.insert("module", ctx.module.to_string());
    values.insert("job", ctx.job.name.clone());
    values.insert("task_index", task_index);
    values.insert("task_desc", task_desc.to_string());
    values.insert("plan_dir", ctx.plan_dir.display().to_string());
    values.insert("prompts_dir", ctx.prompts_dir.display().to_string());

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str("{{");
            rest = after;
            continue;
        };
        let name = after[..end].trim();
        if let Some(value) = values.get(name) {
            out.push_str(value);
        } else {
            out.push_str(&rest[start..start + 4 + end]);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn progress_block(ctx: &PromptContext<'_>) -> String {
    let tasks: Vec<String> = ctx
        .job
        .tasks
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let status = ctx
                .job_state
                .task_status
                .get(i)
                .copied()
                .unwrap_or(TaskState::Pending);
            format!("Task {}: {} ({})", i, task.description, status.as_str())
        })
        .collect();

    let block = ProgressBlock {
        current: CurrentBlock {
            module: ctx.module,
            job: &ctx.job.name,
            status: ctx.job_state.status.as_str(),
            loop_count: ctx.job_state.loop_count,
        },
        context: ContextBlock {
            completed_jobs_summary: &ctx.completed_jobs_summary,
            current_job: CurrentJobBlock {
                name: &ctx.job.name,
                description: &ctx.job.goal,
                tasks,
                dependencies: &ctx.job.prerequisites,
                validator: &ctx.job.validators,
            },
        },
    };
    let json = serde_json::to_string_pretty(&block).unwrap_or_default();
    format!("## Progress\n\n```json\n{json}\n```")
}

fn job_context_section(ctx: &PromptContext<'_>) -> String {
    let mut lines = vec![format!("## Job context: {}", ctx.job.name)];
    if !ctx.job.goal.is_empty() {
        lines.push(format!("Goal: {}", ctx.job.goal));
    }
    for (i, task) in ctx.job.tasks.iter().enumerate() {
        let status = ctx
            .job_state
            .task_status
            .get(i)
            .copied()
            .unwrap_or(TaskState::Pending);
        let checkbox = if status == TaskState::Completed { "[x]" } else { "[ ]" };
        lines.push(format!("- {checkbox} Task {i}: {}", task.description));
    }
    if !ctx.job.validators.is_empty() {
        lines.push("Validators:".to_string());
        for v in &ctx.job.validators {
            lines.push(format!("- {v}"));
        }
    }
    lines.join("\n")
}

fn instruction_block(ctx: &PromptContext<'_>) -> String {
    format!(
        "## Completion marker\n\n\
         Before you exit, emit a completion marker as a JSON object with \
         fields `module`, `job`, and `status`, where `status` is uppercase \
         (`COMPLETED` or `FAILED`). Wrap it exactly between \
         `<!-- RALPH_STATUS -->` and `<!-- END_RALPH_STATUS -->`, for example:\n\n\
         <!-- RALPH_STATUS -->\n\
         {{\"module\": \"{}\", \"job\": \"{}\", \"status\": \"COMPLETED\"}}\n\
         <!-- END_RALPH_STATUS -->",
        ctx.module, ctx.job.name
    )
}
