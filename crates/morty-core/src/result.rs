//! Result Parser: extracts the self-reported completion marker from
//! captured subprocess output (spec.md Section 4.7).
//!
//! Replaces the teacher's bare `<promise>COMPLETE</promise>` sentinel check
//! with the richer RALPH_STATUS JSON block the new marker scheme requires,
//! keeping the teacher's "pure function over a string" shape.

use crate::errors::ResultError;
use serde::Deserialize;
use serde_json::Value;

const SENTINEL_START: &str = "<!-- RALPH_STATUS -->";
const SENTINEL_END: &str = "<!-- END_RALPH_STATUS -->";

/// Normalized outcome classification (spec Section 4.7, step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

/// The decoded marker plus the classification derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResult {
    pub outcome: Outcome,
    pub module: Option<String>,
    pub job: Option<String>,
    pub tasks_completed: Option<u64>,
    pub tasks_total: Option<u64>,
    /// The raw `status` string as reported, uppercased.
    pub raw_status: String,
}

#[derive(Debug, Deserialize)]
struct RawMarker {
    status: String,
    module: Option<String>,
    job: Option<String>,
    tasks_completed: Option<u64>,
    tasks_total: Option<u64>,
    /// Accepts the `{"ralph_status": {...}}` wrapper (spec Section 4.7, step 3).
    ralph_status: Option<Box<RawMarkerInner>>,
}

#[derive(Debug, Deserialize)]
struct RawMarkerInner {
    status: String,
    module: Option<String>,
    job: Option<String>,
    tasks_completed: Option<u64>,
    tasks_total: Option<u64>,
}

/// Parse the completion marker out of captured assistant output.
///
/// Algorithm (spec Section 4.7):
/// 1. Look for a `<!-- RALPH_STATUS -->...<!-- END_RALPH_STATUS -->` block.
/// 2. Otherwise scan for the last JSON object in the text containing a
///    `status` field.
/// 3. Accept either a flat object or a `{"ralph_status": {...}}` wrapper.
/// 4. Normalize `status` to uppercase; `RUNNING` counts as failure here
///    because the engine expected completion this call.
pub fn parse(output: &str) -> Result<ParsedResult, ResultError> {
    let raw_json = extract_sentinel_block(output)
        .or_else(|| extract_last_status_object(output))
        .ok_or_else(|| ResultError::Parse("no RALPH_STATUS marker found".to_string()))?;

    let marker: RawMarker = serde_json::from_str(&raw_json)
        .map_err(|e| ResultError::Parse(format!("invalid marker JSON: {e}")))?;

    let (status, module, job, tasks_completed, tasks_total) = if let Some(inner) = marker.ralph_status
    {
        (inner.status, inner.module, inner.job, inner.tasks_completed, inner.tasks_total)
    } else {
        (marker.status, marker.module, marker.job, marker.tasks_completed, marker.tasks_total)
    };

    let raw_status = status.to_uppercase();
    let outcome = match raw_status.as_str() {
        "COMPLETED" => Outcome::Completed,
        // RUNNING and FAILED (and anything else recognizable-but-not-success)
        // are both failures at this layer: the engine invoked the assistant
        // expecting completion, so anything short of COMPLETED means retry.
        _ => Outcome::Failed,
    };

    Ok(ParsedResult {
        outcome,
        module,
        job,
        tasks_completed,
        tasks_total,
        raw_status,
    })
}

fn extract_sentinel_block(output: &str) -> Option<String> {
    let start = output.find(SENTINEL_START)? + SENTINEL_START.len();
    let rest = &output[start..];
    let end = rest.find(SENTINEL_END)?;
    Some(rest[..end].trim().to_string())
}

/// Scan `output` for the last top-level `{...}` object containing a
/// `status` key, tolerating surrounding prose.
fn extract_last_status_object(output: &str) -> Option<String> {
    let mut best: Option<String> = None;
    let bytes = output.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = matching_brace(output, i) {
                let candidate = &output[i..=end];
                if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                    if has_status_field(&value) {
                        best = Some(candidate.to_string());
                    }
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    best
}

fn has_status_field(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key("status")
                || map
                    .get("ralph_status")
                    .and_then(Value::as_object)
                    .is_some_and(|inner| inner.contains_key("status"))
        }
        _ => false,
    }
}

/// Find the index of the `}` matching the `{` at `start`, respecting
/// strings and escapes so braces inside JSON string values don't confuse
/// the scan.
fn matching_brace(s: &str, start: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                in_string = false;
            }
        } else {
            match c {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Error-line patterns used to seed the job's debug log (spec Section 4.7:
/// "extracts a list of likely error lines").
const ERROR_PATTERNS: &[&str] = &["Error:", "Panic:", "Exception:", "Failed:"];

/// Extract lines that look like error reports, preserving order of
/// appearance.
pub fn extract_error_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| ERROR_PATTERNS.iter().any(|p| line.contains(p)))
        .map(str::to_string)
        .collect()
}
