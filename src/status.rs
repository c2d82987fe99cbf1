//! Human-readable activity labels derived from protocol metadata.
//!
//! Display only; nothing here feeds back into control flow.

/// Map a tool name to a coarse activity verb via substring matching.
pub fn activity_label(tool_name: &str) -> &'static str {
    let name = tool_name.to_ascii_lowercase();

    if contains_any(&name, &["read", "glob", "grep", "search"]) {
        "reading"
    } else if contains_any(&name, &["write", "edit", "patch"]) {
        "writing"
    } else if contains_any(&name, &["bash", "run", "shell", "exec"]) {
        "executing"
    } else if contains_any(&name, &["task", "agent"]) {
        "delegating"
    } else {
        "working"
    }
}

/// Map a machine status code to a display string. Unknown codes fall back to
/// the code itself so new backend phases still render something sensible.
pub fn status_label(code: &str) -> &str {
    match code {
        "initializing" => "Initializing session",
        "provisioning" => "Provisioning sandbox",
        "cloning" => "Cloning repository",
        "tool-call" => "Running tools",
        "agent-thinking" => "Thinking",
        other => other,
    }
}

fn contains_any(value: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| value.contains(needle))
}
