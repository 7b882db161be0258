//! Stable parsing of clarifier replies into task intents.
//!
//! The clarifier signals readiness with a `READY TO START` marker followed
//! by a `TASK:` line. Parsing is line-based and case-insensitive; the task
//! text runs to the next blank line or the end of the reply.

use crate::protocol::Intent;

/// Extract an [`Intent`] from an assistant reply, if it declares readiness.
pub fn parse_intent(reply: &str) -> Option<Intent> {
    let mut seen_marker = false;
    let mut collecting = false;
    let mut task_lines: Vec<&str> = Vec::new();

    for line in reply.lines() {
        if collecting {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            task_lines.push(trimmed);
            continue;
        }
        if !seen_marker {
            if contains_ignore_case(line, "ready to start") {
                seen_marker = true;
            } else {
                continue;
            }
        }
        // The TASK: line may share the marker's line or follow it.
        if let Some(rest) = task_suffix(line) {
            let rest = rest.trim();
            if !rest.is_empty() {
                task_lines.push(rest);
            }
            collecting = true;
        }
    }

    let task_description = task_lines.join(" ");
    if !seen_marker || task_description.is_empty() {
        return None;
    }

    let confidence = if contains_ignore_case(reply, "confidence:") {
        1.0
    } else {
        0.9
    };

    Some(Intent {
        task_description,
        is_ready: true,
        confidence,
    })
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

/// Text after a case-insensitive `TASK:` prefix anywhere in the line.
/// Matching on bytes keeps the offset a valid char boundary.
fn task_suffix(line: &str) -> Option<&str> {
    let needle = b"task:";
    line.as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|pos| &line[pos + needle.len()..])
}
