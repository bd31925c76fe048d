//! Status comment text posted to pull and merge requests.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use sdkci_core::outcomes::{
    categorize_outcome, count_diagnostics, new_diagnostics, DiagnosticCounts,
};
use sdkci_core::{BuildTarget, Outcomes};

/// Hidden marker identifying the comment this tool owns.
pub const COMMENT_MARKER: &str = "<!-- sdkci:status -->";

/// Everything a status comment shows.
#[derive(Debug, Clone, Copy)]
pub struct StatusInput<'a> {
    /// Heading, e.g. "Preview" or "Merge".
    pub title: &'a str,
    pub outcomes: &'a Outcomes,
    pub base_outcomes: Option<&'a Outcomes>,
    pub commit_messages: Option<&'a BTreeMap<String, String>>,
    pub run_url: Option<&'a str>,
}

fn counts_cell(counts: &DiagnosticCounts) -> String {
    if counts.total() == 0 {
        return "-".to_string();
    }
    [
        (counts.fatal, "fatal"),
        (counts.error, "error"),
        (counts.warning, "warning"),
        (counts.note, "note"),
    ]
    .iter()
    .filter(|(n, _)| *n > 0)
    .map(|(n, label)| format!("{n} {label}"))
    .collect::<Vec<_>>()
    .join(", ")
}

fn commit_cell(target: &BuildTarget) -> String {
    match target.commit_ref() {
        Some(commit) => {
            let short = commit.sha.get(..7).unwrap_or(&commit.sha);
            format!("[`{short}`](https://github.com/{}/commit/{})", commit.repo, commit.sha)
        }
        None => "-".to_string(),
    }
}

fn diff_cell(target: &BuildTarget) -> String {
    match (target.diff_stats, target.has_diff) {
        (Some(stats), _) => format!("+{} / -{}", stats.additions, stats.deletions),
        (None, Some(false)) => "no changes".to_string(),
        _ => "-".to_string(),
    }
}

/// Table cells cannot contain pipes or newlines.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render the comment body, marker first.
pub fn render_status(input: &StatusInput<'_>) -> String {
    let mut out = String::new();
    let finished = input
        .outcomes
        .values()
        .all(|t| t.commit.as_ref().is_some_and(|c| c.is_completed()));

    let _ = writeln!(out, "{COMMENT_MARKER}");
    let state = if finished { "finished" } else { "in progress" };
    let _ = writeln!(out, "### {}: {state}\n", input.title);

    if input.outcomes.is_empty() {
        let _ = writeln!(out, "No SDK targets configured.");
    } else {
        let _ = writeln!(out, "| Language | Result | Reason | New diagnostics | Commit | Diff |");
        let _ = writeln!(out, "|---|---|---|---|---|---|");
    }

    let mut conflicts = Vec::new();
    for (language, target) in input.outcomes {
        let base = input.base_outcomes.and_then(|b| b.get(language));
        let category = categorize_outcome(target, base);
        if category.is_merge_conflict {
            conflicts.push(language.as_str());
        }
        let result = match (category.conclusion, category.is_pending) {
            (None, _) => "pending".to_string(),
            (Some(severity), true) => format!("{severity} (checks running)"),
            (Some(severity), false) => severity.to_string(),
        };
        let base_diagnostics = base.map(|b| b.diagnostics.as_slice()).unwrap_or_default();
        let counts = count_diagnostics(new_diagnostics(&target.diagnostics, base_diagnostics));

        let _ = writeln!(
            out,
            "| {language} | {result} | {} | {} | {} | {} |",
            cell(&category.reason),
            counts_cell(&counts),
            commit_cell(target),
            diff_cell(target),
        );
    }

    if !conflicts.is_empty() {
        let _ = writeln!(
            out,
            "\nMerge conflicts need manual resolution for: {}.",
            conflicts.join(", ")
        );
    }

    if let Some(messages) = input.commit_messages.filter(|m| !m.is_empty()) {
        let _ = writeln!(out, "\n<details><summary>Commit messages</summary>\n");
        for (language, message) in messages {
            let _ = writeln!(out, "**{language}**\n\n```\n{}\n```\n", message.trim_end());
        }
        let _ = writeln!(out, "</details>");
    }

    if let Some(run_url) = input.run_url {
        let _ = writeln!(out, "\n[View workflow run]({run_url})");
    }
    out
}
