//! Classification of build outcomes into a severity taxonomy.
//!
//! [`categorize_outcome`] reduces one language's state, optionally compared
//! against a baseline build of the same language, to a single [`Category`].
//! [`should_fail_run`] applies a [`FailRunOn`] threshold across every
//! language to decide whether the CI run fails.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::model::{
    BuildTarget, CheckResult, CommitConclusion, Diagnostic, DiagnosticLevel, Outcomes,
};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Classified severity of a language's build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Note,
    Success,
}

/// Most severe first. Pass/fail decisions compare positions in this list.
pub const SEVERITY_ORDER: [Severity; 5] = [
    Severity::Fatal,
    Severity::Error,
    Severity::Warning,
    Severity::Note,
    Severity::Success,
];

impl Severity {
    /// Position in [`SEVERITY_ORDER`]; lower is more severe.
    pub fn rank(self) -> usize {
        SEVERITY_ORDER
            .iter()
            .position(|s| *s == self)
            .unwrap_or(SEVERITY_ORDER.len())
    }

    pub fn is_at_least(self, threshold: Severity) -> bool {
        self.rank() <= threshold.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
            Severity::Success => "success",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Classification of a single language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// `None` while the commit has not completed.
    pub conclusion: Option<Severity>,
    pub reason: String,
    #[serde(default)]
    pub is_merge_conflict: bool,
    #[serde(default)]
    pub is_pending: bool,
}

impl Category {
    fn pending(reason: impl Into<String>) -> Self {
        Self {
            conclusion: None,
            reason: reason.into(),
            is_merge_conflict: false,
            is_pending: true,
        }
    }

    fn of(severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            conclusion: Some(severity),
            reason: reason.into(),
            is_merge_conflict: false,
            is_pending: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostic helpers
// ---------------------------------------------------------------------------

/// Diagnostics in `current` whose identity is absent from `base`.
pub fn new_diagnostics<'a>(current: &'a [Diagnostic], base: &[Diagnostic]) -> Vec<&'a Diagnostic> {
    let known: HashSet<_> = base.iter().map(Diagnostic::identity).collect();
    current
        .iter()
        .filter(|d| !known.contains(&d.identity()))
        .collect()
}

/// Diagnostics in `base` that no longer appear in `current`.
pub fn resolved_diagnostics<'a>(
    current: &[Diagnostic],
    base: &'a [Diagnostic],
) -> Vec<&'a Diagnostic> {
    new_diagnostics(base, current)
}

/// Per-level diagnostic counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCounts {
    pub fatal: usize,
    pub error: usize,
    pub warning: usize,
    pub note: usize,
}

impl DiagnosticCounts {
    pub fn total(&self) -> usize {
        self.fatal + self.error + self.warning + self.note
    }
}

pub fn count_diagnostics<'a>(
    diagnostics: impl IntoIterator<Item = &'a Diagnostic>,
) -> DiagnosticCounts {
    let mut counts = DiagnosticCounts::default();
    for d in diagnostics {
        match d.level {
            DiagnosticLevel::Fatal => counts.fatal += 1,
            DiagnosticLevel::Error => counts.error += 1,
            DiagnosticLevel::Warning => counts.warning += 1,
            DiagnosticLevel::Note => counts.note += 1,
        }
    }
    counts
}

/// Most severe first; stable within a level.
pub fn sort_by_level(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by_key(|d| d.level);
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// A check that is failing now but was not failing the same way in the
/// baseline (or did not exist there).
fn check_newly_failing(current: Option<&CheckResult>, base: Option<&CheckResult>) -> bool {
    let Some(current) = current.filter(|c| c.is_failing()) else {
        return false;
    };
    !matches!(
        base,
        Some(b) if b.status.is_completed() && b.conclusion == current.conclusion
    )
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 new {noun} diagnostic")
    } else {
        format!("{n} new {noun} diagnostics")
    }
}

/// Classify one language's build, comparing against `base` when given.
///
/// Rules are evaluated in a fixed priority order and the first match wins.
pub fn categorize_outcome(outcome: &BuildTarget, base: Option<&BuildTarget>) -> Category {
    let Some(conclusion) = outcome.commit_conclusion() else {
        return Category::pending("Build has not completed");
    };
    let base_conclusion = base.and_then(BuildTarget::commit_conclusion);
    let net_new = |c: &CommitConclusion| conclusion == c && base_conclusion != Some(c);

    match conclusion {
        CommitConclusion::Noop => {
            return Category::of(Severity::Success, "No changes to generate");
        }
        CommitConclusion::Cancelled => {
            return Category::of(Severity::Success, "Build was cancelled");
        }
        CommitConclusion::Fatal => return Category::of(Severity::Fatal, "Code generation failed"),
        CommitConclusion::TimedOut => return Category::of(Severity::Fatal, "Build timed out"),
        CommitConclusion::MergeConflict
        | CommitConclusion::Error
        | CommitConclusion::Warning
        | CommitConclusion::Note
        | CommitConclusion::Success => {}
        other => {
            return Category::of(Severity::Fatal, format!("Unknown conclusion: {other}"));
        }
    }

    let base_diagnostics = base.map(|b| b.diagnostics.as_slice()).unwrap_or(&[]);
    let counts = count_diagnostics(new_diagnostics(&outcome.diagnostics, base_diagnostics));

    if counts.fatal > 0 {
        return Category::of(Severity::Fatal, plural(counts.fatal, "fatal"));
    }
    if counts.error > 0 {
        return Category::of(Severity::Error, plural(counts.error, "error"));
    }
    if check_newly_failing(outcome.build.as_ref(), base.and_then(|b| b.build.as_ref())) {
        return Category::of(Severity::Error, "Build check failed");
    }
    if net_new(&CommitConclusion::Error) {
        return Category::of(Severity::Error, "Code generation reported errors");
    }
    if counts.warning > 0 {
        return Category::of(Severity::Warning, plural(counts.warning, "warning"));
    }
    if check_newly_failing(outcome.lint.as_ref(), base.and_then(|b| b.lint.as_ref())) {
        return Category::of(Severity::Warning, "Lint check failed");
    }
    if check_newly_failing(outcome.test.as_ref(), base.and_then(|b| b.test.as_ref())) {
        return Category::of(Severity::Warning, "Test check failed");
    }
    if net_new(&CommitConclusion::Warning) {
        return Category::of(Severity::Warning, "Code generation reported warnings");
    }
    if net_new(&CommitConclusion::MergeConflict) {
        return Category {
            is_merge_conflict: true,
            ..Category::of(Severity::Warning, "Merge conflict with custom code")
        };
    }
    if counts.note > 0 {
        return Category::of(Severity::Note, plural(counts.note, "note"));
    }
    if net_new(&CommitConclusion::Note) {
        return Category::of(Severity::Note, "Code generation reported notes");
    }

    let is_pending = outcome
        .checks()
        .into_iter()
        .any(|(_, check)| check.is_some_and(|c| !c.status.is_completed()));
    Category {
        is_pending,
        ..Category::of(Severity::Success, "Success")
    }
}

// ---------------------------------------------------------------------------
// Run pass/fail
// ---------------------------------------------------------------------------

/// Lowest severity that fails the CI run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailRunOn {
    Never,
    Fatal,
    Error,
    Warning,
    Note,
}

impl FailRunOn {
    pub fn threshold(self) -> Option<Severity> {
        match self {
            FailRunOn::Never => None,
            FailRunOn::Fatal => Some(Severity::Fatal),
            FailRunOn::Error => Some(Severity::Error),
            FailRunOn::Warning => Some(Severity::Warning),
            FailRunOn::Note => Some(Severity::Note),
        }
    }
}

impl Default for FailRunOn {
    fn default() -> Self {
        FailRunOn::Error
    }
}

impl FromStr for FailRunOn {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(FailRunOn::Never),
            "fatal" => Ok(FailRunOn::Fatal),
            "error" => Ok(FailRunOn::Error),
            "warning" => Ok(FailRunOn::Warning),
            "note" => Ok(FailRunOn::Note),
            _ => Err(ConfigError::InvalidFailRunOn(s.to_string())),
        }
    }
}

/// A language whose classification reached the failure threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageFailure {
    pub language: String,
    pub category: Category,
}

/// Pass/fail decision for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailRunVerdict {
    pub passed: bool,
    pub failures: Vec<LanguageFailure>,
}

/// Classify every language and collect the ones at or above the threshold.
pub fn check_fail_run(
    fail_on: FailRunOn,
    outcomes: &Outcomes,
    base_outcomes: Option<&Outcomes>,
) -> FailRunVerdict {
    let Some(threshold) = fail_on.threshold() else {
        return FailRunVerdict {
            passed: true,
            failures: Vec::new(),
        };
    };

    let failures: Vec<LanguageFailure> = outcomes
        .iter()
        .filter_map(|(language, outcome)| {
            let base = base_outcomes.and_then(|b| b.get(language));
            let category = categorize_outcome(outcome, base);
            category
                .conclusion
                .filter(|severity| severity.is_at_least(threshold))
                .map(|_| LanguageFailure {
                    language: language.clone(),
                    category,
                })
        })
        .collect();

    FailRunVerdict {
        passed: failures.is_empty(),
        failures,
    }
}

/// Run the fail-run check. Returns `true` when every language stays below
/// the `fail_on` threshold and `false` as soon as one reaches it. Logs every
/// failing language first.
pub fn should_fail_run(
    fail_on: FailRunOn,
    outcomes: &Outcomes,
    base_outcomes: Option<&Outcomes>,
) -> bool {
    let verdict = check_fail_run(fail_on, outcomes, base_outcomes);
    for failure in &verdict.failures {
        warn!(
            lang = %failure.language,
            conclusion = %failure.category.conclusion.map(Severity::as_str).unwrap_or("pending"),
            reason = %failure.category.reason,
            "language failed the build check"
        );
    }
    verdict.passed
}
