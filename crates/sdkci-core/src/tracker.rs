//! Incremental merge of polled build state into per-language outcomes.
//!
//! The tracker is the synchronous half of the poller: it owns the `commit`
//! and `diagnostics` fields of every language and decides whether a polled
//! [`Build`] changed anything a consumer can observe.

use std::collections::BTreeSet;

use crate::model::{
    Build, BuildTarget, CheckResult, CommitResult, Diagnostic, DocumentedSpecRef, Outcomes,
    TargetStatus,
};

/// What a single [`OutcomeTracker::apply`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// An observable field changed and a new snapshot should be emitted.
    pub changed: bool,
    /// Languages whose commit completed in this merge.
    pub newly_completed: Vec<String>,
    /// Set the first time the build exposes its documented spec.
    pub documented_spec: Option<DocumentedSpecRef>,
}

#[derive(Debug, Clone)]
pub struct OutcomeTracker {
    outcomes: Outcomes,
    diagnostics_attached: BTreeSet<String>,
    documented_spec: Option<DocumentedSpecRef>,
}

fn check_status(check: &Option<CheckResult>) -> Option<TargetStatus> {
    check.as_ref().map(|c| c.status)
}

impl OutcomeTracker {
    /// Seed every language from a freshly created build. The language set is
    /// fixed from here on.
    pub fn new(build: &Build) -> Self {
        let outcomes = build
            .targets
            .iter()
            .map(|(lang, target)| {
                let seeded = BuildTarget {
                    commit: None,
                    diagnostics: Vec::new(),
                    has_diff: None,
                    diff_stats: None,
                    ..target.clone()
                };
                (lang.clone(), seeded)
            })
            .collect();

        Self {
            outcomes,
            diagnostics_attached: BTreeSet::new(),
            documented_spec: None,
        }
    }

    /// Merge a polled build. Server fields overwrite local ones except
    /// `commit` and `diagnostics`, which only change when the commit
    /// completes for the first time.
    pub fn apply(&mut self, build: &Build) -> MergeReport {
        let mut report = MergeReport::default();

        for (lang, local) in self.outcomes.iter_mut() {
            let Some(server) = build.targets.get(lang) else {
                continue;
            };

            let commit_completed_now = local.commit.is_none()
                && server.commit.as_ref().is_some_and(CommitResult::is_completed);

            let observable = local.status != server.status
                || check_status(&local.build) != check_status(&server.build)
                || check_status(&local.lint) != check_status(&server.lint)
                || check_status(&local.test) != check_status(&server.test)
                || commit_completed_now;

            let commit = if commit_completed_now {
                server.commit.clone()
            } else {
                local.commit.take()
            };

            *local = BuildTarget {
                commit,
                diagnostics: std::mem::take(&mut local.diagnostics),
                has_diff: local.has_diff,
                diff_stats: local.diff_stats,
                ..server.clone()
            };

            if commit_completed_now {
                report.newly_completed.push(lang.clone());
            }
            report.changed |= observable;
        }

        if self.documented_spec.is_none() {
            if let Some(spec) = &build.documented_spec {
                self.documented_spec = Some(spec.clone());
                report.documented_spec = Some(spec.clone());
                report.changed = true;
            }
        }

        report
    }

    /// Attach diagnostics to a language whose commit has completed.
    ///
    /// Returns `false` (and changes nothing) if the commit has not completed
    /// or diagnostics were already attached.
    pub fn attach_diagnostics(&mut self, lang: &str, diagnostics: Vec<Diagnostic>) -> bool {
        let Some(outcome) = self.outcomes.get_mut(lang) else {
            return false;
        };
        if outcome.commit.is_none() || self.diagnostics_attached.contains(lang) {
            return false;
        }
        outcome.diagnostics = diagnostics;
        self.diagnostics_attached.insert(lang.to_string());
        true
    }

    /// Every language's target has completed. A completed target may still
    /// lack a commit; it stays pending rather than timing out.
    pub fn is_finished(&self) -> bool {
        self.outcomes.values().all(|o| o.status.is_completed())
    }

    /// Give every language without a completed commit a synthetic
    /// `timed_out` commit. Returns the languages that were finalized.
    pub fn finalize_timed_out(&mut self) -> Vec<String> {
        let mut finalized = Vec::new();
        for (lang, outcome) in self.outcomes.iter_mut() {
            if outcome.commit.is_none() {
                outcome.commit = Some(CommitResult::timed_out());
                finalized.push(lang.clone());
            }
        }
        finalized
    }

    /// A fresh copy of the current outcomes.
    pub fn snapshot(&self) -> Outcomes {
        self.outcomes.clone()
    }
}
