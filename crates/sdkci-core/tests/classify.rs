use sdkci_core::fakes::completed_target;
use sdkci_core::outcomes::{new_diagnostics, resolved_diagnostics};
use sdkci_core::{
    categorize_outcome, check_fail_run, should_fail_run, BuildTarget, CheckConclusion,
    CheckResult, CommitConclusion, Diagnostic, DiagnosticLevel, FailRunOn, Outcomes, Severity,
    TargetStatus,
};

fn diag(level: DiagnosticLevel, code: &str) -> Diagnostic {
    Diagnostic {
        level,
        code: code.to_string(),
        message: format!("{code} happened"),
        config_ref: None,
        oas_ref: None,
    }
}

fn with_diagnostics(conclusion: CommitConclusion, diagnostics: Vec<Diagnostic>) -> BuildTarget {
    BuildTarget {
        diagnostics,
        ..completed_target(conclusion)
    }
}

fn outcomes(entries: Vec<(&str, BuildTarget)>) -> Outcomes {
    entries
        .into_iter()
        .map(|(lang, target)| (lang.to_string(), target))
        .collect()
}

// ── Priority order ──────────────────────────────────────────────────────

#[test]
fn no_commit_is_pending() {
    let category = categorize_outcome(&BuildTarget::new(TargetStatus::InProgress), None);
    assert_eq!(category.conclusion, None);
    assert!(category.is_pending);
}

#[test]
fn noop_and_cancelled_are_success_even_with_errors() {
    for conclusion in [CommitConclusion::Noop, CommitConclusion::Cancelled] {
        let target = with_diagnostics(conclusion, vec![diag(DiagnosticLevel::Fatal, "F1")]);
        assert_eq!(
            categorize_outcome(&target, None).conclusion,
            Some(Severity::Success)
        );
    }
}

#[test]
fn fatal_and_timed_out_commits_are_fatal() {
    for conclusion in [CommitConclusion::Fatal, CommitConclusion::TimedOut] {
        let category = categorize_outcome(&completed_target(conclusion), None);
        assert_eq!(category.conclusion, Some(Severity::Fatal));
    }
}

#[test]
fn unknown_conclusion_is_fatal() {
    let target = completed_target(CommitConclusion::Other("exploded".to_string()));
    let category = categorize_outcome(&target, None);
    assert_eq!(category.conclusion, Some(Severity::Fatal));
    assert_eq!(category.reason, "Unknown conclusion: exploded");
}

#[test]
fn fatal_diagnostic_beats_error_diagnostic() {
    let target = with_diagnostics(
        CommitConclusion::Success,
        vec![
            diag(DiagnosticLevel::Error, "E1"),
            diag(DiagnosticLevel::Fatal, "F1"),
        ],
    );
    assert_eq!(
        categorize_outcome(&target, None).conclusion,
        Some(Severity::Fatal)
    );
}

#[test]
fn error_diagnostic_beats_failing_lint() {
    let target = BuildTarget {
        lint: Some(CheckResult::completed(CheckConclusion::Failure)),
        ..with_diagnostics(
            CommitConclusion::Success,
            vec![diag(DiagnosticLevel::Error, "E1")],
        )
    };
    let category = categorize_outcome(&target, None);
    assert_eq!(category.conclusion, Some(Severity::Error));
    assert_eq!(category.reason, "1 new error diagnostic");
}

#[test]
fn failing_build_check_is_error() {
    let target = BuildTarget {
        build: Some(CheckResult::completed(CheckConclusion::Failure)),
        ..completed_target(CommitConclusion::Warning)
    };
    assert_eq!(
        categorize_outcome(&target, None).conclusion,
        Some(Severity::Error)
    );
}

#[test]
fn build_check_failing_the_same_way_in_base_is_not_new() {
    let failing = Some(CheckResult::completed(CheckConclusion::Failure));
    let target = BuildTarget {
        build: failing.clone(),
        ..completed_target(CommitConclusion::Success)
    };
    let base = BuildTarget {
        build: failing,
        ..completed_target(CommitConclusion::Success)
    };
    assert_eq!(
        categorize_outcome(&target, Some(&base)).conclusion,
        Some(Severity::Success)
    );
}

#[test]
fn commit_error_only_counts_when_net_new() {
    let target = completed_target(CommitConclusion::Error);
    assert_eq!(
        categorize_outcome(&target, None).conclusion,
        Some(Severity::Error)
    );
    let base = completed_target(CommitConclusion::Error);
    assert_eq!(
        categorize_outcome(&target, Some(&base)).conclusion,
        Some(Severity::Success)
    );
}

#[test]
fn failing_lint_or_test_is_warning() {
    let lint = BuildTarget {
        lint: Some(CheckResult::completed(CheckConclusion::Failure)),
        ..completed_target(CommitConclusion::Success)
    };
    let test = BuildTarget {
        test: Some(CheckResult::completed(CheckConclusion::TimedOut)),
        ..completed_target(CommitConclusion::Success)
    };
    assert_eq!(categorize_outcome(&lint, None).reason, "Lint check failed");
    assert_eq!(categorize_outcome(&test, None).reason, "Test check failed");
    assert_eq!(
        categorize_outcome(&test, None).conclusion,
        Some(Severity::Warning)
    );
}

#[test]
fn net_new_merge_conflict_is_flagged() {
    let target = completed_target(CommitConclusion::MergeConflict);
    let category = categorize_outcome(&target, Some(&completed_target(CommitConclusion::Success)));
    assert_eq!(category.conclusion, Some(Severity::Warning));
    assert!(category.is_merge_conflict);

    let same = categorize_outcome(
        &target,
        Some(&completed_target(CommitConclusion::MergeConflict)),
    );
    assert_eq!(same.conclusion, Some(Severity::Success));
    assert!(!same.is_merge_conflict);
}

#[test]
fn warning_diagnostic_beats_merge_conflict() {
    let target = with_diagnostics(
        CommitConclusion::MergeConflict,
        vec![diag(DiagnosticLevel::Warning, "W1")],
    );
    let category = categorize_outcome(&target, None);
    assert_eq!(category.conclusion, Some(Severity::Warning));
    assert!(!category.is_merge_conflict);
}

#[test]
fn notes_classify_as_note() {
    let by_diagnostic = with_diagnostics(
        CommitConclusion::Success,
        vec![diag(DiagnosticLevel::Note, "N1")],
    );
    assert_eq!(
        categorize_outcome(&by_diagnostic, None).conclusion,
        Some(Severity::Note)
    );
    assert_eq!(
        categorize_outcome(&completed_target(CommitConclusion::Note), None).conclusion,
        Some(Severity::Note)
    );
}

#[test]
fn success_with_running_checks_is_pending() {
    let target = BuildTarget {
        build: Some(CheckResult::completed(CheckConclusion::Success)),
        test: Some(CheckResult::in_progress()),
        ..completed_target(CommitConclusion::Success)
    };
    let category = categorize_outcome(&target, None);
    assert_eq!(category.conclusion, Some(Severity::Success));
    assert!(category.is_pending);
}

// ── Baseline comparison ─────────────────────────────────────────────────

#[test]
fn diagnostics_shared_with_base_are_not_new() {
    let shared = diag(DiagnosticLevel::Error, "E1");
    let target = with_diagnostics(CommitConclusion::Success, vec![shared.clone()]);
    let base = with_diagnostics(CommitConclusion::Success, vec![shared]);
    assert_eq!(
        categorize_outcome(&target, Some(&base)).conclusion,
        Some(Severity::Success)
    );
}

#[test]
fn missing_base_makes_every_diagnostic_new() {
    let current = vec![
        diag(DiagnosticLevel::Warning, "W1"),
        diag(DiagnosticLevel::Note, "N1"),
    ];
    assert_eq!(new_diagnostics(&current, &[]).len(), 2);
}

#[test]
fn resolved_diagnostics_are_the_base_only_ones() {
    let current = vec![diag(DiagnosticLevel::Warning, "W1")];
    let base = vec![
        diag(DiagnosticLevel::Warning, "W1"),
        diag(DiagnosticLevel::Error, "E9"),
    ];
    let resolved = resolved_diagnostics(&current, &base);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].code, "E9");
}

// ── Run pass/fail ───────────────────────────────────────────────────────

#[test]
fn error_threshold_fails_on_error_or_fatal() {
    let failing = outcomes(vec![
        ("node", completed_target(CommitConclusion::Success)),
        ("python", completed_target(CommitConclusion::Error)),
    ]);
    let verdict = check_fail_run(FailRunOn::Error, &failing, None);
    assert!(!verdict.passed);
    assert_eq!(verdict.failures.len(), 1);
    assert_eq!(verdict.failures[0].language, "python");
    assert!(!should_fail_run(FailRunOn::Error, &failing, None));

    let fatal = outcomes(vec![("go", completed_target(CommitConclusion::Fatal))]);
    assert!(!check_fail_run(FailRunOn::Error, &fatal, None).passed);
}

#[test]
fn error_threshold_passes_on_warning_and_below() {
    let outcomes = outcomes(vec![
        ("node", completed_target(CommitConclusion::Warning)),
        ("python", completed_target(CommitConclusion::Note)),
        ("go", completed_target(CommitConclusion::Success)),
    ]);
    assert!(check_fail_run(FailRunOn::Error, &outcomes, None).passed);
    assert!(should_fail_run(FailRunOn::Error, &outcomes, None));
    assert!(!should_fail_run(FailRunOn::Warning, &outcomes, None));
    assert!(!should_fail_run(FailRunOn::Note, &outcomes, None));
}

#[test]
fn fatal_language_is_reported_as_not_passing() {
    let outcomes = outcomes(vec![
        ("node", completed_target(CommitConclusion::Fatal)),
        ("python", completed_target(CommitConclusion::Success)),
    ]);
    assert!(!should_fail_run(FailRunOn::Error, &outcomes, None));
    assert!(!should_fail_run(FailRunOn::Fatal, &outcomes, None));
    assert!(should_fail_run(FailRunOn::Never, &outcomes, None));
}

#[test]
fn never_threshold_always_passes() {
    let outcomes = outcomes(vec![("node", completed_target(CommitConclusion::Fatal))]);
    assert!(check_fail_run(FailRunOn::Never, &outcomes, None).passed);
}

#[test]
fn pending_languages_never_fail_the_run() {
    let outcomes = outcomes(vec![("node", BuildTarget::new(TargetStatus::InProgress))]);
    assert!(check_fail_run(FailRunOn::Note, &outcomes, None).passed);
}

#[test]
fn base_outcomes_are_matched_by_language() {
    let head = outcomes(vec![("node", completed_target(CommitConclusion::Error))]);
    let base = outcomes(vec![("node", completed_target(CommitConclusion::Error))]);
    assert!(check_fail_run(FailRunOn::Error, &head, Some(&base)).passed);
}
