use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use sdkci_core::fakes::{build, completed_target, in_progress_target, ApiCall, FakeBuildApi};
use sdkci_core::orchestrate::{fan_in, revision_hash};
use sdkci_core::{
    run_builds, BuildRun, BuildSnapshot, CommitConclusion, ConfigError, CreateBranchParams,
    GuessConfigSource, ListBuildsQuery, Outcomes, PollSnapshot, Result, Revision,
    RunBuildsParams, SdkCiError, CONFIG_FILE_NAME, OAS_FILE_NAME,
};

fn single_params() -> RunBuildsParams {
    RunBuildsParams {
        project: "acme".to_string(),
        branch: "main".to_string(),
        oas_content: Some("openapi: 3.1.0".to_string()),
        ..Default::default()
    }
}

async fn collect(run: BuildRun) -> Vec<BuildSnapshot> {
    match run {
        BuildRun::Running(stream) => {
            stream
                .map(|item| item.expect("snapshot"))
                .collect()
                .await
        }
        BuildRun::NoChanges => panic!("expected a running build"),
    }
}

fn create_call(calls: &[ApiCall]) -> &sdkci_core::CreateBuildParams {
    calls
        .iter()
        .find_map(|c| match c {
            ApiCall::CreateBuild(params) => Some(params),
            _ => None,
        })
        .expect("create_build was called")
}

// ── Single build ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn single_build_streams_head_outcomes_only() {
    let created = build("b1", [("node", in_progress_target())]);
    let api = Arc::new(
        FakeBuildApi::new()
            .with_created_build(created)
            .with_polls(
                "b1",
                vec![build("b1", [("node", completed_target(CommitConclusion::Success))])],
            ),
    );

    let run = run_builds(api.clone(), single_params()).await.unwrap();
    let snapshots = collect(run).await;

    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].base_outcomes.is_none());
    assert_eq!(
        snapshots[0].outcomes["node"].commit_conclusion(),
        Some(&CommitConclusion::Success)
    );

    let calls = api.calls();
    let params = create_call(&calls);
    assert!(params.allow_empty);
    let Revision::Files(files) = &params.revision else {
        panic!("expected inline files");
    };
    assert_eq!(files[OAS_FILE_NAME].content, "openapi: 3.1.0");
    assert!(!files.contains_key(CONFIG_FILE_NAME));
}

#[tokio::test(start_paused = true)]
async fn no_changes_is_a_result_not_an_error() {
    let api = Arc::new(FakeBuildApi::new().with_no_changes());

    let run = run_builds(api.clone(), single_params()).await.unwrap();

    assert!(matches!(run, BuildRun::NoChanges));
    assert!(api
        .calls()
        .iter()
        .all(|c| !matches!(c, ApiCall::RetrieveBuild(_))));
}

#[tokio::test(start_paused = true)]
async fn merge_branch_submits_a_diff_revision() {
    let api = Arc::new(FakeBuildApi::new().with_no_changes());
    let params = RunBuildsParams {
        merge_branch: Some("preview/feature".to_string()),
        oas_content: None,
        ..single_params()
    };

    run_builds(api.clone(), params).await.unwrap();

    let calls = api.calls();
    assert_eq!(
        create_call(&calls).revision,
        Revision::Ref("main..preview/feature".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn guessed_config_is_submitted_with_the_spec() {
    let api = Arc::new(
        FakeBuildApi::new()
            .with_guessed_config("targets: {}")
            .with_no_changes(),
    );
    let params = RunBuildsParams {
        guess_config: true,
        ..single_params()
    };

    run_builds(api.clone(), params).await.unwrap();

    let calls = api.calls();
    assert_eq!(
        calls[0],
        ApiCall::GuessConfig(GuessConfigSource::Spec("openapi: 3.1.0".to_string()))
    );
    assert_eq!(
        create_call(&calls).revision,
        Revision::files(Some("openapi: 3.1.0"), Some("targets: {}"))
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_flags_fail_before_any_request() {
    let api = Arc::new(FakeBuildApi::new());
    let params = RunBuildsParams {
        merge_branch: Some("preview/feature".to_string()),
        ..single_params()
    };

    let err = run_builds(api.clone(), params).await.unwrap_err();

    assert!(matches!(
        err,
        SdkCiError::Config(ConfigError::MergeBranchWithInlineContent)
    ));
    assert!(api.calls().is_empty());
}

// ── Comparison ──────────────────────────────────────────────────────────

fn comparison_params() -> RunBuildsParams {
    RunBuildsParams {
        project: "acme".to_string(),
        branch: "preview/feature".to_string(),
        branch_from: Some("main".to_string()),
        base_branch: Some("preview/base/feature".to_string()),
        oas_content: Some("head spec".to_string()),
        base_oas_content: Some("base spec".to_string()),
        ..Default::default()
    }
}

fn comparison_api() -> FakeBuildApi {
    let base = build("base", [("node", in_progress_target())]);
    let head = build("head", [("node", in_progress_target())]);
    FakeBuildApi::new()
        .with_branch("preview/feature", "edited on branch")
        .with_build_summary("main", &revision_hash("base spec"), "cc_base")
        .with_compare(base, head)
        .with_polls(
            "base",
            vec![build("base", [("node", completed_target(CommitConclusion::Warning))])],
        )
        .with_polls(
            "head",
            vec![build("head", [("node", completed_target(CommitConclusion::Error))])],
        )
}

#[tokio::test(start_paused = true)]
async fn comparison_resets_branches_before_comparing() {
    let api = Arc::new(comparison_api());

    let run = run_builds(api.clone(), comparison_params()).await.unwrap();
    let snapshots = collect(run).await;

    let calls = api.calls();
    assert_eq!(
        &calls[..7],
        &[
            ApiCall::RetrieveBranch("preview/feature".to_string()),
            ApiCall::RetrieveConfig("preview/feature".to_string()),
            ApiCall::RetrieveBranch("preview/base/feature".to_string()),
            ApiCall::ListBuilds(ListBuildsQuery {
                project: "acme".to_string(),
                branch: Some("main".to_string()),
                revision_hash: Some(revision_hash("base spec")),
                limit: 1,
            }),
            ApiCall::CreateBranch(CreateBranchParams {
                branch: "preview/feature".to_string(),
                branch_from: "main".to_string(),
                force: true,
            }),
            ApiCall::CreateBranch(CreateBranchParams {
                branch: "preview/base/feature".to_string(),
                branch_from: "cc_base".to_string(),
                force: true,
            }),
            match &calls[6] {
                ApiCall::CompareBuilds(params) => ApiCall::CompareBuilds(params.clone()),
                other => panic!("expected compare_builds, got {other:?}"),
            },
        ]
    );

    let ApiCall::CompareBuilds(compare) = &calls[6] else {
        unreachable!()
    };
    assert_eq!(
        compare.head.revision,
        Revision::files(Some("head spec"), Some("edited on branch"))
    );
    assert_eq!(compare.base.revision, Revision::files(Some("base spec"), None));

    let last = snapshots.last().expect("at least one snapshot");
    let base = last.base_outcomes.as_ref().expect("base outcomes");
    assert_eq!(
        base["node"].commit_conclusion(),
        Some(&CommitConclusion::Warning)
    );
    assert_eq!(
        last.outcomes["node"].commit_conclusion(),
        Some(&CommitConclusion::Error)
    );
}

#[tokio::test(start_paused = true)]
async fn comparison_guesses_config_for_both_sides() {
    let api = Arc::new(comparison_api().with_guessed_config("targets: {node: {}}"));
    let params = RunBuildsParams {
        guess_config: true,
        ..comparison_params()
    };

    let run = run_builds(api.clone(), params).await.unwrap();
    collect(run).await;

    let calls = api.calls();
    assert_eq!(
        &calls[..2],
        &[
            ApiCall::GuessConfig(GuessConfigSource::Spec("head spec".to_string())),
            ApiCall::GuessConfig(GuessConfigSource::Spec("base spec".to_string())),
        ]
    );
    // The existing head branch's config is ignored when guessing.
    assert!(!calls.iter().any(|c| matches!(
        c,
        ApiCall::RetrieveBranch(_) | ApiCall::RetrieveConfig(_)
    )));

    let compare = calls
        .iter()
        .find_map(|c| match c {
            ApiCall::CompareBuilds(p) => Some(p),
            _ => None,
        })
        .expect("compare_builds was called");
    assert_eq!(
        compare.head.revision,
        Revision::files(Some("head spec"), Some("targets: {node: {}}"))
    );
    assert_eq!(
        compare.base.revision,
        Revision::files(Some("base spec"), Some("targets: {node: {}}"))
    );
}

#[tokio::test(start_paused = true)]
async fn base_without_spec_builds_the_base_branch_ref() {
    let api = Arc::new(comparison_api());
    let params = RunBuildsParams {
        base_oas_content: None,
        ..comparison_params()
    };

    let run = run_builds(api.clone(), params).await.unwrap();
    collect(run).await;

    let calls = api.calls();
    assert!(!calls.iter().any(|c| matches!(c, ApiCall::ListBuilds(_))));
    let compare = calls
        .iter()
        .find_map(|c| match c {
            ApiCall::CompareBuilds(p) => Some(p),
            _ => None,
        })
        .expect("compare_builds was called");
    assert_eq!(
        compare.base.revision,
        Revision::Ref("preview/base/feature".to_string())
    );
}

// ── Fan-in ──────────────────────────────────────────────────────────────

fn outcomes(conclusion: CommitConclusion) -> Outcomes {
    [("node".to_string(), completed_target(conclusion))]
        .into_iter()
        .collect()
}

/// A source that yields each snapshot after its delay, relative to the
/// previous one.
fn timed(items: Vec<(u64, CommitConclusion)>) -> BoxStream<'static, Result<PollSnapshot>> {
    stream::iter(items)
        .then(|(delay, conclusion)| async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            Ok(PollSnapshot {
                outcomes: outcomes(conclusion),
                documented_spec: None,
            })
        })
        .boxed()
}

fn conclusion_of(outcomes: &Outcomes) -> &CommitConclusion {
    outcomes["node"].commit_conclusion().expect("completed")
}

#[tokio::test(start_paused = true)]
async fn base_updates_ride_along_with_head_updates() {
    // base at t=1 and t=3, head at t=2.
    let base = timed(vec![
        (1, CommitConclusion::Note),
        (2, CommitConclusion::Warning),
    ]);
    let head = timed(vec![(2, CommitConclusion::Success)]);

    let snapshots: Vec<_> = fan_in(base, head)
        .map(|item| item.expect("snapshot"))
        .collect()
        .await;

    assert_eq!(snapshots.len(), 2);
    let first_base = snapshots[0].base_outcomes.as_ref().expect("base");
    assert_eq!(conclusion_of(first_base), &CommitConclusion::Note);
    // The base finished after the head: one trailing snapshot carries it.
    let final_base = snapshots[1].base_outcomes.as_ref().expect("base");
    assert_eq!(conclusion_of(final_base), &CommitConclusion::Warning);
    assert_eq!(conclusion_of(&snapshots[1].outcomes), &CommitConclusion::Success);
}

#[tokio::test(start_paused = true)]
async fn head_before_any_base_has_no_base_outcomes() {
    let base = timed(vec![(5, CommitConclusion::Success)]);
    let head = timed(vec![(1, CommitConclusion::Note), (1, CommitConclusion::Success)]);

    let snapshots: Vec<_> = fan_in(base, head)
        .map(|item| item.expect("snapshot"))
        .collect()
        .await;

    assert_eq!(snapshots.len(), 3);
    assert!(snapshots[0].base_outcomes.is_none());
    assert!(snapshots[1].base_outcomes.is_none());
    assert!(snapshots[2].base_outcomes.is_some());
}

#[tokio::test(start_paused = true)]
async fn base_only_updates_are_silent_while_head_is_running() {
    let base = timed(vec![
        (1, CommitConclusion::Note),
        (1, CommitConclusion::Warning),
        (1, CommitConclusion::Error),
    ]);
    let head = timed(vec![(10, CommitConclusion::Success)]);

    let snapshots: Vec<_> = fan_in(base, head)
        .map(|item| item.expect("snapshot"))
        .collect()
        .await;

    assert_eq!(snapshots.len(), 1);
    let base = snapshots[0].base_outcomes.as_ref().expect("base");
    assert_eq!(conclusion_of(base), &CommitConclusion::Error);
}

#[tokio::test(start_paused = true)]
async fn errors_end_the_fan_in() {
    let base: BoxStream<'static, Result<PollSnapshot>> = stream::iter(vec![Err(
        SdkCiError::Api(sdkci_core::ApiError::Transport("reset".to_string())),
    )])
    .boxed();
    let head = timed(vec![(1, CommitConclusion::Success)]);

    let items: Vec<_> = fan_in(base, head).collect().await;

    assert_eq!(items.len(), 1);
    assert!(items[0].is_err());
}
