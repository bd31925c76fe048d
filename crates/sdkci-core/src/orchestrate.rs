//! Submission of builds and fan-in of their pollers.
//!
//! [`run_builds`] validates the submission mode, creates either one build or
//! a base/head comparison pair, and returns a stream of [`BuildSnapshot`]s.
//! In comparison mode the stream advances on head updates; base updates are
//! remembered and ride along with the next head snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::api::{
    BuildApi, CompareBuildsParams, CompareSide, CreateBranchParams, CreateBuildOutcome,
    CreateBuildParams, GuessConfigSource, ListBuildsQuery, Revision,
};
use crate::combinator::{combine_streams, CombineStreams};
use crate::error::{ConfigError, Result};
use crate::model::Outcomes;
use crate::poll::{poll_build, BuildRole, PollConfig, PollSnapshot};

/// Everything needed to submit builds for one run.
#[derive(Debug, Clone, Default)]
pub struct RunBuildsParams {
    pub project: String,
    /// Branch the (head) build is made on.
    pub branch: String,
    /// Reset `branch` and `base_branch` to this branch and compare them.
    pub branch_from: Option<String>,
    pub base_branch: Option<String>,
    /// Build `branch` with the changes of this branch applied.
    pub merge_branch: Option<String>,
    pub oas_content: Option<String>,
    pub config_content: Option<String>,
    pub base_oas_content: Option<String>,
    pub base_config_content: Option<String>,
    pub guess_config: bool,
    pub commit_message: Option<String>,
    pub target_commit_messages: Option<BTreeMap<String, String>>,
    pub poll: PollConfig,
}

/// How builds get submitted for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// One build from a `branch..merge_branch` diff.
    MergeBranch,
    /// One build from inline content.
    Single,
    /// Base and head builds after resetting both branches.
    Comparison,
}

/// One item of the orchestrator's output.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSnapshot {
    /// `None` outside comparison mode, or before the base build reported.
    pub base_outcomes: Option<Outcomes>,
    pub outcomes: Outcomes,
    pub documented_spec: Option<String>,
}

pub enum BuildRun {
    /// The revision had nothing to commit. Not an error.
    NoChanges,
    Running(BoxStream<'static, Result<BuildSnapshot>>),
}

impl std::fmt::Debug for BuildRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildRun::NoChanges => f.write_str("NoChanges"),
            BuildRun::Running(_) => f.write_str("Running(..)"),
        }
    }
}

/// Check the flag combination and pick a submission mode.
pub fn select_mode(params: &RunBuildsParams) -> std::result::Result<SubmissionMode, ConfigError> {
    let has_inline = params.oas_content.is_some() || params.config_content.is_some();

    if params.merge_branch.is_some() && has_inline {
        return Err(ConfigError::MergeBranchWithInlineContent);
    }
    if params.guess_config {
        if params.config_content.is_some() {
            return Err(ConfigError::GuessConfigWithConfig);
        }
        if params.oas_content.is_none() {
            return Err(ConfigError::GuessConfigRequiresOas);
        }
    }

    match (&params.merge_branch, &params.branch_from) {
        (Some(_), Some(_)) => Err(ConfigError::MergeBranchWithComparison),
        (Some(_), None) => Ok(SubmissionMode::MergeBranch),
        (None, None) if has_inline => Ok(SubmissionMode::Single),
        (None, None) => Err(ConfigError::MissingRevision),
        (None, Some(_)) => {
            if params.oas_content.is_none() {
                Err(ConfigError::MissingHeadSpec)
            } else if params.base_branch.is_none() {
                Err(ConfigError::MissingBaseBranch)
            } else {
                Ok(SubmissionMode::Comparison)
            }
        }
    }
}

/// Lowercase hex SHA-256 of spec content, used to look up earlier builds of
/// the same spec.
pub fn revision_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Submit builds and stream their combined outcomes.
pub async fn run_builds(api: Arc<dyn BuildApi>, params: RunBuildsParams) -> Result<BuildRun> {
    match select_mode(&params)? {
        SubmissionMode::MergeBranch | SubmissionMode::Single => run_single(api, params).await,
        SubmissionMode::Comparison => run_comparison(api, params).await,
    }
}

async fn run_single(api: Arc<dyn BuildApi>, params: RunBuildsParams) -> Result<BuildRun> {
    let revision = match &params.merge_branch {
        Some(merge_branch) => Revision::diff(&params.branch, merge_branch),
        None => {
            let config = if params.guess_config {
                let oas = params.oas_content.clone().unwrap_or_default();
                Some(
                    api.guess_config(&params.project, GuessConfigSource::Spec(oas))
                        .await?,
                )
            } else {
                params.config_content.clone()
            };
            Revision::files(params.oas_content.as_deref(), config.as_deref())
        }
    };

    let outcome = api
        .create_build(CreateBuildParams {
            project: params.project.clone(),
            branch: params.branch.clone(),
            revision,
            commit_message: params.commit_message.clone(),
            allow_empty: true,
            target_commit_messages: params.target_commit_messages.clone(),
        })
        .await?;

    let build = match outcome {
        CreateBuildOutcome::NoChanges => {
            info!(branch = %params.branch, "no changes to commit");
            return Ok(BuildRun::NoChanges);
        }
        CreateBuildOutcome::Created(build) => build,
    };
    info!(build_id = %build.id, branch = %params.branch, "created build");

    let snapshots = poll_build(api, &build, BuildRole::Head, params.poll).map(|item| {
        item.map(|snapshot| BuildSnapshot {
            base_outcomes: None,
            outcomes: snapshot.outcomes,
            documented_spec: snapshot.documented_spec,
        })
    });
    Ok(BuildRun::Running(snapshots.boxed()))
}

/// Config content to submit for one side of a comparison. `None` leaves the
/// config as it is on the branch the side is reset to.
async fn resolve_config(
    api: &dyn BuildApi,
    project: &str,
    branch: &str,
    guess_config: bool,
    oas_content: Option<&str>,
    config_content: Option<&str>,
) -> Result<Option<String>> {
    if guess_config {
        if let Some(oas) = oas_content {
            debug!(branch = %branch, "guessing config from spec");
            let guessed = api
                .guess_config(project, GuessConfigSource::Spec(oas.to_string()))
                .await?;
            return Ok(Some(guessed));
        }
    }
    if let Some(config) = config_content {
        return Ok(Some(config.to_string()));
    }
    // Keep config edits made directly on an existing branch before it is reset.
    if api.retrieve_branch(project, branch).await?.is_some() {
        debug!(branch = %branch, "reusing config from existing branch");
        return Ok(Some(api.retrieve_config(project, branch).await?));
    }
    Ok(None)
}

async fn run_comparison(api: Arc<dyn BuildApi>, params: RunBuildsParams) -> Result<BuildRun> {
    let project = params.project.as_str();
    let branch_from = params.branch_from.clone().unwrap_or_default();
    let base_branch = params.base_branch.clone().unwrap_or_default();

    let head_config = resolve_config(
        api.as_ref(),
        project,
        &params.branch,
        params.guess_config,
        params.oas_content.as_deref(),
        params.config_content.as_deref(),
    )
    .await?;
    let base_config = resolve_config(
        api.as_ref(),
        project,
        &base_branch,
        params.guess_config,
        params.base_oas_content.as_deref(),
        params.base_config_content.as_deref(),
    )
    .await?;

    // Start the base branch from the config commit that already built the
    // base spec, if there is one.
    let mut base_from = branch_from.clone();
    if let Some(base_oas) = &params.base_oas_content {
        let earlier = api
            .list_builds(ListBuildsQuery {
                project: project.to_string(),
                branch: Some(branch_from.clone()),
                revision_hash: Some(revision_hash(base_oas)),
                limit: 1,
            })
            .await?;
        if let Some(found) = earlier.into_iter().next() {
            debug!(config_commit = %found.config_commit, "base branch starts from earlier build");
            base_from = found.config_commit;
        }
    }

    api.create_branch(
        project,
        CreateBranchParams {
            branch: params.branch.clone(),
            branch_from: branch_from.clone(),
            force: true,
        },
    )
    .await?;
    api.create_branch(
        project,
        CreateBranchParams {
            branch: base_branch.clone(),
            branch_from: base_from,
            force: true,
        },
    )
    .await?;

    let base_revision = match &params.base_oas_content {
        Some(oas) => Revision::files(Some(oas), base_config.as_deref()),
        None if base_config.is_some() => Revision::files(None, base_config.as_deref()),
        None => Revision::Ref(base_branch.clone()),
    };

    let pair = api
        .compare_builds(CompareBuildsParams {
            project: project.to_string(),
            base: CompareSide {
                branch: base_branch,
                revision: base_revision,
                commit_message: None,
            },
            head: CompareSide {
                branch: params.branch.clone(),
                revision: Revision::files(params.oas_content.as_deref(), head_config.as_deref()),
                commit_message: params.commit_message.clone(),
            },
        })
        .await?;
    info!(
        base_build_id = %pair.base.id,
        head_build_id = %pair.head.id,
        "created comparison builds"
    );

    let base = poll_build(api.clone(), &pair.base, BuildRole::Base, params.poll);
    let head = poll_build(api, &pair.head, BuildRole::Head, params.poll);
    Ok(BuildRun::Running(fan_in(base, head)))
}

const BASE: usize = 0;
const HEAD: usize = 1;

struct FanIn {
    sources: CombineStreams<BoxStream<'static, Result<PollSnapshot>>>,
    last_base: Option<Outcomes>,
    last_head: Option<PollSnapshot>,
    /// A base update arrived after the last emitted snapshot.
    base_pending: bool,
    finished: bool,
}

impl FanIn {
    fn combined(&self) -> Option<BuildSnapshot> {
        self.last_head.as_ref().map(|head| BuildSnapshot {
            base_outcomes: self.last_base.clone(),
            outcomes: head.outcomes.clone(),
            documented_spec: head.documented_spec.clone(),
        })
    }

    async fn next(&mut self) -> Option<Result<BuildSnapshot>> {
        if self.finished {
            return None;
        }
        while let Some(tagged) = self.sources.next().await {
            let snapshot = match tagged.value {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            };
            if tagged.index == BASE {
                self.last_base = Some(snapshot.outcomes);
                self.base_pending = true;
                continue;
            }
            debug_assert_eq!(tagged.index, HEAD);
            self.last_head = Some(snapshot);
            self.base_pending = false;
            return self.combined().map(Ok);
        }

        self.finished = true;
        // Base updates normally never yield on their own. The one exception:
        // a slow base that keeps changing after the head's last update would
        // otherwise leave the final snapshot with stale base outcomes, so the
        // close of both streams flushes it once.
        if self.base_pending {
            return self.combined().map(Ok);
        }
        None
    }
}

/// Merge base and head poll streams. A snapshot is emitted for every head
/// update; base updates only refresh the base outcomes carried along.
pub fn fan_in(
    base: BoxStream<'static, Result<PollSnapshot>>,
    head: BoxStream<'static, Result<PollSnapshot>>,
) -> BoxStream<'static, Result<BuildSnapshot>> {
    // Source indices must line up with BASE and HEAD.
    let state = FanIn {
        sources: combine_streams([base, head]),
        last_base: None,
        last_head: None,
        base_pending: false,
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        let item = state.next().await?;
        Some((item, state))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RunBuildsParams {
        RunBuildsParams {
            project: "acme".to_string(),
            branch: "main".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn merge_branch_rejects_inline_content() {
        let p = RunBuildsParams {
            merge_branch: Some("preview/x".to_string()),
            oas_content: Some("openapi: 3.1.0".to_string()),
            ..params()
        };
        assert_eq!(select_mode(&p), Err(ConfigError::MergeBranchWithInlineContent));
    }

    #[test]
    fn guess_config_needs_oas_and_no_config() {
        let p = RunBuildsParams {
            guess_config: true,
            ..params()
        };
        assert_eq!(select_mode(&p), Err(ConfigError::GuessConfigRequiresOas));

        let p = RunBuildsParams {
            guess_config: true,
            oas_content: Some("spec".to_string()),
            config_content: Some("config".to_string()),
            ..params()
        };
        assert_eq!(select_mode(&p), Err(ConfigError::GuessConfigWithConfig));
    }

    #[test]
    fn modes_are_selected() {
        let single = RunBuildsParams {
            oas_content: Some("spec".to_string()),
            ..params()
        };
        assert_eq!(select_mode(&single), Ok(SubmissionMode::Single));

        let merge = RunBuildsParams {
            merge_branch: Some("preview/x".to_string()),
            ..params()
        };
        assert_eq!(select_mode(&merge), Ok(SubmissionMode::MergeBranch));

        let compare = RunBuildsParams {
            branch_from: Some("main".to_string()),
            base_branch: Some("preview/base/x".to_string()),
            oas_content: Some("spec".to_string()),
            ..params()
        };
        assert_eq!(select_mode(&compare), Ok(SubmissionMode::Comparison));
    }

    #[test]
    fn comparison_requires_base_branch_and_spec() {
        let no_base = RunBuildsParams {
            branch_from: Some("main".to_string()),
            oas_content: Some("spec".to_string()),
            ..params()
        };
        assert_eq!(select_mode(&no_base), Err(ConfigError::MissingBaseBranch));

        let no_spec = RunBuildsParams {
            branch_from: Some("main".to_string()),
            base_branch: Some("preview/base/x".to_string()),
            ..params()
        };
        assert_eq!(select_mode(&no_spec), Err(ConfigError::MissingHeadSpec));
    }

    #[test]
    fn nothing_to_build_is_a_config_error() {
        assert_eq!(select_mode(&params()), Err(ConfigError::MissingRevision));
    }

    #[test]
    fn revision_hash_is_sha256_hex() {
        let hash = revision_hash("openapi: 3.1.0");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, revision_hash("openapi: 3.1.0"));
        assert_ne!(hash, revision_hash("openapi: 3.0.0"));
    }
}
