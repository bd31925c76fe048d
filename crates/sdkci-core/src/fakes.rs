//! In-memory [`BuildApi`] for tests.
//!
//! Responses are scripted up front with the `with_*` builders; every call is
//! recorded so tests can assert on ordering and arguments.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::api::{
    BranchInfo, BuildApi, BuildPair, BuildSummary, CompareBuildsParams, CreateBranchParams,
    CreateBuildOutcome, CreateBuildParams, GuessConfigSource, ListBuildsQuery,
};
use crate::error::{ApiError, ApiResult};
use crate::model::{
    Build, BuildTarget, CommitConclusion, CommitResult, Diagnostic, DocumentedSpecRef,
    TargetStatus,
};

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateBuild(CreateBuildParams),
    CompareBuilds(CompareBuildsParams),
    RetrieveBuild(String),
    ListDiagnostics(String),
    GuessConfig(GuessConfigSource),
    RetrieveConfig(String),
    CreateBranch(CreateBranchParams),
    RetrieveBranch(String),
    ListBuilds(ListBuildsQuery),
    GenerateCommitMessage { target: String },
    DownloadDocumentedSpec(String),
}

#[derive(Default)]
struct FakeState {
    create_outcomes: VecDeque<CreateBuildOutcome>,
    compare: Option<BuildPair>,
    polls: HashMap<String, VecDeque<Build>>,
    diagnostics: HashMap<String, ApiResult<Vec<Diagnostic>>>,
    branches: BTreeMap<String, BranchInfo>,
    configs: BTreeMap<String, String>,
    guessed_config: Option<String>,
    build_summaries: Vec<(String, String, BuildSummary)>,
    commit_messages: BTreeMap<String, String>,
    documented_spec: Option<String>,
    calls: Vec<ApiCall>,
}

#[derive(Default)]
pub struct FakeBuildApi {
    state: Mutex<FakeState>,
}

impl FakeBuildApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: ApiCall) {
        self.state().calls.push(call);
    }

    /// Queue the result of the next `create_build`.
    pub fn with_created_build(self, build: Build) -> Self {
        self.state()
            .create_outcomes
            .push_back(CreateBuildOutcome::Created(build));
        self
    }

    pub fn with_no_changes(self) -> Self {
        self.state()
            .create_outcomes
            .push_back(CreateBuildOutcome::NoChanges);
        self
    }

    pub fn with_compare(self, base: Build, head: Build) -> Self {
        self.state().compare = Some(BuildPair { base, head });
        self
    }

    /// Successive `retrieve_build` responses for one build. The last one is
    /// repeated once the others are used up.
    pub fn with_polls(self, build_id: &str, polls: Vec<Build>) -> Self {
        self.state()
            .polls
            .insert(build_id.to_string(), polls.into_iter().collect());
        self
    }

    pub fn with_diagnostics(self, build_id: &str, diagnostics: Vec<Diagnostic>) -> Self {
        self.state()
            .diagnostics
            .insert(build_id.to_string(), Ok(diagnostics));
        self
    }

    pub fn with_failing_diagnostics(self, build_id: &str) -> Self {
        self.state().diagnostics.insert(
            build_id.to_string(),
            Err(ApiError::Http {
                status: 500,
                body: "diagnostics unavailable".to_string(),
            }),
        );
        self
    }

    /// An existing branch, with the config stored on it.
    pub fn with_branch(self, branch: &str, config: &str) -> Self {
        {
            let mut state = self.state();
            state.branches.insert(
                branch.to_string(),
                BranchInfo {
                    branch: branch.to_string(),
                    config_commit: Some(format!("{branch}-config")),
                },
            );
            state
                .configs
                .insert(branch.to_string(), config.to_string());
        }
        self
    }

    pub fn with_guessed_config(self, config: &str) -> Self {
        self.state().guessed_config = Some(config.to_string());
        self
    }

    /// A finished build of `revision_hash` on `branch`.
    pub fn with_build_summary(
        self,
        branch: &str,
        revision_hash: &str,
        config_commit: &str,
    ) -> Self {
        let summary = BuildSummary {
            id: format!("build-{config_commit}"),
            config_commit: config_commit.to_string(),
        };
        self.state().build_summaries.push((
            branch.to_string(),
            revision_hash.to_string(),
            summary,
        ));
        self
    }

    pub fn with_commit_message(self, target: &str, message: &str) -> Self {
        self.state()
            .commit_messages
            .insert(target.to_string(), message.to_string());
        self
    }

    pub fn with_documented_spec(self, content: &str) -> Self {
        self.state().documented_spec = Some(content.to_string());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    pub fn retrieve_count(&self, build_id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, ApiCall::RetrieveBuild(id) if id == build_id))
            .count()
    }

    pub fn diagnostics_count(&self, build_id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, ApiCall::ListDiagnostics(id) if id == build_id))
            .count()
    }
}

#[async_trait]
impl BuildApi for FakeBuildApi {
    async fn create_build(&self, params: CreateBuildParams) -> ApiResult<CreateBuildOutcome> {
        self.record(ApiCall::CreateBuild(params));
        self.state()
            .create_outcomes
            .pop_front()
            .ok_or_else(|| ApiError::NotFound("no scripted build".to_string()))
    }

    async fn compare_builds(&self, params: CompareBuildsParams) -> ApiResult<BuildPair> {
        self.record(ApiCall::CompareBuilds(params));
        self.state()
            .compare
            .clone()
            .ok_or_else(|| ApiError::NotFound("no scripted comparison".to_string()))
    }

    async fn retrieve_build(&self, build_id: &str) -> ApiResult<Build> {
        self.record(ApiCall::RetrieveBuild(build_id.to_string()));
        let mut state = self.state();
        let queue = state
            .polls
            .get_mut(build_id)
            .ok_or_else(|| ApiError::NotFound(format!("build {build_id}")))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.ok_or_else(|| ApiError::NotFound(format!("build {build_id}")))
    }

    async fn list_diagnostics(&self, build_id: &str) -> ApiResult<Vec<Diagnostic>> {
        self.record(ApiCall::ListDiagnostics(build_id.to_string()));
        self.state()
            .diagnostics
            .get(build_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn guess_config(&self, _project: &str, source: GuessConfigSource) -> ApiResult<String> {
        self.record(ApiCall::GuessConfig(source));
        self.state()
            .guessed_config
            .clone()
            .ok_or_else(|| ApiError::NotFound("no guessed config".to_string()))
    }

    async fn retrieve_config(&self, _project: &str, branch: &str) -> ApiResult<String> {
        self.record(ApiCall::RetrieveConfig(branch.to_string()));
        self.state()
            .configs
            .get(branch)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("config on {branch}")))
    }

    async fn create_branch(
        &self,
        _project: &str,
        params: CreateBranchParams,
    ) -> ApiResult<BranchInfo> {
        self.record(ApiCall::CreateBranch(params.clone()));
        let info = BranchInfo {
            branch: params.branch.clone(),
            config_commit: Some(params.branch_from.clone()),
        };
        self.state().branches.insert(params.branch, info.clone());
        Ok(info)
    }

    async fn retrieve_branch(&self, _project: &str, branch: &str) -> ApiResult<Option<BranchInfo>> {
        self.record(ApiCall::RetrieveBranch(branch.to_string()));
        Ok(self.state().branches.get(branch).cloned())
    }

    async fn list_builds(&self, query: ListBuildsQuery) -> ApiResult<Vec<BuildSummary>> {
        self.record(ApiCall::ListBuilds(query.clone()));
        let state = self.state();
        let matching = state
            .build_summaries
            .iter()
            .filter(|(branch, hash, _)| {
                query.branch.as_deref().map_or(true, |b| b == branch)
                    && query.revision_hash.as_deref().map_or(true, |h| h == hash)
            })
            .map(|(_, _, summary)| summary.clone())
            .take(query.limit as usize)
            .collect();
        Ok(matching)
    }

    async fn generate_commit_message(
        &self,
        _project: &str,
        target: &str,
        _base_ref: &str,
        _head_ref: &str,
    ) -> ApiResult<String> {
        self.record(ApiCall::GenerateCommitMessage {
            target: target.to_string(),
        });
        self.state()
            .commit_messages
            .get(target)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("commit message for {target}")))
    }

    async fn download_documented_spec(&self, spec: &DocumentedSpecRef) -> ApiResult<String> {
        self.record(ApiCall::DownloadDocumentedSpec(spec.url.clone()));
        self.state()
            .documented_spec
            .clone()
            .ok_or_else(|| ApiError::NotFound(spec.url.clone()))
    }
}

/// A build with the given targets.
pub fn build<'a>(id: &str, targets: impl IntoIterator<Item = (&'a str, BuildTarget)>) -> Build {
    Build {
        id: id.to_string(),
        targets: targets
            .into_iter()
            .map(|(lang, target)| (lang.to_string(), target))
            .collect(),
        config_commit: None,
        documented_spec: None,
    }
}

pub fn in_progress_target() -> BuildTarget {
    BuildTarget::new(TargetStatus::InProgress)
}

/// A finished target whose commit concluded with `conclusion`.
pub fn completed_target(conclusion: CommitConclusion) -> BuildTarget {
    BuildTarget {
        commit: Some(CommitResult::completed(conclusion)),
        ..BuildTarget::new(TargetStatus::Completed)
    }
}
