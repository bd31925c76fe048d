//! The build API boundary.
//!
//! `BuildApi` is the only way the poller and orchestrator talk to the build
//! service. `sdkci-api` provides the HTTP implementation and
//! [`crate::fakes::FakeBuildApi`] an in-memory one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::model::{Build, Diagnostic, DocumentedSpecRef};

/// File name the spec is submitted under in an inline revision.
pub const OAS_FILE_NAME: &str = "openapi.yml";

/// File name the generator config is submitted under in an inline revision.
pub const CONFIG_FILE_NAME: &str = "openapi.config.yml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    pub content: String,
}

/// What a build is generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Revision {
    /// A branch, a commit, or a `base..head` branch diff.
    Ref(String),
    /// Inline file contents keyed by file name.
    Files(BTreeMap<String, FileInput>),
}

impl Revision {
    /// Revision that applies the changes of `head` on top of `base`.
    pub fn diff(base: &str, head: &str) -> Self {
        Revision::Ref(format!("{base}..{head}"))
    }

    /// Inline revision from optional spec and config contents.
    pub fn files(oas: Option<&str>, config: Option<&str>) -> Self {
        let mut files = BTreeMap::new();
        if let Some(oas) = oas {
            files.insert(
                OAS_FILE_NAME.to_string(),
                FileInput {
                    content: oas.to_string(),
                },
            );
        }
        if let Some(config) = config {
            files.insert(
                CONFIG_FILE_NAME.to_string(),
                FileInput {
                    content: config.to_string(),
                },
            );
        }
        Revision::Files(files)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBuildParams {
    pub project: String,
    pub branch: String,
    pub revision: Revision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    pub allow_empty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_commit_messages: Option<BTreeMap<String, String>>,
}

/// Result of asking the service to create a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateBuildOutcome {
    Created(Build),
    /// The revision produced no changes on the branch.
    NoChanges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareSide {
    pub branch: String,
    pub revision: Revision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareBuildsParams {
    pub project: String,
    pub base: CompareSide,
    pub head: CompareSide,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPair {
    pub base: Build,
    pub head: Build,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBranchParams {
    pub branch: String,
    pub branch_from: String,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBuildsQuery {
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_hash: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub id: String,
    pub config_commit: String,
}

/// Input a config is inferred from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuessConfigSource {
    Spec(String),
    Branch(String),
}

/// Operations the core needs from the build service.
#[async_trait]
pub trait BuildApi: Send + Sync {
    async fn create_build(&self, params: CreateBuildParams) -> ApiResult<CreateBuildOutcome>;

    async fn compare_builds(&self, params: CompareBuildsParams) -> ApiResult<BuildPair>;

    /// Full current state of a build.
    async fn retrieve_build(&self, build_id: &str) -> ApiResult<Build>;

    /// Every diagnostic of a build, following pagination to the end.
    async fn list_diagnostics(&self, build_id: &str) -> ApiResult<Vec<Diagnostic>>;

    async fn guess_config(&self, project: &str, source: GuessConfigSource) -> ApiResult<String>;

    async fn retrieve_config(&self, project: &str, branch: &str) -> ApiResult<String>;

    async fn create_branch(&self, project: &str, params: CreateBranchParams)
        -> ApiResult<BranchInfo>;

    /// `None` when the branch does not exist.
    async fn retrieve_branch(&self, project: &str, branch: &str) -> ApiResult<Option<BranchInfo>>;

    async fn list_builds(&self, query: ListBuildsQuery) -> ApiResult<Vec<BuildSummary>>;

    async fn generate_commit_message(
        &self,
        project: &str,
        target: &str,
        base_ref: &str,
        head_ref: &str,
    ) -> ApiResult<String>;

    async fn download_documented_spec(&self, spec: &DocumentedSpecRef) -> ApiResult<String>;
}
