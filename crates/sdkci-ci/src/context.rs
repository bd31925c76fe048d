//! CI run context, read once from the environment at startup.
//!
//! GitHub Actions is detected by `GITHUB_ACTIONS=true` and reads the
//! pull request from the event payload at `GITHUB_EVENT_PATH`. GitLab CI is
//! detected by `GITLAB_CI=true` and reads the `CI_*` merge request
//! variables. Anything else is a local run.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiProvider {
    GitHub,
    GitLab,
    Local,
}

impl CiProvider {
    pub fn detect(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let is_true = |key: &str| lookup(key).is_some_and(|v| v == "true");
        if is_true("GITHUB_ACTIONS") {
            CiProvider::GitHub
        } else if is_true("GITLAB_CI") {
            CiProvider::GitLab
        } else {
            CiProvider::Local
        }
    }
}

impl fmt::Display for CiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CiProvider::GitHub => f.write_str("github"),
            CiProvider::GitLab => f.write_str("gitlab"),
            CiProvider::Local => f.write_str("local"),
        }
    }
}

/// Where the run is happening and what it is building.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiContext {
    pub provider: Option<CiProvider>,
    /// `owner/name` on GitHub, the project path on GitLab.
    pub repo: Option<String>,
    pub pr_number: Option<u64>,
    pub head_ref: Option<String>,
    pub base_ref: Option<String>,
    pub base_sha: Option<String>,
    pub head_sha: Option<String>,
    pub default_branch: Option<String>,
    pub server_url: Option<String>,
    pub run_url: Option<String>,
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

impl CiContext {
    /// Build the context from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Build the context from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        match CiProvider::detect(&lookup) {
            CiProvider::GitHub => Self::github(&lookup),
            CiProvider::GitLab => Ok(Self::gitlab(&lookup)),
            CiProvider::Local => Ok(Self {
                provider: Some(CiProvider::Local),
                ..Self::default()
            }),
        }
    }

    fn github(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let event = match lookup("GITHUB_EVENT_PATH") {
            Some(path) => read_event(Path::new(&path))?,
            None => Value::Null,
        };
        let server_url =
            lookup("GITHUB_SERVER_URL").unwrap_or_else(|| "https://github.com".to_string());
        let repo = lookup("GITHUB_REPOSITORY");
        let run_url = match (&repo, lookup("GITHUB_RUN_ID")) {
            (Some(repo), Some(run_id)) => {
                Some(format!("{server_url}/{repo}/actions/runs/{run_id}"))
            }
            _ => None,
        };

        Ok(Self {
            provider: Some(CiProvider::GitHub),
            repo,
            pr_number: event.pointer("/pull_request/number").and_then(Value::as_u64),
            head_ref: str_at(&event, "/pull_request/head/ref")
                .or_else(|| lookup("GITHUB_HEAD_REF"))
                .or_else(|| lookup("GITHUB_REF_NAME")),
            base_ref: str_at(&event, "/pull_request/base/ref")
                .or_else(|| lookup("GITHUB_BASE_REF")),
            base_sha: str_at(&event, "/pull_request/base/sha"),
            head_sha: str_at(&event, "/pull_request/head/sha").or_else(|| lookup("GITHUB_SHA")),
            default_branch: str_at(&event, "/repository/default_branch"),
            server_url: Some(server_url),
            run_url,
        })
    }

    fn gitlab(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            provider: Some(CiProvider::GitLab),
            repo: lookup("CI_PROJECT_PATH"),
            pr_number: lookup("CI_MERGE_REQUEST_IID").and_then(|v| v.parse().ok()),
            head_ref: lookup("CI_MERGE_REQUEST_SOURCE_BRANCH_NAME")
                .or_else(|| lookup("CI_COMMIT_REF_NAME")),
            base_ref: lookup("CI_MERGE_REQUEST_TARGET_BRANCH_NAME"),
            base_sha: lookup("CI_MERGE_REQUEST_DIFF_BASE_SHA"),
            head_sha: lookup("CI_COMMIT_SHA"),
            default_branch: lookup("CI_DEFAULT_BRANCH"),
            server_url: lookup("CI_SERVER_URL"),
            run_url: lookup("CI_PIPELINE_URL"),
        }
    }

    pub fn provider(&self) -> CiProvider {
        self.provider.unwrap_or(CiProvider::Local)
    }

    /// The head branch, or an error naming the variable a caller should set.
    pub fn require_head_ref(&self) -> Result<&str> {
        self.head_ref
            .as_deref()
            .ok_or_else(|| {
                CiError::MissingEnv(
                    "head ref (GITHUB_HEAD_REF / CI_MERGE_REQUEST_SOURCE_BRANCH_NAME)".to_string(),
                )
            })
    }

    pub fn require_default_branch(&self) -> Result<&str> {
        self.default_branch
            .as_deref()
            .or(self.base_ref.as_deref())
            .ok_or_else(|| CiError::MissingEnv("default branch (CI_DEFAULT_BRANCH)".to_string()))
    }
}

fn read_event(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CiError::Event(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| CiError::Event(format!("{}: {e}", path.display())))
}
