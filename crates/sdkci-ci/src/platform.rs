//! CI platform abstraction.
//!
//! One [`CiPlatform`] is chosen at startup by [`detect_platform`] and passed
//! to the run drivers. Drivers never branch on the provider themselves.

use std::fmt::Write as _;

use async_trait::async_trait;
use reqwest::Response;
use sdkci_core::DiffStats;
use tracing::{error, info};

use crate::context::{CiContext, CiProvider};
use crate::error::{CiError, Result};
use crate::github::{GitHubConfig, GitHubPlatform};
use crate::gitlab::{GitLabConfig, GitLabPlatform};

/// Operations a run driver needs from the CI system.
#[async_trait]
pub trait CiPlatform: Send + Sync {
    fn provider(&self) -> CiProvider;

    /// Publish a step output for later workflow steps.
    async fn set_output(&self, name: &str, value: &str) -> Result<()>;

    /// Create the pull request comment containing `marker`, or replace it.
    async fn upsert_comment(&self, marker: &str, body: &str) -> Result<()>;

    /// Surface an error in the CI system's own UI.
    async fn annotate_error(&self, message: &str) -> Result<()>;

    /// Line counts between two commits of an SDK repository, when the
    /// platform can compute them.
    async fn compare_commits(
        &self,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Option<DiffStats>>;
}

/// Pick the platform implementation for this run.
pub fn detect_platform(ctx: &CiContext) -> Result<Box<dyn CiPlatform>> {
    let platform: Box<dyn CiPlatform> = match ctx.provider() {
        CiProvider::GitHub => Box::new(GitHubPlatform::new(GitHubConfig::from_context(ctx))?),
        CiProvider::GitLab => Box::new(GitLabPlatform::new(GitLabConfig::from_context(ctx))?),
        CiProvider::Local => Box::new(LocalPlatform),
    };
    info!(provider = %platform.provider(), "CI platform selected");
    Ok(platform)
}

/// Runs outside CI: everything is logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPlatform;

#[async_trait]
impl CiPlatform for LocalPlatform {
    fn provider(&self) -> CiProvider {
        CiProvider::Local
    }

    async fn set_output(&self, name: &str, value: &str) -> Result<()> {
        info!(name, value, "output");
        Ok(())
    }

    async fn upsert_comment(&self, marker: &str, body: &str) -> Result<()> {
        info!(marker, "comment\n{body}");
        Ok(())
    }

    async fn annotate_error(&self, message: &str) -> Result<()> {
        error!("{message}");
        Ok(())
    }

    async fn compare_commits(
        &self,
        _repo: &str,
        _base: &str,
        _head: &str,
    ) -> Result<Option<DiffStats>> {
        Ok(None)
    }
}

pub(crate) fn http_client(platform: &'static str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("sdkci/{}", sdkci_core::VERSION))
        .build()
        .map_err(|e| transport(platform, e))
}

pub(crate) fn transport(platform: &'static str, err: reqwest::Error) -> CiError {
    CiError::Transport {
        platform,
        message: err.to_string(),
    }
}

pub(crate) async fn check_status(platform: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CiError::Http {
        platform,
        status: status.as_u16(),
        body,
    })
}

pub(crate) async fn decode<T: serde::de::DeserializeOwned>(
    platform: &'static str,
    response: Response,
) -> Result<T> {
    let bytes = check_status(platform, response)
        .await?
        .bytes()
        .await
        .map_err(|e| transport(platform, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// `name<<DELIM` block for multi-line output files. The delimiter is chosen
/// so it never occurs in `value`.
pub(crate) fn heredoc_entry(name: &str, value: &str) -> String {
    let mut delimiter = String::from("SDKCI_EOF");
    while value.lines().any(|line| line == delimiter) {
        delimiter.push('_');
    }
    let mut entry = String::new();
    let _ = writeln!(entry, "{name}<<{delimiter}");
    let _ = writeln!(entry, "{value}");
    let _ = writeln!(entry, "{delimiter}");
    entry
}
