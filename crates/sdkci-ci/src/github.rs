//! GitHub Actions platform: output file, issue comments, workflow commands
//! and the compare API.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use sdkci_core::DiffStats;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::context::{CiContext, CiProvider};
use crate::error::{CiError, Result};
use crate::platform::{check_status, decode, heredoc_entry, http_client, transport, CiPlatform};

const PLATFORM: &str = "GitHub";

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST API root (`GITHUB_API_URL` on GitHub Enterprise)
    pub api_url: String,
    pub token: Option<String>,
    /// Repository the workflow runs in, `owner/name`
    pub repo: Option<String>,
    pub pr_number: Option<u64>,
    /// `$GITHUB_OUTPUT`
    pub output_path: Option<PathBuf>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        GitHubConfig {
            api_url: std::env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
            repo: None,
            pr_number: None,
            output_path: std::env::var_os("GITHUB_OUTPUT").map(PathBuf::from),
        }
    }
}

impl GitHubConfig {
    /// Environment settings plus the repository and PR from the run context
    pub fn from_context(ctx: &CiContext) -> Self {
        GitHubConfig {
            repo: ctx.repo.clone(),
            pr_number: ctx.pr_number,
            ..Self::default()
        }
    }

    /// Create config for a specific API root and repository
    pub fn new(api_url: &str, repo: &str) -> Self {
        GitHubConfig {
            api_url: api_url.to_string(),
            token: None,
            repo: Some(repo.to_string()),
            pr_number: None,
            output_path: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_pr_number(mut self, pr_number: u64) -> Self {
        self.pr_number = Some(pr_number);
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct Comparison {
    #[serde(default)]
    files: Vec<ComparedFile>,
}

#[derive(Debug, Deserialize)]
struct ComparedFile {
    additions: u64,
    deletions: u64,
}

/// Escape a workflow command message.
fn escape_data(message: &str) -> String {
    message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

pub struct GitHubPlatform {
    config: GitHubConfig,
    base: Url,
    http_client: reqwest::Client,
}

impl GitHubPlatform {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| CiError::MissingEnv(format!("GITHUB_API_URL is not a URL ({e})")))?;
        Ok(GitHubPlatform {
            config,
            base,
            http_client: http_client(PLATFORM)?,
        })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CiError::MissingEnv(format!("GITHUB_API_URL {} cannot have a path", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `owner/name` splits into two path segments.
    fn repo_endpoint(&self, repo: &str, rest: &[&str]) -> Result<Url> {
        let (owner, name) = repo
            .split_once('/')
            .ok_or_else(|| CiError::Event(format!("repository `{repo}` is not owner/name")))?;
        let mut segments = vec!["repos", owner, name];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(method = %method, url = %url, "GitHub API request");
        let builder = self
            .http_client
            .request(method, url)
            .header("Accept", "application/vnd.github+json");
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| transport(PLATFORM, e))
    }

    async fn find_comment(&self, repo: &str, pr_number: u64, marker: &str) -> Result<Option<u64>> {
        let number = pr_number.to_string();
        let mut page = 1u32;
        loop {
            let mut url = self.repo_endpoint(repo, &["issues", number.as_str(), "comments"])?;
            url.query_pairs_mut()
                .append_pair("per_page", "100")
                .append_pair("page", &page.to_string());
            let comments: Vec<IssueComment> =
                decode(PLATFORM, self.send(self.request(Method::GET, url)).await?).await?;
            if let Some(found) = comments
                .iter()
                .find(|c| c.body.as_deref().is_some_and(|b| b.contains(marker)))
            {
                return Ok(Some(found.id));
            }
            if comments.len() < 100 {
                return Ok(None);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl CiPlatform for GitHubPlatform {
    fn provider(&self) -> CiProvider {
        CiProvider::GitHub
    }

    async fn set_output(&self, name: &str, value: &str) -> Result<()> {
        let Some(path) = &self.config.output_path else {
            warn!(name, "GITHUB_OUTPUT is not set; output dropped");
            return Ok(());
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(heredoc_entry(name, value).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn upsert_comment(&self, marker: &str, body: &str) -> Result<()> {
        let (Some(repo), Some(pr_number)) = (&self.config.repo, self.config.pr_number) else {
            info!("not a pull request run; comment skipped");
            return Ok(());
        };

        let payload = CommentBody { body };
        let request = match self.find_comment(repo, pr_number, marker).await? {
            Some(id) => {
                let id = id.to_string();
                let url = self.repo_endpoint(repo, &["issues", "comments", id.as_str()])?;
                self.request(Method::PATCH, url)
            }
            None => {
                let number = pr_number.to_string();
                let url = self.repo_endpoint(repo, &["issues", number.as_str(), "comments"])?;
                self.request(Method::POST, url)
            }
        };
        check_status(PLATFORM, self.send(request.json(&payload)).await?).await?;
        debug!(pr_number, "status comment updated");
        Ok(())
    }

    async fn annotate_error(&self, message: &str) -> Result<()> {
        println!("::error::{}", escape_data(message));
        Ok(())
    }

    async fn compare_commits(
        &self,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Option<DiffStats>> {
        let range = format!("{base}...{head}");
        let url = self.repo_endpoint(repo, &["compare", range.as_str()])?;
        let comparison: Comparison =
            decode(PLATFORM, self.send(self.request(Method::GET, url)).await?).await?;

        let stats = comparison
            .files
            .iter()
            .fold(DiffStats::default(), |mut acc, file| {
                acc.additions += file.additions;
                acc.deletions += file.deletions;
                acc.changed_files += 1;
                acc
            });
        Ok(Some(stats))
    }
}
