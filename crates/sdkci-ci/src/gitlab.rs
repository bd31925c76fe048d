//! GitLab CI platform: dotenv outputs and merge request notes.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use sdkci_core::DiffStats;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};
use url::Url;

use crate::context::{CiContext, CiProvider};
use crate::error::{CiError, Result};
use crate::platform::{check_status, decode, http_client, transport, CiPlatform};

const PLATFORM: &str = "GitLab";

/// Default dotenv report path, picked up via `artifacts:reports:dotenv`.
pub const DEFAULT_OUTPUT_PATH: &str = "sdkci.env";

const NOTES_PAGE_SIZE: usize = 100;

/// GitLab connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLabConfig {
    /// API v4 root (`CI_API_V4_URL`)
    pub api_url: String,
    /// Token with `api` scope, sent as `PRIVATE-TOKEN`
    pub token: Option<String>,
    /// Project id or path
    pub project: Option<String>,
    pub mr_iid: Option<u64>,
    pub output_path: PathBuf,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        GitLabConfig {
            api_url: std::env::var("CI_API_V4_URL")
                .unwrap_or_else(|_| "https://gitlab.com/api/v4".to_string()),
            token: std::env::var("GITLAB_TOKEN").ok().filter(|t| !t.is_empty()),
            project: std::env::var("CI_PROJECT_ID").ok(),
            mr_iid: None,
            output_path: std::env::var_os("SDKCI_OUTPUT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
        }
    }
}

impl GitLabConfig {
    pub fn from_context(ctx: &CiContext) -> Self {
        let defaults = Self::default();
        GitLabConfig {
            project: defaults.project.clone().or_else(|| ctx.repo.clone()),
            mr_iid: ctx.pr_number,
            ..defaults
        }
    }

    pub fn new(api_url: &str, project: &str) -> Self {
        GitLabConfig {
            api_url: api_url.to_string(),
            token: None,
            project: Some(project.to_string()),
            mr_iid: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_mr_iid(mut self, mr_iid: u64) -> Self {
        self.mr_iid = Some(mr_iid);
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct Note {
    id: u64,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Serialize)]
struct NoteBody<'a> {
    body: &'a str,
}

/// Dotenv values are single-line.
fn dotenv_line(name: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"");
    format!("{name}=\"{escaped}\"\n")
}

pub struct GitLabPlatform {
    config: GitLabConfig,
    base: Url,
    http_client: reqwest::Client,
}

impl GitLabPlatform {
    pub fn new(config: GitLabConfig) -> Result<Self> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| CiError::MissingEnv(format!("CI_API_V4_URL is not a URL ({e})")))?;
        Ok(GitLabPlatform {
            config,
            base,
            http_client: http_client(PLATFORM)?,
        })
    }

    fn notes_url(&self, project: &str, mr_iid: u64, note_id: Option<u64>) -> Result<Url> {
        let mut url = self.base.clone();
        let iid = mr_iid.to_string();
        let note = note_id.map(|id| id.to_string());
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                CiError::MissingEnv(format!("CI_API_V4_URL {} cannot have a path", self.base))
            })?;
            segments
                .pop_if_empty()
                .extend(["projects", project, "merge_requests", iid.as_str(), "notes"]);
            if let Some(note) = &note {
                segments.push(note);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(method = %method, url = %url, "GitLab API request");
        let builder = self.http_client.request(method, url);
        match &self.config.token {
            Some(token) => builder.header("PRIVATE-TOKEN", token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| transport(PLATFORM, e))
    }

    /// Walk the merge request's notes page by page until one carries `marker`.
    async fn find_note(&self, project: &str, mr_iid: u64, marker: &str) -> Result<Option<u64>> {
        let mut page = 1u32;
        loop {
            let mut url = self.notes_url(project, mr_iid, None)?;
            url.query_pairs_mut()
                .append_pair("per_page", &NOTES_PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());
            let notes: Vec<Note> =
                decode(PLATFORM, self.send(self.request(Method::GET, url)).await?).await?;
            if let Some(note) = notes.iter().find(|n| n.body.contains(marker)) {
                return Ok(Some(note.id));
            }
            if notes.len() < NOTES_PAGE_SIZE {
                return Ok(None);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl CiPlatform for GitLabPlatform {
    fn provider(&self) -> CiProvider {
        CiProvider::GitLab
    }

    async fn set_output(&self, name: &str, value: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.output_path)
            .await?;
        file.write_all(dotenv_line(name, value).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn upsert_comment(&self, marker: &str, body: &str) -> Result<()> {
        let (Some(project), Some(mr_iid)) = (&self.config.project, self.config.mr_iid) else {
            info!("not a merge request pipeline; comment skipped");
            return Ok(());
        };

        let payload = NoteBody { body };
        let request = match self.find_note(project, mr_iid, marker).await? {
            Some(id) => self.request(Method::PUT, self.notes_url(project, mr_iid, Some(id))?),
            None => self.request(Method::POST, self.notes_url(project, mr_iid, None)?),
        };
        check_status(PLATFORM, self.send(request.json(&payload)).await?).await?;
        debug!(mr_iid, "status note updated");
        Ok(())
    }

    async fn annotate_error(&self, message: &str) -> Result<()> {
        // GitLab has no job annotations; the job log is the UI.
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
