//! `BuildApi` over the build service's REST interface.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use sdkci_core::api::{
    BranchInfo, BuildApi, BuildPair, BuildSummary, CompareBuildsParams, CreateBranchParams,
    CreateBuildOutcome, CreateBuildParams, GuessConfigSource, ListBuildsQuery,
};
use sdkci_core::{ApiError, ApiResult, Build, Diagnostic, DocumentedSpecRef};

use crate::config::ApiConfig;

/// Body fragment the service returns when a build would commit nothing.
const NO_CHANGES_MESSAGE: &str = "No changes to commit";

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigContent {
    content: String,
}

#[derive(Debug, Deserialize)]
struct CommitMessage {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum GuessConfigBody<'a> {
    Spec(&'a str),
    Branch(&'a str),
}

#[derive(Debug, Serialize)]
struct CommitMessageBody<'a> {
    base_ref: &'a str,
    head_ref: &'a str,
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

async fn error_for_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Http {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let bytes = error_for_status(response)
        .await?
        .bytes()
        .await
        .map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Build service client
pub struct HttpBuildApi {
    config: ApiConfig,
    base: Url,
    http_client: reqwest::Client,
}

impl HttpBuildApi {
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| {
                ApiError::Transport(format!("invalid base URL {}: {e}", config.base_url))
            })?;
        let http_client = reqwest::Client::builder()
            .user_agent(format!("sdkci/{}", sdkci_core::VERSION))
            .build()
            .map_err(transport)?;

        Ok(HttpBuildApi {
            config,
            base,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> ApiResult<Self> {
        Self::new(ApiConfig::from_env())
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// URL for `segments` below the base URL. Every segment is
    /// percent-encoded, so branch names keep their slashes.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("base URL {} cannot have a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(method = %method, url = %url, "build API request");
        let builder = self.http_client.request(method, url);
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> ApiResult<Response> {
        builder.send().await.map_err(transport)
    }
}

#[async_trait]
impl BuildApi for HttpBuildApi {
    async fn create_build(&self, params: CreateBuildParams) -> ApiResult<CreateBuildOutcome> {
        let url = self.endpoint(&["v0", "builds"])?;
        let response = self
            .send(self.request(Method::POST, url).json(&params))
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            if body.contains(NO_CHANGES_MESSAGE) {
                return Ok(CreateBuildOutcome::NoChanges);
            }
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        decode(response).await.map(CreateBuildOutcome::Created)
    }

    async fn compare_builds(&self, params: CompareBuildsParams) -> ApiResult<BuildPair> {
        let url = self.endpoint(&["v0", "builds", "compare"])?;
        decode(
            self.send(self.request(Method::POST, url).json(&params))
                .await?,
        )
        .await
    }

    async fn retrieve_build(&self, build_id: &str) -> ApiResult<Build> {
        let url = self.endpoint(&["v0", "builds", build_id])?;
        decode(self.send(self.request(Method::GET, url)).await?).await
    }

    async fn list_diagnostics(&self, build_id: &str) -> ApiResult<Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut url = self.endpoint(&["v0", "builds", build_id, "diagnostics"])?;
            if let Some(cursor) = &cursor {
                url.query_pairs_mut().append_pair("cursor", cursor);
            }
            let page: Page<Diagnostic> =
                decode(self.send(self.request(Method::GET, url)).await?).await?;
            diagnostics.extend(page.data);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(diagnostics)
    }

    async fn guess_config(&self, project: &str, source: GuessConfigSource) -> ApiResult<String> {
        let url = self.endpoint(&["v0", "projects", project, "configs", "guess"])?;
        let body = match &source {
            GuessConfigSource::Spec(spec) => GuessConfigBody::Spec(spec),
            GuessConfigSource::Branch(branch) => GuessConfigBody::Branch(branch),
        };
        let config: ConfigContent =
            decode(self.send(self.request(Method::POST, url).json(&body)).await?).await?;
        Ok(config.content)
    }

    async fn retrieve_config(&self, project: &str, branch: &str) -> ApiResult<String> {
        let mut url = self.endpoint(&["v0", "projects", project, "configs"])?;
        url.query_pairs_mut().append_pair("branch", branch);
        let config: ConfigContent = decode(self.send(self.request(Method::GET, url)).await?).await?;
        Ok(config.content)
    }

    async fn create_branch(
        &self,
        project: &str,
        params: CreateBranchParams,
    ) -> ApiResult<BranchInfo> {
        let url = self.endpoint(&["v0", "projects", project, "branches"])?;
        decode(
            self.send(self.request(Method::POST, url).json(&params))
                .await?,
        )
        .await
    }

    async fn retrieve_branch(&self, project: &str, branch: &str) -> ApiResult<Option<BranchInfo>> {
        let url = self.endpoint(&["v0", "projects", project, "branches", branch])?;
        let response = self.send(self.request(Method::GET, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    async fn list_builds(&self, query: ListBuildsQuery) -> ApiResult<Vec<BuildSummary>> {
        let mut url = self.endpoint(&["v0", "builds"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("project", &query.project);
            if let Some(branch) = &query.branch {
                pairs.append_pair("branch", branch);
            }
            if let Some(hash) = &query.revision_hash {
                pairs.append_pair("revision", hash);
            }
            pairs.append_pair("limit", &query.limit.to_string());
        }
        let page: Page<BuildSummary> =
            decode(self.send(self.request(Method::GET, url)).await?).await?;
        Ok(page.data)
    }

    async fn generate_commit_message(
        &self,
        project: &str,
        target: &str,
        base_ref: &str,
        head_ref: &str,
    ) -> ApiResult<String> {
        let mut url = self.endpoint(&["v0", "projects", project, "generate_commit_message"])?;
        url.query_pairs_mut().append_pair("target", target);
        let body = CommitMessageBody { base_ref, head_ref };
        let message: CommitMessage =
            decode(self.send(self.request(Method::POST, url).json(&body)).await?).await?;
        Ok(message.message)
    }

    async fn download_documented_spec(&self, spec: &DocumentedSpecRef) -> ApiResult<String> {
        let url = Url::parse(&spec.url).map_err(|e| ApiError::Decode(e.to_string()))?;
        // Signed artifact URLs carry their own credentials.
        let response = self
            .send(self.http_client.request(Method::GET, url))
            .await?;
        error_for_status(response)
            .await?
            .text()
            .await
            .map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpBuildApi {
        HttpBuildApi::new(ApiConfig::new(base, "acme")).unwrap()
    }

    #[test]
    fn endpoint_encodes_branch_slashes() {
        let api = client("https://api.example.com");
        let url = api
            .endpoint(&["v0", "projects", "acme", "branches", "preview/feature"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v0/projects/acme/branches/preview%2Ffeature"
        );
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let api = client("https://example.com/build-api/");
        let url = api.endpoint(&["v0", "builds", "b1"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/build-api/v0/builds/b1");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpBuildApi::new(ApiConfig::new("not a url", "acme")).is_err());
    }

    #[test]
    fn guess_config_body_shape() {
        let body = GuessConfigBody::Spec("openapi: 3.1.0");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "spec": "openapi: 3.1.0" })
        );
    }
}
