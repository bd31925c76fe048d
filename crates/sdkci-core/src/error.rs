//! Error taxonomy for sdkci.

use std::path::PathBuf;

/// Mutually exclusive submission flags that were combined, or required
/// inputs that are missing. Raised before any request reaches the build API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot combine merge_branch with inline oas or config content")]
    MergeBranchWithInlineContent,

    #[error("cannot combine merge_branch with branch_from")]
    MergeBranchWithComparison,

    #[error("guess_config cannot be combined with explicit config content")]
    GuessConfigWithConfig,

    #[error("guess_config requires oas content")]
    GuessConfigRequiresOas,

    #[error("an oas spec, config file or merge_branch is required")]
    MissingRevision,

    #[error("comparison builds require oas content for the head branch")]
    MissingHeadSpec,

    #[error("comparison builds require a base branch")]
    MissingBaseBranch,

    #[error("invalid fail_on value: {0} (expected never, fatal, error, warning or note)")]
    InvalidFailRunOn(String),
}

/// Failures talking to the build API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("build API returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("build API request failed: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to decode build API response: {0}")]
    Decode(String),
}

/// Failures while combining OpenAPI documents.
#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    #[error("{}", empty_patterns_message(.patterns))]
    EmptyPatterns { patterns: Vec<String> },

    #[error("no input patterns were given")]
    NoInputs,

    #[error("invalid glob pattern {pattern}: {message}")]
    Glob { pattern: String, message: String },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{}: document root must be a mapping", .path.display())]
    NotAMapping { path: PathBuf },

    #[error("path {path} defines {method} in more than one document")]
    PathConflict { path: String, method: String },

    #[error("component {section}/{name} is defined differently in more than one document")]
    ComponentConflict { section: String, name: String },
}

fn empty_patterns_message(patterns: &[String]) -> String {
    let mut msg = format!(
        "{} input pattern(s) matched no files:\n",
        patterns.len()
    );
    for pattern in patterns {
        msg.push_str(&format!("  - {pattern}\n"));
    }
    msg.push_str(
        "hints: patterns are resolved relative to the working directory; \
         separate multiple patterns with commas; check the file extension \
         (.json, .yaml, .yml) and that the files are checked out",
    );
    msg
}

/// Top-level error for sdkci library operations.
#[derive(Debug, thiserror::Error)]
pub enum SdkCiError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("combine error: {0}")]
    Combine(#[from] CombineError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for sdkci library operations.
pub type Result<T> = std::result::Result<T, SdkCiError>;

/// Result type for build API calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
