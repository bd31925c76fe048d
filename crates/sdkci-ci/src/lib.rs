//! CI platform integration for sdkci.
//!
//! Reads the run context from GitHub Actions or GitLab CI, publishes step
//! outputs, keeps a single status comment up to date on the pull request and
//! reads base revisions through git.

pub mod comment;
pub mod context;
pub mod error;
pub mod git;
pub mod github;
pub mod gitlab;
pub mod platform;

pub use comment::{render_status, StatusInput, COMMENT_MARKER};
pub use context::{CiContext, CiProvider};
pub use error::{CiError, Result};
pub use github::{GitHubConfig, GitHubPlatform};
pub use gitlab::{GitLabConfig, GitLabPlatform};
pub use platform::{detect_platform, CiPlatform, LocalPlatform};
