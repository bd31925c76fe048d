//! sdkci core library
//!
//! Drives SDK builds on the build service to completion and decides what
//! their outcomes mean for a CI run:
//!
//! - [`orchestrate::run_builds`] submits one build or a base/head pair and
//!   streams combined snapshots.
//! - [`poll`] and [`tracker`] turn repeated build reads into deduplicated
//!   per-language outcomes.
//! - [`outcomes`] classifies each outcome and decides whether the run fails.
//! - [`combine`] merges several OpenAPI documents before submission.

pub mod api;
pub mod combinator;
pub mod combine;
pub mod error;
pub mod fakes;
pub mod model;
pub mod orchestrate;
pub mod outcomes;
pub mod poll;
pub mod telemetry;
pub mod tracker;

pub use api::{
    BranchInfo, BuildApi, BuildPair, BuildSummary, CompareBuildsParams, CompareSide,
    CreateBranchParams, CreateBuildOutcome, CreateBuildParams, FileInput, GuessConfigSource,
    ListBuildsQuery, Revision, CONFIG_FILE_NAME, OAS_FILE_NAME,
};
pub use combinator::{combine_streams, CombineStreams, Tagged};
pub use combine::{
    combine_documents, combine_specs, split_patterns, write_document, CombineOptions,
    CombinedSpec, ServerStrategy,
};
pub use error::{ApiError, ApiResult, CombineError, ConfigError, Result, SdkCiError};
pub use model::{
    Build, BuildTarget, CheckConclusion, CheckResult, CommitConclusion, CommitResult, CommitRef,
    Diagnostic, DiagnosticLevel, DiffStats, DocumentedSpecRef, Outcomes, RepoRef, TargetStatus,
};
pub use orchestrate::{run_builds, BuildRun, BuildSnapshot, RunBuildsParams, SubmissionMode};
pub use outcomes::{
    categorize_outcome, check_fail_run, should_fail_run, Category, FailRunOn, FailRunVerdict,
    Severity,
};
pub use poll::{poll_build, BuildPoller, BuildRole, PollConfig, PollSnapshot, PollStep};
pub use telemetry::init_tracing;
pub use tracker::{MergeReport, OutcomeTracker};

/// Crate version, reported in the user agent and fatal error messages.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
