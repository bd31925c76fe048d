//! Build data model shared by the poller, the classifier and the API client.
//!
//! These types mirror the build service's JSON shapes. `Outcomes` values
//! handed to callers are snapshots: a new map is produced for every change
//! and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a build target, a check, or a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    #[serde(alias = "queued")]
    NotStarted,
    InProgress,
    Completed,
}

impl TargetStatus {
    pub fn is_completed(self) -> bool {
        self == TargetStatus::Completed
    }
}

/// Conclusion of a build/lint/test check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Skipped,
    Cancelled,
    ActionRequired,
    Neutral,
    TimedOut,
    #[serde(other)]
    Unknown,
}

/// One of the independent `build`, `lint` and `test` checks of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: TargetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<CheckConclusion>,
}

impl CheckResult {
    pub fn completed(conclusion: CheckConclusion) -> Self {
        Self {
            status: TargetStatus::Completed,
            conclusion: Some(conclusion),
        }
    }

    pub fn in_progress() -> Self {
        Self {
            status: TargetStatus::InProgress,
            conclusion: None,
        }
    }

    /// A completed check that did not succeed.
    pub fn is_failing(&self) -> bool {
        self.status.is_completed()
            && matches!(
                self.conclusion,
                Some(CheckConclusion::Failure) | Some(CheckConclusion::TimedOut)
            )
    }
}

/// Conclusion of the code-generation commit for a target.
///
/// Conclusions the service adds later round-trip through `Other` so the
/// classifier can treat them as unknown instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommitConclusion {
    Success,
    Warning,
    Error,
    Fatal,
    Note,
    Noop,
    Cancelled,
    TimedOut,
    MergeConflict,
    UpstreamMergeConflict,
    Other(String),
}

impl CommitConclusion {
    pub fn as_str(&self) -> &str {
        match self {
            CommitConclusion::Success => "success",
            CommitConclusion::Warning => "warning",
            CommitConclusion::Error => "error",
            CommitConclusion::Fatal => "fatal",
            CommitConclusion::Note => "note",
            CommitConclusion::Noop => "noop",
            CommitConclusion::Cancelled => "cancelled",
            CommitConclusion::TimedOut => "timed_out",
            CommitConclusion::MergeConflict => "merge_conflict",
            CommitConclusion::UpstreamMergeConflict => "upstream_merge_conflict",
            CommitConclusion::Other(s) => s,
        }
    }
}

impl From<String> for CommitConclusion {
    fn from(s: String) -> Self {
        match s.as_str() {
            "success" => CommitConclusion::Success,
            "warning" => CommitConclusion::Warning,
            "error" => CommitConclusion::Error,
            "fatal" => CommitConclusion::Fatal,
            "note" => CommitConclusion::Note,
            "noop" => CommitConclusion::Noop,
            "cancelled" => CommitConclusion::Cancelled,
            "timed_out" => CommitConclusion::TimedOut,
            "merge_conflict" => CommitConclusion::MergeConflict,
            "upstream_merge_conflict" => CommitConclusion::UpstreamMergeConflict,
            _ => CommitConclusion::Other(s),
        }
    }
}

impl From<CommitConclusion> for String {
    fn from(c: CommitConclusion) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for CommitConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A commit pushed to an SDK repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
    pub repo: RepoRef,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub repo: RepoRef,
}

/// Details present once a commit has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCompletion {
    pub conclusion: CommitConclusion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_conflict_pr: Option<PullRequestRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub status: TargetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<CommitCompletion>,
}

impl CommitResult {
    pub fn completed(conclusion: CommitConclusion) -> Self {
        Self {
            status: TargetStatus::Completed,
            completed: Some(CommitCompletion {
                conclusion,
                commit: None,
                merge_conflict_pr: None,
            }),
        }
    }

    /// Synthetic result injected when polling gives up on a target.
    pub fn timed_out() -> Self {
        Self::completed(CommitConclusion::TimedOut)
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed() && self.completed.is_some()
    }

    pub fn conclusion(&self) -> Option<&CommitConclusion> {
        self.completed.as_ref().map(|c| &c.conclusion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Fatal,
    Error,
    Warning,
    Note,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticLevel::Fatal => "fatal",
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Note => "note",
        };
        f.write_str(s)
    }
}

/// A spec or config problem reported by the build service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oas_ref: Option<String>,
}

impl Diagnostic {
    /// The tuple two diagnostics are compared by. `level` is not part of it.
    pub fn identity(&self) -> (&str, &str, Option<&str>, Option<&str>) {
        (
            &self.code,
            &self.message,
            self.config_ref.as_deref(),
            self.oas_ref.as_deref(),
        )
    }
}

/// Line counts of an SDK commit compared to its base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
}

/// One language's build pipeline.
///
/// `commit` and `diagnostics` are owned by the poller: `commit` is set once,
/// when the commit first completes, and diagnostics are attached at the same
/// moment. `has_diff`/`diff_stats` are filled in afterwards by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub status: TargetStatus,
    #[serde(default)]
    pub commit: Option<CommitResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_diff: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_stats: Option<DiffStats>,
}

impl BuildTarget {
    pub fn new(status: TargetStatus) -> Self {
        Self {
            status,
            commit: None,
            diagnostics: Vec::new(),
            build: None,
            lint: None,
            test: None,
            has_diff: None,
            diff_stats: None,
        }
    }

    /// The completed commit's conclusion, if any.
    pub fn commit_conclusion(&self) -> Option<&CommitConclusion> {
        self.commit
            .as_ref()
            .filter(|c| c.is_completed())
            .and_then(|c| c.conclusion())
    }

    /// The commit pushed for this target, if one was.
    pub fn commit_ref(&self) -> Option<&CommitRef> {
        self.commit
            .as_ref()
            .and_then(|c| c.completed.as_ref())
            .and_then(|c| c.commit.as_ref())
    }

    pub fn checks(&self) -> [(&'static str, Option<&CheckResult>); 3] {
        [
            ("build", self.build.as_ref()),
            ("lint", self.lint.as_ref()),
            ("test", self.test.as_ref()),
        ]
    }
}

/// Language name to that language's build state.
pub type Outcomes = BTreeMap<String, BuildTarget>;

/// Where the documented spec artifact of a build can be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentedSpecRef {
    pub url: String,
}

/// A build job on the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: String,
    #[serde(default)]
    pub targets: BTreeMap<String, BuildTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documented_spec: Option<DocumentedSpecRef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_commit_conclusion_is_preserved() {
        let c: CommitConclusion = serde_json::from_value(json!("exploded")).unwrap();
        assert_eq!(c, CommitConclusion::Other("exploded".to_string()));
        assert_eq!(serde_json::to_value(&c).unwrap(), json!("exploded"));
    }

    #[test]
    fn build_target_decodes_service_shape() {
        let target: BuildTarget = serde_json::from_value(json!({
            "status": "completed",
            "commit": {
                "status": "completed",
                "completed": {
                    "conclusion": "merge_conflict",
                    "merge_conflict_pr": {
                        "number": 12,
                        "repo": { "owner": "acme", "name": "acme-node" }
                    }
                }
            },
            "build": { "status": "completed", "conclusion": "failure" },
            "lint": { "status": "in_progress" }
        }))
        .unwrap();

        assert_eq!(
            target.commit_conclusion(),
            Some(&CommitConclusion::MergeConflict)
        );
        assert!(target.build.as_ref().unwrap().is_failing());
        assert!(!target.lint.as_ref().unwrap().is_failing());
        assert!(target.test.is_none());
        assert!(target.diagnostics.is_empty());
    }

    #[test]
    fn queued_is_not_started() {
        let s: TargetStatus = serde_json::from_value(json!("queued")).unwrap();
        assert_eq!(s, TargetStatus::NotStarted);
    }

    #[test]
    fn in_progress_commit_has_no_conclusion() {
        let mut target = BuildTarget::new(TargetStatus::InProgress);
        target.commit = Some(CommitResult {
            status: TargetStatus::InProgress,
            completed: None,
        });
        assert!(target.commit_conclusion().is_none());
    }

    #[test]
    fn diagnostic_identity_ignores_level() {
        let a = Diagnostic {
            level: DiagnosticLevel::Warning,
            code: "C1".to_string(),
            message: "m".to_string(),
            config_ref: None,
            oas_ref: Some("#/paths/~1a".to_string()),
        };
        let b = Diagnostic {
            level: DiagnosticLevel::Error,
            ..a.clone()
        };
        assert_eq!(a.identity(), b.identity());
    }
}
