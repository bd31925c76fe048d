//! Run drivers: consume the build snapshot stream, keep the status comment
//! current, publish step outputs and decide whether the run fails.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::{debug, info, warn};

use sdkci_ci::{git, render_status, CiContext, CiPlatform, StatusInput, COMMENT_MARKER};
use sdkci_core::{
    combine_specs, run_builds, should_fail_run, split_patterns, write_document, BuildApi,
    BuildRun, BuildSnapshot, CombineOptions, FailRunOn, PollConfig, RunBuildsParams,
};

/// How a run ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The build service had nothing to commit.
    NoChanges,
    Passed,
    /// At least one language reached the `fail_on` threshold.
    Failed,
}

pub fn preview_branch(head_ref: &str) -> String {
    format!("preview/{head_ref}")
}

pub fn preview_base_branch(head_ref: &str) -> String {
    format!("preview/base/{head_ref}")
}

/// Inputs of a pull request preview.
#[derive(Debug, Clone, Default)]
pub struct PreviewOptions {
    pub oas_content: String,
    pub config_content: Option<String>,
    pub base_oas_content: Option<String>,
    pub base_config_content: Option<String>,
    pub guess_config: bool,
    pub commit_message: Option<String>,
    pub fail_on: FailRunOn,
    pub make_comment: bool,
}

/// Shared state of the `build`, `preview` and `merge` drivers.
pub struct Driver<'a> {
    pub api: Arc<dyn BuildApi>,
    pub platform: &'a dyn CiPlatform,
    pub ctx: &'a CiContext,
    pub project: String,
    pub poll: PollConfig,
}

impl Driver<'_> {
    /// Submit builds and drain their snapshots. `None` when there was
    /// nothing to commit.
    async fn drain(
        &self,
        params: RunBuildsParams,
        comment_title: Option<&str>,
    ) -> Result<Option<BuildSnapshot>> {
        let mut snapshots = match run_builds(self.api.clone(), params).await? {
            BuildRun::NoChanges => {
                info!("no changes to commit; nothing was built");
                return Ok(None);
            }
            BuildRun::Running(snapshots) => snapshots,
        };

        let mut last = None;
        while let Some(snapshot) = snapshots.next().await {
            let snapshot = snapshot?;
            debug!(languages = snapshot.outcomes.len(), "build snapshot");
            if let Some(title) = comment_title {
                self.comment(title, &snapshot, None).await;
            }
            last = Some(snapshot);
        }
        let last = last.context("build finished without reporting any outcomes")?;
        Ok(Some(last))
    }

    /// Comment failures are logged; they never fail the run.
    async fn comment(
        &self,
        title: &str,
        snapshot: &BuildSnapshot,
        commit_messages: Option<&BTreeMap<String, String>>,
    ) {
        let body = render_status(&StatusInput {
            title,
            outcomes: &snapshot.outcomes,
            base_outcomes: snapshot.base_outcomes.as_ref(),
            commit_messages,
            run_url: self.ctx.run_url.as_deref(),
        });
        if let Err(err) = self.platform.upsert_comment(COMMENT_MARKER, &body).await {
            warn!(error = %err, "failed to update the status comment");
        }
    }

    async fn publish_outcomes(&self, snapshot: &BuildSnapshot) -> Result<()> {
        let outcomes = serde_json::to_string(&snapshot.outcomes)?;
        self.platform.set_output("outcomes", &outcomes).await?;
        if let Some(base) = &snapshot.base_outcomes {
            let base = serde_json::to_string(base)?;
            self.platform.set_output("base_outcomes", &base).await?;
        }
        Ok(())
    }

    fn verdict(fail_on: FailRunOn, snapshot: &BuildSnapshot) -> RunOutcome {
        if should_fail_run(fail_on, &snapshot.outcomes, snapshot.base_outcomes.as_ref()) {
            RunOutcome::Passed
        } else {
            RunOutcome::Failed
        }
    }

    /// Fill in line counts for languages whose head and base commits live
    /// in the same SDK repository. Best effort.
    async fn attach_diff_stats(&self, snapshot: &mut BuildSnapshot) {
        let Some(base_outcomes) = snapshot.base_outcomes.as_ref() else {
            return;
        };
        for (language, target) in snapshot.outcomes.iter_mut() {
            let Some(head) = target.commit_ref() else {
                continue;
            };
            let Some(base) = base_outcomes.get(language).and_then(|b| b.commit_ref()) else {
                continue;
            };
            if base.repo != head.repo {
                continue;
            }
            let repo = head.repo.to_string();
            let (base_sha, head_sha) = (base.sha.clone(), head.sha.clone());
            match self.platform.compare_commits(&repo, &base_sha, &head_sha).await {
                Ok(Some(stats)) => {
                    target.has_diff = Some(stats.changed_files > 0);
                    target.diff_stats = Some(stats);
                }
                Ok(None) => {}
                Err(err) => warn!(lang = %language, error = %err, "failed to compute diff stats"),
            }
        }
    }

    /// Suggested commit messages for languages that produced a commit.
    async fn commit_messages(
        &self,
        snapshot: &BuildSnapshot,
        base_ref: &str,
        head_ref: &str,
    ) -> BTreeMap<String, String> {
        let mut messages = BTreeMap::new();
        for (language, target) in &snapshot.outcomes {
            if target.commit_ref().is_none() {
                continue;
            }
            match self
                .api
                .generate_commit_message(&self.project, language, base_ref, head_ref)
                .await
            {
                Ok(message) => {
                    messages.insert(language.clone(), message);
                }
                Err(err) => {
                    warn!(lang = %language, error = %err, "failed to generate commit message")
                }
            }
        }
        messages
    }

    /// Build one branch, or compare two, and report the final outcomes.
    pub async fn build(
        &self,
        params: RunBuildsParams,
        documented_spec_path: Option<&Path>,
        fail_on: FailRunOn,
    ) -> Result<RunOutcome> {
        let Some(last) = self.drain(params, None).await? else {
            return Ok(RunOutcome::NoChanges);
        };
        self.publish_outcomes(&last).await?;

        if let (Some(path), Some(spec)) = (documented_spec_path, &last.documented_spec) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, spec)
                .await
                .with_context(|| format!("failed to write documented spec to {}", path.display()))?;
            self.platform
                .set_output("documented_spec_path", &path.to_string_lossy())
                .await?;
        }
        Ok(Self::verdict(fail_on, &last))
    }

    /// Build the pull request's preview branch against a base built from
    /// the merge base, commenting as results arrive.
    pub async fn preview(&self, opts: PreviewOptions) -> Result<RunOutcome> {
        let head_ref = self.ctx.require_head_ref()?;
        let default_branch = self.ctx.require_default_branch()?;
        let branch = preview_branch(head_ref);
        let base_branch = preview_base_branch(head_ref);
        info!(
            branch = %branch,
            base_branch = %base_branch,
            from = %default_branch,
            "starting preview"
        );

        let params = RunBuildsParams {
            project: self.project.clone(),
            branch: branch.clone(),
            branch_from: Some(default_branch.to_string()),
            base_branch: Some(base_branch.clone()),
            oas_content: Some(opts.oas_content),
            config_content: opts.config_content,
            base_oas_content: opts.base_oas_content,
            base_config_content: opts.base_config_content,
            guess_config: opts.guess_config,
            commit_message: opts.commit_message,
            poll: self.poll,
            ..RunBuildsParams::default()
        };
        let title = opts.make_comment.then_some("Preview");
        let Some(mut last) = self.drain(params, title).await? else {
            return Ok(RunOutcome::NoChanges);
        };

        self.attach_diff_stats(&mut last).await;
        let messages = self.commit_messages(&last, &base_branch, &branch).await;
        if let Some(title) = title {
            self.comment(title, &last, Some(&messages)).await;
        }
        self.publish_outcomes(&last).await?;
        Ok(Self::verdict(opts.fail_on, &last))
    }

    /// Land a merged pull request's preview branch on the default branch.
    pub async fn merge(
        &self,
        commit_message: Option<String>,
        fail_on: FailRunOn,
        make_comment: bool,
    ) -> Result<RunOutcome> {
        let head_ref = self.ctx.require_head_ref()?;
        let default_branch = self.ctx.require_default_branch()?;
        let params = RunBuildsParams {
            project: self.project.clone(),
            branch: default_branch.to_string(),
            merge_branch: Some(preview_branch(head_ref)),
            commit_message,
            poll: self.poll,
            ..RunBuildsParams::default()
        };
        let Some(last) = self.drain(params, make_comment.then_some("Merge")).await? else {
            return Ok(RunOutcome::NoChanges);
        };
        self.publish_outcomes(&last).await?;
        Ok(Self::verdict(fail_on, &last))
    }
}

/// Spec and config contents at the pull request's merge base. Missing
/// history or files leave the base to be built from the default branch.
pub async fn read_base_files(
    repo_dir: &Path,
    ctx: &CiContext,
    oas_path: &Path,
    config_path: Option<&Path>,
) -> (Option<String>, Option<String>) {
    let Ok(default_branch) = ctx.require_default_branch() else {
        return (None, None);
    };
    let (fetch_rev, base_rev) = match &ctx.base_sha {
        Some(sha) => (sha.clone(), sha.clone()),
        None => (default_branch.to_string(), format!("origin/{default_branch}")),
    };
    if let Err(err) = git::fetch(repo_dir, "origin", &fetch_rev).await {
        debug!(error = %err, "fetch of base revision failed; using local history");
    }
    let merge_base = match git::merge_base(repo_dir, &base_rev, "HEAD").await {
        Ok(sha) => sha,
        Err(err) => {
            warn!(error = %err, "no merge base found; base builds from the default branch");
            return (None, None);
        }
    };
    info!(merge_base = %merge_base, "reading base spec");

    let show = |path: &Path| {
        let merge_base = merge_base.clone();
        let path = path.to_string_lossy().into_owned();
        async move {
            match git::show_file(repo_dir, &merge_base, &path).await {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %path, error = %err, "failed to read base file");
                    None
                }
            }
        }
    };
    let oas = show(oas_path).await;
    let config = match config_path {
        Some(path) => show(path).await,
        None => None,
    };
    (oas, config)
}

/// Combine OpenAPI documents matched by comma-separated globs into `output`.
pub async fn combine(
    platform: &dyn CiPlatform,
    inputs: &str,
    output: &Path,
    options: &CombineOptions,
) -> Result<RunOutcome> {
    let patterns = split_patterns(inputs);
    let combined = combine_specs(&patterns, options)?;
    write_document(output, &combined.document)
        .with_context(|| format!("failed to write combined spec to {}", output.display()))?;

    platform
        .set_output("pathCountBefore", &combined.path_count_before.to_string())
        .await?;
    platform
        .set_output("pathCountAfter", &combined.path_count_after.to_string())
        .await?;
    info!(
        output = %output.display(),
        before = combined.path_count_before,
        after = combined.path_count_after,
        "wrote combined spec"
    );
    Ok(RunOutcome::Passed)
}
