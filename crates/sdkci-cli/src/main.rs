//! sdkci - SDK builds from CI
//!
//! The `sdkci` command drives SDK builds on the build service and reports
//! their outcomes back to the CI system.
//!
//! ## Commands
//!
//! - `build`: build a branch, or compare two branches, from a spec
//! - `preview`: build a pull request's preview branch and comment on it
//! - `merge`: land a merged pull request's preview on the default branch
//! - `combine`: merge several OpenAPI documents into one

mod drivers;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, warn, Level};

use sdkci_api::{ApiConfig, HttpBuildApi, DEFAULT_BASE_URL};
use sdkci_ci::{detect_platform, CiContext, CiPlatform, LocalPlatform};
use sdkci_core::{BuildApi, CombineOptions, FailRunOn, PollConfig, RunBuildsParams, ServerStrategy};

use crate::drivers::{read_base_files, Driver, PreviewOptions, RunOutcome};

const ISSUE_TRACKER: &str = "https://github.com/stevedores-org/sdkci/issues/new";

#[derive(Parser)]
#[command(name = "sdkci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, preview and merge generated SDKs from CI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "SDKCI_VERBOSE")]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "SDKCI_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Build service connection and polling
#[derive(Args, Debug, Clone)]
struct ApiArgs {
    /// Build service API key
    #[arg(long, env = "SDKCI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Project the SDKs belong to
    #[arg(long, env = "SDKCI_PROJECT")]
    project: String,

    /// Build service URL
    #[arg(long, env = "SDKCI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Seconds between polls of a running build
    #[arg(long, env = "SDKCI_POLL_INTERVAL_SECS", default_value_t = 5)]
    poll_interval_secs: u64,

    /// Give up on unfinished languages after this many seconds
    #[arg(long, env = "SDKCI_MAX_POLLING_SECS", default_value_t = 600)]
    max_polling_secs: u64,
}

impl ApiArgs {
    fn client(&self) -> Result<Arc<dyn BuildApi>> {
        let mut config = ApiConfig::new(&self.base_url, &self.project);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            config = config.with_api_key(key);
        }
        let client = HttpBuildApi::new(config).context("Failed to create build service client")?;
        Ok(Arc::new(client))
    }

    fn poll(&self) -> PollConfig {
        PollConfig::default()
            .with_interval(std::time::Duration::from_secs(self.poll_interval_secs))
            .with_max_polling(std::time::Duration::from_secs(self.max_polling_secs))
    }
}

/// What to build from
#[derive(Args, Debug, Clone)]
struct SpecArgs {
    /// OpenAPI spec file
    #[arg(long, env = "SDKCI_OAS_PATH")]
    oas_path: Option<PathBuf>,

    /// Build config file
    #[arg(long, env = "SDKCI_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Let the build service infer the config from the spec
    #[arg(long, env = "SDKCI_GUESS_CONFIG")]
    guess_config: bool,

    /// Commit message for the SDK commits
    #[arg(long, env = "SDKCI_COMMIT_MESSAGE")]
    commit_message: Option<String>,

    /// Fail the run at or above this severity (never, fatal, error, warning, note)
    #[arg(long, env = "SDKCI_FAIL_ON", default_value = "error")]
    fail_on: FailRunOn,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a branch, or compare two branches
    Build {
        #[command(flatten)]
        api: ApiArgs,

        #[command(flatten)]
        spec: SpecArgs,

        /// Branch to build
        #[arg(long, env = "SDKCI_BRANCH", default_value = "main")]
        branch: String,

        /// Reset the branch and the base branch to this branch, then compare
        #[arg(long, env = "SDKCI_BRANCH_FROM")]
        branch_from: Option<String>,

        /// Base branch of a comparison
        #[arg(long, env = "SDKCI_BASE_BRANCH")]
        base_branch: Option<String>,

        /// Build the branch with this branch's changes applied
        #[arg(long, env = "SDKCI_MERGE_BRANCH")]
        merge_branch: Option<String>,

        /// Spec for the base side of a comparison
        #[arg(long, env = "SDKCI_BASE_OAS_PATH")]
        base_oas_path: Option<PathBuf>,

        /// Config for the base side of a comparison
        #[arg(long, env = "SDKCI_BASE_CONFIG_PATH")]
        base_config_path: Option<PathBuf>,

        /// Write the documented spec here when the build produces one
        #[arg(long, env = "SDKCI_DOCUMENTED_SPEC_PATH")]
        documented_spec_path: Option<PathBuf>,
    },

    /// Build a pull request preview and comment with the results
    Preview {
        #[command(flatten)]
        api: ApiArgs,

        #[command(flatten)]
        spec: SpecArgs,

        /// Post and update the status comment
        #[arg(long, env = "SDKCI_MAKE_COMMENT", default_value_t = true, action = ArgAction::Set)]
        make_comment: bool,

        /// Checkout of the repository holding the spec
        #[arg(long, default_value = ".")]
        repo_dir: PathBuf,
    },

    /// Build the default branch from a merged pull request's preview
    Merge {
        #[command(flatten)]
        api: ApiArgs,

        /// Commit message for the SDK commits
        #[arg(long, env = "SDKCI_COMMIT_MESSAGE")]
        commit_message: Option<String>,

        /// Fail the run at or above this severity
        #[arg(long, env = "SDKCI_FAIL_ON", default_value = "error")]
        fail_on: FailRunOn,

        /// Post and update the status comment
        #[arg(long, env = "SDKCI_MAKE_COMMENT", default_value_t = true, action = ArgAction::Set)]
        make_comment: bool,
    },

    /// Combine OpenAPI documents into one
    Combine {
        /// Comma-separated glob patterns of input documents
        #[arg(long, env = "SDKCI_COMBINE_INPUT")]
        input: String,

        /// Output path; `.json` writes JSON, anything else YAML
        #[arg(short, long, env = "SDKCI_COMBINE_OUTPUT")]
        output: PathBuf,

        /// Server URLs whose documents keep their servers per operation
        #[arg(long, value_delimiter = ',')]
        preserve_server: Vec<String>,

        /// Top-level server URL of the combined document
        #[arg(long)]
        global_server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sdkci_core::init_tracing(cli.json, level);

    let (ctx, platform) = match setup() {
        Ok(setup) => setup,
        Err(err) => {
            report_fatal(&LocalPlatform, &err).await;
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &ctx, platform.as_ref()).await {
        Ok(RunOutcome::Failed) => ExitCode::FAILURE,
        Ok(RunOutcome::Passed | RunOutcome::NoChanges) => ExitCode::SUCCESS,
        Err(err) => {
            report_fatal(platform.as_ref(), &err).await;
            ExitCode::FAILURE
        }
    }
}

fn setup() -> Result<(CiContext, Box<dyn CiPlatform>)> {
    let ctx = CiContext::from_env().context("Failed to read the CI environment")?;
    let platform = detect_platform(&ctx).context("Failed to set up the CI platform")?;
    Ok((ctx, platform))
}

async fn report_fatal(platform: &dyn CiPlatform, err: &anyhow::Error) {
    error!("{err:#}");
    eprintln!(
        "\nsdkci stopped on an unexpected error. If this looks like a bug, \
         please open an issue at {ISSUE_TRACKER} and include the log above."
    );
    if let Err(annotate_err) = platform.annotate_error(&format!("{err:#}")).await {
        warn!(error = %annotate_err, "failed to annotate the error");
    }
}

async fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Some(content))
        }
        None => Ok(None),
    }
}

async fn run(command: Commands, ctx: &CiContext, platform: &dyn CiPlatform) -> Result<RunOutcome> {
    match command {
        Commands::Build {
            api,
            spec,
            branch,
            branch_from,
            base_branch,
            merge_branch,
            base_oas_path,
            base_config_path,
            documented_spec_path,
        } => {
            let params = RunBuildsParams {
                project: api.project.clone(),
                branch,
                branch_from,
                base_branch,
                merge_branch,
                oas_content: read_optional(spec.oas_path.as_deref()).await?,
                config_content: read_optional(spec.config_path.as_deref()).await?,
                base_oas_content: read_optional(base_oas_path.as_deref()).await?,
                base_config_content: read_optional(base_config_path.as_deref()).await?,
                guess_config: spec.guess_config,
                commit_message: spec.commit_message,
                target_commit_messages: None,
                poll: api.poll(),
            };
            driver(&api, ctx, platform)?
                .build(params, documented_spec_path.as_deref(), spec.fail_on)
                .await
        }
        Commands::Preview {
            api,
            spec,
            make_comment,
            repo_dir,
        } => {
            let oas_path = spec
                .oas_path
                .as_deref()
                .context("preview needs --oas-path")?;
            let oas_content = read_optional(Some(oas_path)).await?.unwrap_or_default();
            let config_content = read_optional(spec.config_path.as_deref()).await?;
            let (base_oas_content, base_config_content) =
                read_base_files(&repo_dir, ctx, oas_path, spec.config_path.as_deref()).await;

            driver(&api, ctx, platform)?
                .preview(PreviewOptions {
                    oas_content,
                    config_content,
                    base_oas_content,
                    base_config_content,
                    guess_config: spec.guess_config,
                    commit_message: spec.commit_message,
                    fail_on: spec.fail_on,
                    make_comment,
                })
                .await
        }
        Commands::Merge {
            api,
            commit_message,
            fail_on,
            make_comment,
        } => {
            driver(&api, ctx, platform)?
                .merge(commit_message, fail_on, make_comment)
                .await
        }
        Commands::Combine {
            input,
            output,
            preserve_server,
            global_server,
        } => {
            let servers = (!preserve_server.is_empty() || global_server.is_some()).then(|| {
                ServerStrategy {
                    preserve: preserve_server,
                    global: global_server,
                }
            });
            drivers::combine(platform, &input, &output, &CombineOptions { servers }).await
        }
    }
}

fn driver<'a>(
    api: &ApiArgs,
    ctx: &'a CiContext,
    platform: &'a dyn CiPlatform,
) -> Result<Driver<'a>> {
    Ok(Driver {
        api: api.client()?,
        platform,
        ctx,
        project: api.project.clone(),
        poll: api.poll(),
    })
}
