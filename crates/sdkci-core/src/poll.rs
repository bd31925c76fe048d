//! Drives one build to completion by polling the build API.
//!
//! [`BuildPoller::next_step`] is pull-based: every call either returns a
//! fresh [`PollSnapshot`] or [`PollStep::Done`]. Snapshots are only produced
//! when something observable changed, when the build finished, or when the
//! polling deadline forced the remaining languages to `timed_out`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::BuildApi;
use crate::error::Result;
use crate::model::{Build, DocumentedSpecRef, Outcomes};
use crate::tracker::OutcomeTracker;

/// Polling cadence and wall-clock ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_polling: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polling: Duration::from_secs(600),
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_polling(mut self, max_polling: Duration) -> Self {
        self.max_polling = max_polling;
        self
    }
}

/// Which side of a comparison a build is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildRole {
    Base,
    Head,
}

impl fmt::Display for BuildRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildRole::Base => f.write_str("base"),
            BuildRole::Head => f.write_str("head"),
        }
    }
}

/// State of one build at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub outcomes: Outcomes,
    pub documented_spec: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    Snapshot(PollSnapshot),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollerState {
    /// No request made yet.
    Starting,
    /// At least one request made; sleep before the next.
    Waiting,
    Finished,
}

pub struct BuildPoller {
    api: Arc<dyn BuildApi>,
    build_id: String,
    role: BuildRole,
    config: PollConfig,
    tracker: OutcomeTracker,
    documented_spec: Option<String>,
    started: Instant,
    state: PollerState,
    emitted: bool,
}

impl BuildPoller {
    /// The deadline starts counting from construction.
    pub fn new(api: Arc<dyn BuildApi>, build: &Build, role: BuildRole, config: PollConfig) -> Self {
        info!(
            event = "poll.started",
            build_id = %build.id,
            label = %role,
            languages = build.targets.len(),
        );
        Self {
            api,
            build_id: build.id.clone(),
            role,
            config,
            tracker: OutcomeTracker::new(build),
            documented_spec: None,
            started: Instant::now(),
            state: PollerState::Starting,
            emitted: false,
        }
    }

    pub fn role(&self) -> BuildRole {
        self.role
    }

    fn snapshot(&mut self) -> PollStep {
        self.emitted = true;
        let snapshot = PollSnapshot {
            outcomes: self.tracker.snapshot(),
            documented_spec: self.documented_spec.clone(),
        };
        debug!(event = "poll.snapshot", build_id = %self.build_id, label = %self.role);
        PollStep::Snapshot(snapshot)
    }

    /// Advance until the next snapshot or the end of the build.
    ///
    /// Errors from retrieving the build propagate; failures fetching
    /// diagnostics or the documented spec are logged and skipped.
    pub async fn next_step(&mut self) -> Result<PollStep> {
        loop {
            match self.state {
                PollerState::Finished => return Ok(PollStep::Done),
                PollerState::Waiting => tokio::time::sleep(self.config.interval).await,
                PollerState::Starting => {}
            }

            if self.started.elapsed() >= self.config.max_polling {
                let finalized = self.tracker.finalize_timed_out();
                warn!(
                    event = "poll.timed_out",
                    build_id = %self.build_id,
                    label = %self.role,
                    languages = ?finalized,
                    "polling deadline reached"
                );
                self.state = PollerState::Finished;
                return Ok(self.snapshot());
            }

            let build = self.api.retrieve_build(&self.build_id).await?;
            let report = self.tracker.apply(&build);

            for lang in &report.newly_completed {
                self.fetch_diagnostics(lang).await;
            }
            if let Some(spec) = &report.documented_spec {
                self.fetch_documented_spec(spec).await;
            }

            if self.tracker.is_finished() {
                info!(event = "poll.finished", build_id = %self.build_id, label = %self.role);
                self.state = PollerState::Finished;
                if report.changed || !self.emitted {
                    return Ok(self.snapshot());
                }
                return Ok(PollStep::Done);
            }

            self.state = PollerState::Waiting;
            if report.changed {
                return Ok(self.snapshot());
            }
        }
    }

    async fn fetch_diagnostics(&mut self, lang: &str) {
        match self.api.list_diagnostics(&self.build_id).await {
            Ok(diagnostics) => {
                debug!(
                    build_id = %self.build_id,
                    lang = %lang,
                    count = diagnostics.len(),
                    "fetched diagnostics"
                );
                self.tracker.attach_diagnostics(lang, diagnostics);
            }
            Err(err) => {
                warn!(
                    build_id = %self.build_id,
                    lang = %lang,
                    error = %err,
                    "failed to fetch diagnostics; continuing without them"
                );
            }
        }
    }

    async fn fetch_documented_spec(&mut self, spec: &DocumentedSpecRef) {
        match self.api.download_documented_spec(spec).await {
            Ok(content) => self.documented_spec = Some(content),
            Err(err) => {
                warn!(
                    build_id = %self.build_id,
                    error = %err,
                    "failed to download documented spec"
                );
            }
        }
    }

    /// Adapt the poller into a stream that ends after the last snapshot or
    /// the first error.
    pub fn into_stream(self) -> BoxStream<'static, Result<PollSnapshot>> {
        stream::unfold(Some(self), |state| async move {
            let mut poller = state?;
            match poller.next_step().await {
                Ok(PollStep::Snapshot(snapshot)) => Some((Ok(snapshot), Some(poller))),
                Ok(PollStep::Done) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }
}

/// Poll `build` until it finishes or the deadline passes.
pub fn poll_build(
    api: Arc<dyn BuildApi>,
    build: &Build,
    role: BuildRole,
    config: PollConfig,
) -> BoxStream<'static, Result<PollSnapshot>> {
    BuildPoller::new(api, build, role, config).into_stream()
}
