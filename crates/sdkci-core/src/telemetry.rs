//! Logging setup for the `sdkci` binary.
//!
//! CI runners capture stderr as the job log, while stdout and the output
//! files carry step results. Everything here therefore writes to stderr.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level. Everything else, such as
/// reqwest and hyper connection chatter, stays at `warn`.
const SDKCI_TARGETS: &[&str] = &["sdkci", "sdkci_core", "sdkci_api", "sdkci_ci", "sdkci_cli"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(SDKCI_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides `level`; `json` writes
/// one JSON object per event for log shippers. Only the first call in a
/// process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
