//! Git plumbing for reading the base revision of a pull request.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::error::{CiError, Result};

async fn git(dir: &Path, args: &[&str]) -> Result<std::process::Output> {
    debug!(?args, "git");
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| CiError::Git(format!("failed to run git: {e}")))
}

async fn git_stdout(dir: &Path, args: &[&str]) -> Result<String> {
    let output = git(dir, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CiError::Git(format!("git {} failed: {}", args.join(" "), stderr.trim())));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Fetch `rev` from `remote` so it is available in a shallow checkout.
pub async fn fetch(dir: &Path, remote: &str, rev: &str) -> Result<()> {
    git_stdout(dir, &["fetch", "--no-tags", "--depth=1000", remote, rev]).await?;
    Ok(())
}

/// Best common ancestor of two revisions.
pub async fn merge_base(dir: &Path, a: &str, b: &str) -> Result<String> {
    let sha = git_stdout(dir, &["merge-base", a, b]).await?.trim().to_string();
    if sha.is_empty() {
        return Err(CiError::Git(format!("no merge base between {a} and {b}")));
    }
    Ok(sha)
}

/// Contents of `path` at `rev`, or `None` if the file does not exist there.
pub async fn show_file(dir: &Path, rev: &str, path: &str) -> Result<Option<String>> {
    let object = format!("{rev}:{path}");
    if !git(dir, &["cat-file", "-e", &object]).await?.status.success() {
        return Ok(None);
    }
    git_stdout(dir, &["show", &object]).await.map(Some)
}
