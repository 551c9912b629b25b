//! Source fetching: the collaborator that checks and clones a remote tree.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{PreviewError, Result};
use crate::io::remove_dir_if_exists;

/// Checks and fetches source trees. Implementations block; async callers
/// run them on `spawn_blocking`.
pub trait SourceFetcher: Send + Sync {
    /// Ok when `repo_url` is reachable and `branch` exists on it.
    fn exists(&self, repo_url: &str, branch: &str) -> Result<()>;

    /// Shallow, single-branch fetch of `branch` into `dest`, replacing
    /// whatever is there.
    fn fetch(&self, repo_url: &str, branch: &str, dest: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// GitFetcher
// ---------------------------------------------------------------------------

/// [`SourceFetcher`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git: PathBuf,
    timeout: Option<Duration>,
}

impl GitFetcher {
    /// Locate `git` on `PATH`. `timeout` bounds every git invocation.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let git = which::which("git")
            .map_err(|_| PreviewError::Fetch("git not found on PATH".into()))?;
        Ok(Self { git, timeout })
    }

    fn run(&self, args: &[&str]) -> Result<GitOutput> {
        let mut child = Command::new(&self.git)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PreviewError::Fetch(format!("failed to run git: {e}")))?;

        // Drain both pipes off-thread so a chatty git cannot block on a full pipe.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PreviewError::Fetch(format!(
                    "git {} timed out after {}s",
                    args.first().copied().unwrap_or_default(),
                    self.timeout.unwrap_or_default().as_secs()
                )));
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        let join = |h: Option<std::thread::JoinHandle<String>>| {
            h.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        Ok(GitOutput {
            success: status.success(),
            stdout: join(stdout),
            stderr: join(stderr),
        })
    }
}

struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

fn drain<R: Read + Send + 'static>(mut r: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = r.read_to_string(&mut buf);
        buf
    })
}

impl SourceFetcher for GitFetcher {
    fn exists(&self, repo_url: &str, branch: &str) -> Result<()> {
        let wanted = format!("refs/heads/{branch}");
        let out = self.run(&["ls-remote", "--heads", repo_url, &wanted])?;
        if !out.success {
            return Err(PreviewError::Fetch(format!(
                "repository {repo_url} is not reachable: {}",
                out.stderr.trim()
            )));
        }
        // ls-remote matches patterns as path suffixes; only the exact ref counts.
        let found = out
            .stdout
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|r| r == wanted);
        if !found {
            return Err(PreviewError::Fetch(format!(
                "branch {branch} not found in repository {repo_url}"
            )));
        }
        Ok(())
    }

    fn fetch(&self, repo_url: &str, branch: &str, dest: &Path) -> Result<()> {
        remove_dir_if_exists(dest)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dest_str = dest.to_string_lossy();
        tracing::info!(repo = repo_url, branch, dest = %dest.display(), "cloning source");
        let out = self.run(&[
            "clone",
            "--depth",
            "1",
            "--single-branch",
            "--branch",
            branch,
            "--",
            repo_url,
            &dest_str,
        ])?;
        if !out.success {
            return Err(PreviewError::Fetch(format!(
                "failed to clone {repo_url} on branch {branch}: {}",
                out.stderr.trim()
            )));
        }
        tracing::debug!(repo = repo_url, "{}", out.stderr.trim());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
