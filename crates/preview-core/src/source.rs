//! Resolution of caller-supplied source references into clone URLs.

use crate::error::{PreviewError, Result};

/// A source reference resolved into something the fetcher can clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// What the caller sent, kept verbatim for display.
    pub input: String,
    /// Clone URL handed to the fetcher.
    pub repo_url: String,
    /// Pull request number when the input was a PR link.
    pub pull_request: Option<u64>,
}

impl SourceRef {
    /// Parse a source reference.
    ///
    /// `https://<host>/<owner>/<repo>/pull/<n>` resolves to
    /// `https://<host>/<owner>/<repo>.git`; anything else is taken as a
    /// clone URL as-is.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PreviewError::Validation("source_ref cannot be empty".into()));
        }
        if trimmed.starts_with('-') {
            return Err(PreviewError::Validation(format!(
                "invalid source_ref: {trimmed}"
            )));
        }

        if let Some((repo_url, pr)) = split_pull_request(trimmed) {
            return Ok(Self {
                input: trimmed.to_string(),
                repo_url,
                pull_request: Some(pr),
            });
        }

        Ok(Self {
            input: trimmed.to_string(),
            repo_url: trimmed.to_string(),
            pull_request: None,
        })
    }
}

fn split_pull_request(url: &str) -> Option<(String, u64)> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let trimmed = without_query.trim_end_matches('/');
    let mut parts = trimmed.rsplitn(3, '/');
    let number = parts.next()?.parse::<u64>().ok()?;
    if parts.next()? != "pull" {
        return None;
    }
    let repo = parts.next()?;
    if !repo.contains("://") {
        return None;
    }
    Some((format!("{}.git", repo.trim_end_matches(".git")), number))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
