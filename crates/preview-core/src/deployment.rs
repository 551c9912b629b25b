use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::error::{PreviewError, Result};
use crate::types::DeploymentStatus;

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// One tracked preview deployment, as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    /// Reference as supplied by the caller (PR link or clone URL).
    pub source_ref: String,
    /// Clone URL resolved from `source_ref`.
    pub repo_url: String,
    pub branch: String,
    /// Preview config file, relative to the fetched tree.
    pub config_path: String,
    /// `http://127.0.0.1:<port>` of the local preview process.
    pub internal_url: String,
    /// Public subdomain URL handed to callers.
    pub external_url: String,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// A fresh record in `Starting`.
    pub fn new(
        id: impl Into<String>,
        source_ref: impl Into<String>,
        repo_url: impl Into<String>,
        branch: impl Into<String>,
        config_path: impl Into<String>,
        port: u16,
        external_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_ref: source_ref.into(),
            repo_url: repo_url.into(),
            branch: branch.into(),
            config_path: config_path.into(),
            internal_url: internal_url(port),
            external_url: external_url.into(),
            status: DeploymentStatus::Starting,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Port parsed back out of `internal_url`.
    pub fn port(&self) -> Option<u16> {
        port_from_url(&self.internal_url)
    }

    /// The public projection returned by the management API.
    pub fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            id: self.id.clone(),
            source_ref: self.source_ref.clone(),
            branch: self.branch.clone(),
            external_url: self.external_url.clone(),
            status: self.status,
            last_error: self.last_error.clone(),
        }
    }
}

/// What callers of the management API see of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub id: String,
    pub source_ref: String,
    pub branch: String,
    pub external_url: String,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

pub fn internal_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

pub fn port_from_url(url: &str) -> Option<u16> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = without_scheme.split('/').next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// `<scheme>://<id>.<host>` where `host` is the public domain the request
/// arrived on (port kept).
pub fn external_url(scheme: &str, id: &str, host: &str) -> String {
    format!("{scheme}://{id}.{host}")
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a requested config path: non-empty, relative, no `..`, and ending
/// in one of `extensions`.
pub fn validate_config_path(path: &str, extensions: &[String]) -> Result<()> {
    if path.trim().is_empty() {
        return Err(PreviewError::Validation("config_path cannot be empty".into()));
    }
    if !extensions.iter().any(|ext| path.ends_with(ext.as_str())) {
        return Err(PreviewError::Validation(format!(
            "config_path must end with {}",
            extensions.join(" or ")
        )));
    }
    let p = Path::new(path);
    if p.is_absolute()
        || p.components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(PreviewError::Validation(format!(
            "config_path must be relative to the repository root: {path}"
        )));
    }
    Ok(())
}

pub fn validate_branch(branch: &str) -> Result<()> {
    let b = branch.trim();
    if b.is_empty() {
        return Err(PreviewError::Validation("branch cannot be empty".into()));
    }
    if b.starts_with('-') || b.chars().any(char::is_whitespace) {
        return Err(PreviewError::Validation(format!("invalid branch name: {b}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
