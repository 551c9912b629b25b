use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// DeploymentStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a deployment.
///
/// Transitions: `Starting → Running | Failed`, any state → `Stopped`.
/// `Running → Starting` is only taken when Recovery re-drives a record
/// whose process did not survive a restart.
///
/// Values written by something other than this crate deserialize to
/// `Unknown` instead of failing, so a stray record cannot break listing
/// or routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeploymentStatus {
    Starting,
    Running,
    Failed,
    Stopped,
    Unknown,
}

impl DeploymentStatus {
    pub fn all() -> &'static [DeploymentStatus] {
        &[
            DeploymentStatus::Starting,
            DeploymentStatus::Running,
            DeploymentStatus::Failed,
            DeploymentStatus::Stopped,
        ]
    }

    /// Statuses Recovery re-drives after a restart.
    pub fn non_terminal() -> &'static [DeploymentStatus] {
        &[DeploymentStatus::Starting, DeploymentStatus::Running]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Starting => "starting",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStatus::Failed | DeploymentStatus::Stopped)
    }

    pub fn can_transition_to(self, to: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, to) {
            (_, Unknown) => false,
            (_, Stopped) => true,
            (Starting | Running, Starting | Running | Failed) => true,
            (Failed | Unknown, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = crate::error::PreviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starting" => Ok(DeploymentStatus::Starting),
            "running" => Ok(DeploymentStatus::Running),
            "failed" => Ok(DeploymentStatus::Failed),
            "stopped" => Ok(DeploymentStatus::Stopped),
            other => Err(crate::error::PreviewError::Validation(format!(
                "unknown status '{other}'"
            ))),
        }
    }
}

impl From<String> for DeploymentStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(DeploymentStatus::Unknown)
    }
}

impl From<DeploymentStatus> for String {
    fn from(s: DeploymentStatus) -> Self {
        s.as_str().to_string()
    }
}

/// Parse a comma-separated status filter (`"starting,running"`).
pub fn parse_status_filter(raw: &str) -> crate::error::Result<Vec<DeploymentStatus>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
