//! Startup reconciliation of persisted state with the (empty) supervisor.

use preview_core::error::Result;
use preview_core::DeploymentStatus;
use serde::Serialize;

use crate::lifecycle::LifecycleManager;

#[derive(Debug, Default, Clone, Serialize)]
pub struct RecoveryReport {
    /// Ids handed back to the orchestration pool.
    pub redriven: Vec<String>,
    /// Ids already being orchestrated or supervised in this process.
    pub skipped: Vec<String>,
    /// Ids that could not even be resubmitted; marked failed.
    pub failed: Vec<String>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.redriven.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}

/// Re-drive every `starting` or `running` record.
///
/// Each record becomes an independent job in the lifecycle pool; this call
/// only submits them and returns. Call it once, before serving traffic, so
/// no subdomain request sees a `running` record without a live process
/// behind it for longer than the relaunch takes.
pub fn recover(lifecycle: &LifecycleManager) -> Result<RecoveryReport> {
    let pending = lifecycle.store().list(DeploymentStatus::non_terminal())?;
    let mut report = RecoveryReport::default();

    for deployment in pending {
        let id = deployment.id.clone();
        match lifecycle.resume(&deployment) {
            Ok(true) => report.redriven.push(id),
            Ok(false) => report.skipped.push(id),
            Err(e) => {
                tracing::warn!(id = %id, "recovery failed: {e}");
                if let Err(store_err) = lifecycle.store().update_status(
                    &id,
                    DeploymentStatus::Failed,
                    Some(&format!("recovery failed: {e}")),
                ) {
                    tracing::error!(id = %id, "could not record recovery failure: {store_err}");
                }
                report.failed.push(id);
            }
        }
    }

    if !report.is_empty() {
        tracing::info!(
            redriven = report.redriven.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "recovery submitted"
        );
    }
    Ok(report)
}
