//! Durable deployment records using redb.
//!
//! # Table design
//!
//! A single `DEPLOYMENTS` table keyed by deployment id (`&str`) with the
//! JSON-encoded [`Deployment`] as value. Every mutation is one read-modify-
//! write inside a single redb write transaction; redb serializes write
//! transactions, so updates to one record are atomic and ordered.

use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};

use crate::deployment::Deployment;
use crate::error::{PreviewError, Result};
use crate::types::DeploymentStatus;

// ---------------------------------------------------------------------------
// Table definition
// ---------------------------------------------------------------------------

/// Key: deployment id. Value: JSON-encoded Deployment.
const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

fn store_err(e: impl std::fmt::Display) -> PreviewError {
    PreviewError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// DeploymentDb
// ---------------------------------------------------------------------------

/// Persistent store for [`Deployment`] records.
pub struct DeploymentDb {
    db: Database,
}

impl DeploymentDb {
    /// Open or create the redb database at `path`.
    ///
    /// Creates the parent directory and the `DEPLOYMENTS` table if missing.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(DEPLOYMENTS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    /// Insert a new record. Fails if the id is already taken.
    pub fn create(&self, deployment: &Deployment) -> Result<()> {
        let value = serde_json::to_vec(deployment)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(DEPLOYMENTS).map_err(store_err)?;
            if table
                .get(deployment.id.as_str())
                .map_err(store_err)?
                .is_some()
            {
                return Err(PreviewError::Store(format!(
                    "deployment already exists: {}",
                    deployment.id
                )));
            }
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Deployment> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(DEPLOYMENTS).map_err(store_err)?;
        let guard = table
            .get(id)
            .map_err(store_err)?
            .ok_or_else(|| PreviewError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    /// Move a record to `status`.
    ///
    /// `error` is stored as `last_error` when moving to `Failed` and cleared
    /// otherwise. Transitions the status table forbids (most importantly
    /// anything out of `Stopped`) are rejected with `InvalidTransition` and
    /// leave the record untouched.
    pub fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> Result<Deployment> {
        self.modify(id, |d| {
            if !d.status.can_transition_to(status) {
                return Err(PreviewError::InvalidTransition {
                    id: d.id.clone(),
                    from: d.status.to_string(),
                    to: status.to_string(),
                });
            }
            d.status = status;
            d.last_error = match status {
                DeploymentStatus::Failed => {
                    Some(error.unwrap_or("deployment failed").to_string())
                }
                _ => None,
            };
            Ok(())
        })
    }

    /// Point a record at a new local address (Recovery re-allocation).
    pub fn set_internal_url(&self, id: &str, url: &str) -> Result<Deployment> {
        self.modify(id, |d| {
            d.internal_url = url.to_string();
            Ok(())
        })
    }

    /// Records whose status is in `filter` (all records when empty),
    /// newest first.
    pub fn list(&self, filter: &[DeploymentStatus]) -> Result<Vec<Deployment>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(DEPLOYMENTS).map_err(store_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            let d: Deployment = serde_json::from_slice(v.value())?;
            if filter.is_empty() || filter.contains(&d.status) {
                result.push(d);
            }
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    fn modify<F>(&self, id: &str, f: F) -> Result<Deployment>
    where
        F: FnOnce(&mut Deployment) -> Result<()>,
    {
        let wt = self.db.begin_write().map_err(store_err)?;
        let updated = {
            let mut table = wt.open_table(DEPLOYMENTS).map_err(store_err)?;
            let raw = table
                .get(id)
                .map_err(store_err)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| PreviewError::NotFound(id.to_string()))?;
            let mut d: Deployment = serde_json::from_slice(&raw)?;
            f(&mut d)?;
            d.updated_at = Utc::now();
            let value = serde_json::to_vec(&d)?;
            table.insert(id, value.as_slice()).map_err(store_err)?;
            d
        };
        wt.commit().map_err(store_err)?;
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
