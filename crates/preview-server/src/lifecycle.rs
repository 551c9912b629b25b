//! Deployment Lifecycle Manager.
//!
//! `create` does the request-time work (validation, source check, port,
//! record) and returns with the record in `starting`. Everything after that
//! runs as one background job per deployment in a bounded pool: fetch the
//! tree if needed, locate the config file, hand off to the [`Supervisor`].
//! A job that fails records `failed` with the reason and stops there.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use preview_core::config::ServerConfig;
use preview_core::deployment::{
    external_url, internal_url, validate_branch, validate_config_path,
};
use preview_core::error::{PreviewError, Result};
use preview_core::fetch::SourceFetcher;
use preview_core::io::is_unpopulated;
use preview_core::paths::new_deployment_id;
use preview_core::ports::PortAllocator;
use preview_core::source::SourceRef;
use preview_core::{Deployment, DeploymentDb, DeploymentStatus};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::supervisor::Supervisor;

/// Body of `POST /deploy`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    #[serde(alias = "sourceRef")]
    pub source_ref: String,
    pub branch: String,
    #[serde(alias = "configPath")]
    pub config_path: String,
}

/// What one background job needs to know.
#[derive(Debug, Clone)]
struct Job {
    id: String,
    repo_url: String,
    branch: String,
    config_path: String,
    port: u16,
}

struct Orchestrator {
    config: Arc<ServerConfig>,
    store: Arc<DeploymentDb>,
    supervisor: Arc<Supervisor>,
    ports: Arc<PortAllocator>,
    fetcher: Arc<dyn SourceFetcher>,
    in_flight: Mutex<HashSet<String>>,
}

pub struct LifecycleManager {
    inner: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<ServerConfig>,
        store: Arc<DeploymentDb>,
        supervisor: Arc<Supervisor>,
        ports: Arc<PortAllocator>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_orchestrations.max(1)));
        Self {
            inner: Arc::new(Orchestrator {
                config,
                store,
                supervisor,
                ports,
                fetcher,
                in_flight: Mutex::new(HashSet::new()),
            }),
            permits,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<DeploymentDb> {
        &self.inner.store
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.inner.supervisor
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.inner.config
    }

    /// Accept a deployment request.
    ///
    /// Validation and the source existence check happen before anything is
    /// persisted, so a rejected request leaves no record behind. `host` is
    /// the Host the request arrived on, used for the external URL unless a
    /// public domain is configured.
    pub async fn create(&self, req: CreateRequest, host: &str) -> Result<Deployment> {
        let source = SourceRef::parse(&req.source_ref)?;
        validate_branch(&req.branch)?;
        let branch = req.branch.trim().to_string();
        let config_path = req.config_path.trim().to_string();
        validate_config_path(&config_path, &self.inner.config.config_extensions)?;

        let fetcher = Arc::clone(&self.inner.fetcher);
        let (repo_url, b) = (source.repo_url.clone(), branch.clone());
        tokio::task::spawn_blocking(move || fetcher.exists(&repo_url, &b))
            .await
            .map_err(|e| PreviewError::Fetch(format!("source check aborted: {e}")))??;

        let domain = self.inner.config.public_domain.as_deref().unwrap_or(host);
        if domain.is_empty() {
            return Err(PreviewError::Validation("missing Host header".into()));
        }

        let port = self.inner.ports.allocate()?;
        let id = new_deployment_id();
        let deployment = Deployment::new(
            &id,
            &source.input,
            &source.repo_url,
            &branch,
            &config_path,
            port,
            external_url(&self.inner.config.public_scheme, &id, domain),
        );
        if let Err(e) = self.inner.store.create(&deployment) {
            self.inner.ports.release(port);
            return Err(e);
        }
        tracing::info!(id = %id, repo = %source.repo_url, branch = %branch, port, "deployment accepted");

        self.submit(Job {
            id,
            repo_url: source.repo_url,
            branch,
            config_path,
            port,
        });
        Ok(deployment)
    }

    /// Re-drive a persisted non-terminal record. Returns `false` when the id
    /// is already being orchestrated or supervised here.
    pub fn resume(&self, deployment: &Deployment) -> Result<bool> {
        let id = &deployment.id;
        if self.is_busy(id) {
            return Ok(false);
        }
        self.inner
            .store
            .update_status(id, DeploymentStatus::Starting, None)?;

        let port = match deployment.port().filter(|p| self.inner.ports.claim(*p)) {
            Some(p) => p,
            None => {
                let p = self.inner.ports.allocate()?;
                if let Err(e) = self.inner.store.set_internal_url(id, &internal_url(p)) {
                    self.inner.ports.release(p);
                    return Err(e);
                }
                tracing::info!(id = %id, port = p, "recorded port unavailable, reassigned");
                p
            }
        };

        self.submit(Job {
            id: id.clone(),
            repo_url: deployment.repo_url.clone(),
            branch: deployment.branch.clone(),
            config_path: deployment.config_path.clone(),
            port,
        });
        Ok(true)
    }

    /// True while `id` has a queued or running job, or a live process.
    pub fn is_busy(&self, id: &str) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
            || self.inner.supervisor.is_supervised(id)
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn submit(&self, job: Job) {
        let Some(guard) = InFlight::enter(&self.inner, &job.id) else {
            tracing::warn!(id = %job.id, "orchestration already in flight, not resubmitting");
            self.inner.ports.release(job.port);
            return;
        };
        let inner = Arc::clone(&self.inner);
        let permits = Arc::clone(&self.permits);

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                tracing::error!("orchestration task panicked: {e}");
            }
        }
        tasks.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            inner.run(job).await;
        });
    }

    /// Wait up to `grace` for queued and running jobs. Returns how many were
    /// still unfinished (and are abandoned) when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut set = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if set.is_empty() {
            return 0;
        }
        tracing::info!(pending = set.len(), "waiting for in-flight orchestrations");
        let _ = tokio::time::timeout(grace, async {
            while set.join_next().await.is_some() {}
        })
        .await;
        let remaining = set.len();
        if remaining > 0 {
            tracing::warn!(remaining, "abandoning orchestrations after grace period");
        }
        remaining
    }
}

// ---------------------------------------------------------------------------
// Background job
// ---------------------------------------------------------------------------

impl Orchestrator {
    async fn run(&self, job: Job) {
        let id = job.id.clone();
        let port = job.port;
        if let Err(e) = self.provision(job).await {
            self.fail(&id, port, &e);
        }
    }

    /// Fetch, locate config, start. The supervisor records its own outcome.
    async fn provision(&self, job: Job) -> Result<()> {
        let dir = self.config.deployment_dir(&job.id);
        if is_unpopulated(&dir) {
            let fetcher = Arc::clone(&self.fetcher);
            let (repo, branch, dest) = (job.repo_url.clone(), job.branch.clone(), dir.clone());
            tokio::task::spawn_blocking(move || fetcher.fetch(&repo, &branch, &dest))
                .await
                .map_err(|e| PreviewError::Fetch(format!("fetch aborted: {e}")))??;
        } else {
            tracing::debug!(id = %job.id, "working tree present, skipping fetch");
        }

        let working_dir = locate_config(&dir, &job.config_path)?;
        // A start failure is already recorded and its port released.
        let _ = self.supervisor.start(&job.id, job.port, &working_dir);
        Ok(())
    }

    fn fail(&self, id: &str, port: u16, err: &PreviewError) {
        tracing::warn!(id, "deployment failed: {err}");
        self.ports.release(port);
        if let Err(e) = self
            .store
            .update_status(id, DeploymentStatus::Failed, Some(&err.to_string()))
        {
            tracing::error!(id, "could not record failure: {e}");
        }
    }
}

/// Directory holding `config_path` inside `tree`.
fn locate_config(tree: &Path, config_path: &str) -> Result<PathBuf> {
    let file = tree.join(config_path);
    if !file.is_file() {
        return Err(PreviewError::Configuration(config_path.to_string()));
    }
    Ok(file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| tree.to_path_buf()))
}

/// Membership in the in-flight set, removed on drop.
struct InFlight {
    inner: Arc<Orchestrator>,
    id: String,
}

impl InFlight {
    fn enter(inner: &Arc<Orchestrator>, id: &str) -> Option<Self> {
        let inserted = inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        inserted.then(|| Self {
            inner: Arc::clone(inner),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
