use std::sync::Arc;

use preview_core::config::ServerConfig;
use preview_core::fetch::SourceFetcher;
use preview_core::io::ensure_dir;
use preview_core::ports::PortAllocator;
use preview_core::DeploymentDb;

use crate::lifecycle::LifecycleManager;
use crate::supervisor::Supervisor;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<DeploymentDb>,
    pub supervisor: Arc<Supervisor>,
    pub lifecycle: Arc<LifecycleManager>,
    /// Upstream client for proxied requests. Redirects go back to the browser.
    pub http: reqwest::Client,
}

impl AppState {
    /// Open the store under `config.data_dir` and wire the components.
    pub fn new(config: ServerConfig, fetcher: Arc<dyn SourceFetcher>) -> anyhow::Result<Self> {
        ensure_dir(&config.data_dir)?;
        let config = Arc::new(config);
        let store = Arc::new(DeploymentDb::open(&config.db_path())?);
        let ports = Arc::new(PortAllocator::new(config.port_range, config.port_attempts));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&store),
            Arc::clone(&ports),
            config.preview.clone(),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&supervisor),
            ports,
            fetcher,
        ));
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            config,
            store,
            supervisor,
            lifecycle,
            http,
        })
    }
}
