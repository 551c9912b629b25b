use std::path::Path;

use anyhow::Context;
use preview_core::config::ServerConfig;

/// Load configuration, apply CLI overrides, and run the server until
/// Ctrl-C or SIGTERM.
pub fn run(config_file: Option<&Path>, data_dir: Option<&Path>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(config_file, data_dir).context("failed to load config")?;
    if let Some(port) = port {
        config.listen_port = port;
    }
    tracing::info!(
        data_dir = %config.data_dir.display(),
        program = %config.preview.program,
        "starting previewd"
    );

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(preview_server::serve(config))
}
