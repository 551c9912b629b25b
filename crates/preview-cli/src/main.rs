mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::client::ClientCommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "previewd",
    about = "Ephemeral documentation previews: fetch a branch, run a preview server, route a subdomain to it",
    version,
    propagate_version = true
)]
struct Cli {
    /// Base URL of a running previewd (client commands)
    #[arg(long, global = true, env = "PREVIEWD_URL", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the deployment manager and subdomain proxy
    Serve {
        /// Config file (default: <data-dir>/config.yaml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for the deployment store and fetched trees
        #[arg(long, env = "PREVIEWD_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },

    #[command(flatten)]
    Client(ClientCommand),
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        Commands::Client(_) => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve {
            config,
            data_dir,
            port,
        } => cmd::serve::run(config.as_deref(), data_dir.as_deref(), port),
        Commands::Client(command) => cmd::client::run(&cli.server, command, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
