//! Thin HTTP client for a running `previewd serve`.

use anyhow::{bail, Context};
use clap::Subcommand;
use preview_core::DeploymentSummary;
use serde::de::DeserializeOwned;

use crate::output::{print_deployment, print_deployments};

#[derive(Subcommand)]
pub enum ClientCommand {
    /// Request a new preview deployment
    Deploy {
        /// Pull request URL or clone URL
        source_ref: String,
        /// Branch to fetch
        #[arg(long, short = 'b', default_value = "main")]
        branch: String,
        /// Preview config file, relative to the repository root
        #[arg(long, short = 'c')]
        config_path: String,
    },

    /// Show one deployment
    Status { id: String },

    /// List deployments, newest first
    List {
        /// Comma-separated statuses to include (e.g. `running,starting`)
        #[arg(long)]
        status: Option<String>,
    },

    /// Stop a deployment's preview server
    Stop { id: String },
}

struct Client {
    base: String,
}

impl Client {
    fn new(server: &str) -> Self {
        Self {
            base: server.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn call<T: DeserializeOwned>(&self, result: Result<ureq::Response, ureq::Error>) -> anyhow::Result<T> {
        match result {
            Ok(resp) => resp.into_json().context("invalid response from server"),
            Err(ureq::Error::Status(code, resp)) => {
                let message = resp
                    .into_json::<serde_json::Value>()
                    .ok()
                    .and_then(|v| v["error"].as_str().map(str::to_string))
                    .unwrap_or_else(|| "request failed".to_string());
                bail!("{message} (HTTP {code})")
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("cannot reach previewd at {}", self.base))),
        }
    }
}

pub fn run(server: &str, command: ClientCommand, json: bool) -> anyhow::Result<()> {
    let client = Client::new(server);
    match command {
        ClientCommand::Deploy {
            source_ref,
            branch,
            config_path,
        } => {
            let body = serde_json::json!({
                "source_ref": source_ref,
                "branch": branch,
                "config_path": config_path,
            });
            let d: DeploymentSummary =
                client.call(ureq::post(&client.url("/deploy")).send_json(body))?;
            print_deployment(&d, json)
        }
        ClientCommand::Status { id } => {
            let d: DeploymentSummary = client.call(ureq::get(&client.url(&format!("/{id}"))).call())?;
            print_deployment(&d, json)
        }
        ClientCommand::List { status } => {
            let mut req = ureq::get(&client.url("/deployments"));
            if let Some(s) = &status {
                req = req.query("status", s);
            }
            let list: Vec<DeploymentSummary> = client.call(req.call())?;
            print_deployments(&list, json)
        }
        ClientCommand::Stop { id } => {
            let d: DeploymentSummary =
                client.call(ureq::delete(&client.url(&format!("/{id}"))).call())?;
            print_deployment(&d, json)
        }
    }
}
