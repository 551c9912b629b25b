use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PortRange
// ---------------------------------------------------------------------------

/// Pool of local ports handed to preview processes. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 5000,
            end: 6000,
        }
    }
}

impl PortRange {
    pub fn len(&self) -> usize {
        usize::from(self.end.saturating_sub(self.start))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..self.end).contains(&port)
    }
}

// ---------------------------------------------------------------------------
// PreviewProgram
// ---------------------------------------------------------------------------

/// The external preview server launched once per deployment.
///
/// `{port}` in any argument is replaced with the allocated port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewProgram {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_program_args")]
    pub args: Vec<String>,
}

fn default_program() -> String {
    "mintlify".to_string()
}

fn default_program_args() -> Vec<String> {
    ["dev", "--no-open", "--port", "{port}"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PreviewProgram {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_program_args(),
        }
    }
}

impl PreviewProgram {
    pub fn argv(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }
}

// ---------------------------------------------------------------------------
// ServerConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub port_range: PortRange,
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u32,
    #[serde(default)]
    pub preview: PreviewProgram,
    #[serde(default = "default_config_extensions")]
    pub config_extensions: Vec<String>,
    /// Upper bound on a single fetch or existence check. `0` disables it.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_orchestrations: usize,
    #[serde(default = "default_public_scheme")]
    pub public_scheme: String,
    /// When set, external URLs use this domain instead of the request Host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_domain: Option<String>,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_listen_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_DATA_DIR)
}

fn default_port_attempts() -> u32 {
    64
}

fn default_config_extensions() -> Vec<String> {
    vec![".json".to_string()]
}

fn default_fetch_timeout_secs() -> u64 {
    600
}

fn default_max_concurrent() -> usize {
    8
}

fn default_public_scheme() -> String {
    "http".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            data_dir: default_data_dir(),
            port_range: PortRange::default(),
            port_attempts: default_port_attempts(),
            preview: PreviewProgram::default(),
            config_extensions: default_config_extensions(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_concurrent_orchestrations: default_max_concurrent(),
            public_scheme: default_public_scheme(),
            public_domain: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ServerConfig {
    /// Load from an explicit file, or `<data_dir>/config.yaml` when present,
    /// or fall back to defaults rooted at `data_dir`.
    pub fn load(explicit: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        let path = match (explicit, data_dir) {
            (Some(p), _) => Some(p.to_path_buf()),
            (None, Some(dir)) => Some(paths::config_path(dir)).filter(|p| p.exists()),
            (None, None) => Some(paths::config_path(&default_data_dir())).filter(|p| p.exists()),
        };

        let mut config = match path {
            Some(p) => {
                let data = std::fs::read_to_string(&p)?;
                serde_yaml::from_str::<ServerConfig>(&data)?
            }
            None => ServerConfig::default(),
        };
        if let Some(dir) = data_dir {
            config.data_dir = dir.to_path_buf();
        }
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn db_path(&self) -> PathBuf {
        paths::db_path(&self.data_dir)
    }

    pub fn deployment_dir(&self, id: &str) -> PathBuf {
        paths::deployment_dir(&self.data_dir, id)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.port_range.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "port_range {}..{} is empty",
                    self.port_range.start, self.port_range.end
                ),
            });
        } else if self.port_range.contains(self.listen_port) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "listen_port {} lies inside port_range and may be handed to a preview",
                    self.listen_port
                ),
            });
        }

        if self.preview.program.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "preview.program is empty".to_string(),
            });
        } else if !self.preview.args.iter().any(|a| a.contains("{port}")) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "preview.args never mentions {port}; previews may not bind the allocated port"
                    .to_string(),
            });
        }

        if self.config_extensions.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "config_extensions is empty; every deployment would be rejected"
                    .to_string(),
            });
        }

        if self.port_attempts == 0 || self.max_concurrent_orchestrations == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "port_attempts and max_concurrent_orchestrations must be at least 1"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
