use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("preview server for {0} not found")]
    NotSupervised(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("configuration not found: {0}")]
    Configuration(String),

    #[error("failed to start preview server: {0}")]
    Process(String),

    #[error("failed to stop preview server for {id}: {reason}")]
    Supervision { id: String, reason: String },

    #[error("invalid status transition for {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("no free port found after {attempts} attempts")]
    PortExhausted { attempts: u32 },

    #[error("deployment store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PreviewError>;
