pub mod config;
pub mod deployment;
pub mod error;
pub mod fetch;
pub mod io;
pub mod paths;
pub mod ports;
pub mod source;
pub mod store;
pub mod types;

pub use deployment::{Deployment, DeploymentSummary};
pub use error::{PreviewError, Result};
pub use store::DeploymentDb;
pub use types::DeploymentStatus;
