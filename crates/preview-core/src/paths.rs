use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DEFAULT_DATA_DIR: &str = ".preview";
pub const REPOS_DIR: &str = "repos";
pub const DB_FILE: &str = "deployments.redb";
pub const CONFIG_FILE: &str = "config.yaml";
pub const GIT_DIR: &str = ".git";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE)
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

pub fn repos_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(REPOS_DIR)
}

/// Working tree for one deployment's fetched source.
pub fn deployment_dir(data_dir: &Path, id: &str) -> PathBuf {
    repos_dir(data_dir).join(id)
}

// ---------------------------------------------------------------------------
// Deployment ids
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[0-9a-f]{32}$").unwrap())
}

/// Mint a fresh deployment id. Lowercase hex so it is a valid DNS label.
pub fn new_deployment_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Normalize a host label (case-insensitive) to the id format, or `None`
/// if it cannot be a deployment id.
pub fn normalize_id(label: &str) -> Option<String> {
    let lower = label.trim().to_ascii_lowercase();
    id_re().is_match(&lower).then_some(lower)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
