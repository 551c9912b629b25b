use crate::error::Result;
use crate::paths::GIT_DIR;
use std::path::Path;

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// True when `dir` is missing, empty, or holds nothing but `.git`.
///
/// Such a directory has to be (re)fetched before a preview can run from it.
pub fn is_unpopulated(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return true;
    };
    entries
        .filter_map(|e| e.ok())
        .all(|e| e.file_name() == GIT_DIR)
}

/// Remove `dir` and its contents if it exists.
pub fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_and_empty_dirs_are_unpopulated() {
        let dir = TempDir::new().unwrap();
        assert!(is_unpopulated(&dir.path().join("missing")));
        assert!(is_unpopulated(dir.path()));
    }

    #[test]
    fn git_only_dir_is_unpopulated() {
        let dir = TempDir::new().unwrap();
        ensure_dir(&dir.path().join(".git/objects")).unwrap();
        assert!(is_unpopulated(dir.path()));
    }

    #[test]
    fn any_other_entry_populates() {
        let dir = TempDir::new().unwrap();
        ensure_dir(&dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        assert!(!is_unpopulated(dir.path()));
    }

    #[test]
    fn remove_dir_if_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("gone");
        ensure_dir(&target).unwrap();
        remove_dir_if_exists(&target).unwrap();
        remove_dir_if_exists(&target).unwrap();
        assert!(!target.exists());
    }
}
