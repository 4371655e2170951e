//! Alert files: empty marker files that surface a condition to external
//! monitoring by their mere existence under `alert_file_dir`.

use std::path::{Path, PathBuf};

pub const AUTHENTICATION_ERROR: &str = "authentication_error";
pub const REPLICATION_DELAY_WARNING: &str = "replication_delay_warning";
pub const MULTIPLE_MASTER_WARNING: &str = "multiple_master_warning";
pub const FAILOVER_HAS_HAPPENED: &str = "failover_has_happened";

fn path_for(alert_file_dir: &Path, name: &str) -> PathBuf {
    alert_file_dir.join(name)
}

/// Creates the alert file, logging (not failing) on I/O error.
pub fn create(alert_file_dir: &Path, name: &str) {
    let path = path_for(alert_file_dir, name);
    if let Err(error) = std::fs::write(&path, "alert") {
        tracing::error!(%error, path = %path.display(), "failed to create alert file");
    } else {
        tracing::debug!(path = %path.display(), "created alert file");
    }
}

/// Deletes the alert file if present, logging (not failing) on I/O error
/// other than "not found".
pub fn delete(alert_file_dir: &Path, name: &str) {
    let path = path_for(alert_file_dir, name);
    match std::fs::remove_file(&path) {
        Ok(()) => tracing::debug!(path = %path.display(), "deleted alert file"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => tracing::error!(%error, path = %path.display(), "failed to delete alert file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn create_then_delete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), MULTIPLE_MASTER_WARNING);
        assert!(dir.path().join(MULTIPLE_MASTER_WARNING).exists());

        delete(dir.path(), MULTIPLE_MASTER_WARNING);
        assert!(!dir.path().join(MULTIPLE_MASTER_WARNING).exists());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn delete_of_missing_file_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        delete(dir.path(), "never_existed");
    }
}
