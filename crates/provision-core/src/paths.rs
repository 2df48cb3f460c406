use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PROVISION_DIR: &str = ".provision";
pub const LOGS_DIR: &str = ".provision/logs";

pub const CONFIG_FILE: &str = ".provision/config.yaml";

pub const LATEST_RUN_FILE: &str = "latest";
pub const RUN_LOG_EXT: &str = "jsonl";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn provision_dir(root: &Path) -> PathBuf {
    root.join(PROVISION_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn default_logs_dir(root: &Path) -> PathBuf {
    root.join(LOGS_DIR)
}

/// Resolve a configured path against the project root. Absolute paths pass through.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

pub fn run_log_path(log_dir: &Path, run_id: &str) -> PathBuf {
    log_dir.join(format!("{run_id}.{RUN_LOG_EXT}"))
}

pub fn latest_run_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LATEST_RUN_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_under_provision_dir() {
        let root = Path::new("/srv/app");
        assert_eq!(
            config_path(root),
            PathBuf::from("/srv/app/.provision/config.yaml")
        );
    }

    #[test]
    fn resolve_keeps_absolute() {
        let root = Path::new("/srv/app");
        assert_eq!(
            resolve(root, Path::new("/var/log/provision")),
            PathBuf::from("/var/log/provision")
        );
        assert_eq!(
            resolve(root, Path::new(".provision/logs")),
            PathBuf::from("/srv/app/.provision/logs")
        );
    }

    #[test]
    fn run_log_file_name() {
        let p = run_log_path(Path::new("/tmp/logs"), "20261019-abc");
        assert_eq!(p, PathBuf::from("/tmp/logs/20261019-abc.jsonl"));
    }
}
