//! Filesystem command sink. Presence-based rendezvous files in the
//! supervisor's working directory. Contents are never read — only
//! existence and removal matter. Filenames compose as `<verb><app-name>`,
//! lower-cased; app-name comparisons are case-insensitive.

use std::path::{Path, PathBuf};

pub const WDT_STOP: &str = "wdtstop";
pub const WDT_RESTART: &str = "wdtrestart";
pub const WDT_REBOOT: &str = "wdtreboot";

pub fn start_file(dir: &Path, app_name: &str) -> PathBuf {
    dir.join(format!("start{}", app_name.to_lowercase()))
}

pub fn stop_file(dir: &Path, app_name: &str) -> PathBuf {
    dir.join(format!("stop{}", app_name.to_lowercase()))
}

pub fn restart_file(dir: &Path, app_name: &str) -> PathBuf {
    dir.join(format!("restart{}", app_name.to_lowercase()))
}

/// Best-effort, idempotent presence check — a rendezvous file is shared with
/// the operator, so races (file removed between exists() and a later
/// remove_file()) are expected and not errors.
pub fn present(path: &Path) -> bool {
    path.exists()
}

/// Best-effort removal; a missing file is not an error.
pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn filenames_are_lowercased() {
        let dir = PathBuf::from("/tmp");
        assert_eq!(start_file(&dir, "MyApp"), dir.join("startmyapp"));
        assert_eq!(stop_file(&dir, "MyApp"), dir.join("stopmyapp"));
        assert_eq!(restart_file(&dir, "MyApp"), dir.join("restartmyapp"));
    }

    #[test]
    fn presence_and_removal_are_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("startfoo");
        assert!(!present(&path));
        std::fs::write(&path, b"").unwrap();
        assert!(present(&path));
        remove(&path);
        assert!(!present(&path));
        // Removing again must not panic or error.
        remove(&path);
    }

    #[test]
    fn global_marker_names() {
        assert_eq!(WDT_STOP, "wdtstop");
        assert_eq!(WDT_RESTART, "wdtrestart");
        assert_eq!(WDT_REBOOT, "wdtreboot");
    }
}
