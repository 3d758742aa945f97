//! The process-wide presence status the user last set explicitly. One line
//! in one file; pushed to every account of every newly started backend.

use std::io;
use std::path::Path;

pub fn load_global_status(path: &Path) -> Option<String> {
    let data = std::fs::read_to_string(path).ok()?;
    let status = data.lines().next()?.trim();
    if status.is_empty() {
        None
    } else {
        Some(status.to_owned())
    }
}

pub fn save_global_status(path: &Path, status: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", status.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global_status");

        assert_eq!(load_global_status(&path), None);
        save_global_status(&path, "away").unwrap();
        assert_eq!(load_global_status(&path), Some("away".to_owned()));
        save_global_status(&path, "online").unwrap();
        assert_eq!(load_global_status(&path), Some("online".to_owned()));
    }

    #[test]
    fn blank_file_is_no_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global_status");
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(load_global_status(&path), None);
    }
}
