use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// The peer-memo file lives at a platform-appropriate temp path (§6,
/// "Persisted state") so a restart resumes with the last known in-VM
/// client address instead of waiting for a fresh heartbeat.
pub fn default_path() -> PathBuf {
    std::env::temp_dir().join("docker-connector.peer")
}

/// Best-effort load: any failure (missing file, garbage content) is
/// treated as "no memo", not an error — the engine falls back to waiting
/// for the first heartbeat.
pub fn load(path: &Path) -> Option<SocketAddr> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn save(path: &Path, addr: SocketAddr) -> Result<()> {
    fs::write(path, addr.to_string()).with_context(|| format!("failed to write peer memo {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer");
        let addr: SocketAddr = "10.0.0.6:41000".parse().unwrap();

        assert_eq!(load(&path), None);
        save(&path, addr).unwrap();
        assert_eq!(load(&path), Some(addr));
    }

    #[test]
    fn garbage_content_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer");
        fs::write(&path, "not an address").unwrap();
        assert_eq!(load(&path), None);
    }
}
