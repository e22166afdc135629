use std::path::PathBuf;

use apkup_backend::{MountState, NetworkProbe, PlatformError, StorageProbe};
use log::debug;

/// Staging storage on a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl StorageProbe for LocalStorage {
    fn mount_state(&self) -> MountState {
        if let Err(error) = std::fs::create_dir_all(&self.root) {
            debug!("Staging directory {} unavailable: {error}", self.root.display());
            return MountState::Missing;
        }
        match std::fs::metadata(&self.root) {
            Ok(metadata) if metadata.permissions().readonly() => MountState::ReadOnly,
            Ok(metadata) if metadata.is_dir() => MountState::Mounted,
            _ => MountState::Missing,
        }
    }

    fn free_bytes(&self) -> Result<u64, PlatformError> {
        Ok(fs2::available_space(&self.root)?)
    }
}

/// Metered state supplied by configuration, since a desktop host cannot
/// observe the device's connection.
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredNetwork {
    pub metered: bool,
}

impl NetworkProbe for ConfiguredNetwork {
    fn is_metered(&self) -> bool {
        self.metered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_storage_creates_and_reports_mounted_directory() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let storage = LocalStorage::new(temp_dir.path().join("downloads"));

        assert_eq!(storage.mount_state(), MountState::Mounted);
        assert!(temp_dir.path().join("downloads").is_dir());
        assert!(storage.free_bytes().expect("free space should be known") > 0);
    }

    #[test]
    fn local_storage_under_a_file_is_missing() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"file").expect("blocker file should be written");
        let storage = LocalStorage::new(blocker.join("downloads"));

        assert_eq!(storage.mount_state(), MountState::Missing);
        assert!(storage.free_bytes().is_err());
    }

    #[test]
    fn configured_network_reports_setting() {
        assert!(ConfiguredNetwork { metered: true }.is_metered());
        assert!(!ConfiguredNetwork { metered: false }.is_metered());
    }
}
