use std::path::{Path, PathBuf};

use apkup_backend::ReleaseInfo;
use log::{debug, warn};

use crate::persist::write_atomic;

const ARTIFACT_SUFFIX: &str = ".apk";
const RELEASE_SIDECAR_SUFFIX: &str = ".apk.json";

/// Downloaded archives, one per package, kept until installed or cleaned.
///
/// Next to each complete archive a small JSON sidecar records the release it
/// was downloaded for; an archive without a sidecar is never reused.
#[derive(Debug, Clone)]
pub struct LocalArtifactCache {
    dir: PathBuf,
}

impl LocalArtifactCache {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn artifact_path(&self, package_id: &str) -> PathBuf {
        self.dir.join(format!("{package_id}{ARTIFACT_SUFFIX}"))
    }

    fn sidecar_path(&self, package_id: &str) -> PathBuf {
        self.dir.join(format!("{package_id}{RELEASE_SIDECAR_SUFFIX}"))
    }

    /// Release the complete archive was downloaded for, if any.
    #[must_use]
    pub fn staged_release(&self, package_id: &str) -> Option<ReleaseInfo> {
        if !self.artifact_path(package_id).is_file() {
            return None;
        }
        let data = std::fs::read_to_string(self.sidecar_path(package_id)).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Whether a complete archive for exactly `release` is present.
    #[must_use]
    pub fn is_available(&self, package_id: &str, release: &ReleaseInfo) -> bool {
        self.staged_release(package_id)
            .is_some_and(|staged| &staged == release)
    }

    /// Record that the archive now at [`Self::artifact_path`] belongs to
    /// `release`.
    ///
    /// # Errors
    /// Returns an error when the sidecar cannot be written.
    pub fn mark_complete(&self, package_id: &str, release: &ReleaseInfo) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(release).map_err(std::io::Error::other)?;
        write_atomic(&self.sidecar_path(package_id), &data)
    }

    /// Remove the complete archive and its sidecar, keeping partial data.
    pub fn delete_complete(&self, package_id: &str) {
        for path in [self.artifact_path(package_id), self.sidecar_path(package_id)] {
            remove_if_present(&path);
        }
    }

    /// Remove everything stored for `package_id`, partial downloads included.
    pub fn delete(&self, package_id: &str) -> usize {
        let prefix = format!("{package_id}{ARTIFACT_SUFFIX}");
        self.remove_matching(|name| name.starts_with(&prefix))
    }

    /// Remove every stored file; returns how many were deleted.
    pub fn clean_all(&self) -> usize {
        self.remove_matching(|_| true)
    }

    fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let matched = path.is_file()
                && path
                    .file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .is_some_and(&matches);
            if matched && remove_if_present(&path) {
                removed += 1;
            }
        }
        debug!("Removed {removed} files from {}", self.dir.display());
        removed
    }
}

fn remove_if_present(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => false,
        Err(error) => {
            warn!("Failed to remove {}: {error}", path.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{detailed_release, release};

    fn cache() -> (tempfile::TempDir, LocalArtifactCache) {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let cache = LocalArtifactCache::new(dir.path().to_path_buf());
        (dir, cache)
    }

    #[test]
    fn archive_is_available_only_for_the_recorded_release() {
        let (_dir, cache) = cache();
        let brave = release("1.20.103", "https://dl.example/1.20.103/brave.apk");

        assert!(!cache.is_available("com.brave.browser", &brave));

        std::fs::write(cache.artifact_path("com.brave.browser"), b"apk")
            .expect("archive should be written");
        assert!(!cache.is_available("com.brave.browser", &brave));

        cache
            .mark_complete("com.brave.browser", &brave)
            .expect("sidecar should be written");
        assert!(cache.is_available("com.brave.browser", &brave));
        assert!(!cache.is_available(
            "com.brave.browser",
            &release("1.21.0", "https://dl.example/1.21.0/brave.apk")
        ));
    }

    #[test]
    fn sidecar_keeps_every_release_field() {
        let (dir, cache) = cache();
        std::fs::write(cache.artifact_path("com.brave.browser"), b"apk")
            .expect("archive should be written");
        cache
            .mark_complete("com.brave.browser", &detailed_release())
            .expect("sidecar should be written");

        let reopened = LocalArtifactCache::new(dir.path().to_path_buf());

        assert_eq!(
            reopened.staged_release("com.brave.browser"),
            Some(detailed_release())
        );
        assert!(reopened.is_available("com.brave.browser", &detailed_release()));
    }

    #[test]
    fn sidecar_without_archive_is_ignored() {
        let (_dir, cache) = cache();
        let brave = release("1.20.103", "https://dl.example/brave.apk");
        cache
            .mark_complete("com.brave.browser", &brave)
            .expect("sidecar should be written");

        assert_eq!(cache.staged_release("com.brave.browser"), None);
    }

    #[test]
    fn delete_complete_keeps_partial_downloads() {
        let (_dir, cache) = cache();
        let artifact = cache.artifact_path("pkg");
        std::fs::write(&artifact, b"apk").expect("archive should be written");
        std::fs::write(artifact.with_extension("apk.part"), b"ap")
            .expect("partial should be written");
        cache
            .mark_complete("pkg", &release("1", "https://dl.example"))
            .expect("sidecar should be written");

        cache.delete_complete("pkg");

        assert!(!artifact.exists());
        assert!(artifact.with_extension("apk.part").exists());
        assert_eq!(cache.staged_release("pkg"), None);
    }

    #[test]
    fn delete_only_touches_one_package() {
        let (_dir, cache) = cache();
        for name in ["a.apk", "a.apk.part", "a.apk.part.url", "a.apk.json", "ab.apk", "b.apk"] {
            std::fs::write(cache.dir().join(name), b"x").expect("file should be written");
        }

        assert_eq!(cache.delete("a"), 4);
        assert!(cache.dir().join("ab.apk").exists());
        assert_eq!(cache.clean_all(), 2);
        assert_eq!(cache.clean_all(), 0);
    }

    #[test]
    fn missing_directory_cleans_nothing() {
        let cache = LocalArtifactCache::new(PathBuf::from("/nonexistent/apkup/downloads"));
        assert_eq!(cache.clean_all(), 0);
    }
}
