use async_trait::async_trait;
use std::path::Path;

use crate::error::{PlatformError, ResolveError};
use crate::types::{MountState, PendingInstall, ReleaseInfo};

/// Fetches upstream metadata documents.
#[async_trait]
pub trait ApiConsumer: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, ResolveError>;
}

/// Resolves the newest release of one tracked package.
#[async_trait]
pub trait ReleaseResolver: Send + Sync {
    fn package_id(&self) -> &str;

    async fn resolve(&self) -> Result<ReleaseInfo, ResolveError>;
}

/// Read access to the packages installed on the target device.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Version name of the installed package, `None` when it is not installed.
    async fn installed_version(&self, package_id: &str) -> Result<Option<String>, PlatformError>;

    /// DER encoded signing certificate of the installed package.
    async fn installed_certificate(
        &self,
        package_id: &str,
    ) -> Result<Option<Vec<u8>>, PlatformError>;
}

/// Hands an artifact to the platform installer.
///
/// The returned handle completes once the platform reports success or failure.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(
        &self,
        artifact: &Path,
        package_id: &str,
    ) -> Result<PendingInstall, PlatformError>;
}

pub trait StorageProbe: Send + Sync {
    fn mount_state(&self) -> MountState;

    /// Bytes available to unprivileged writers on the staging volume.
    ///
    /// # Errors
    /// Returns an error when the volume cannot be queried.
    fn free_bytes(&self) -> Result<u64, PlatformError>;
}

pub trait NetworkProbe: Send + Sync {
    fn is_metered(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::types::pending_install;

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReleaseResolver for CountingResolver {
        fn package_id(&self) -> &str {
            "org.example.app"
        }

        async fn resolve(&self) -> Result<ReleaseInfo, ResolveError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(ReleaseInfo {
                    version: "1.0.0".to_string(),
                    download_url: "https://example.com/app.apk".to_string(),
                    published_at: None,
                    size_bytes: None,
                    sha256: None,
                })
            } else {
                Err(ResolveError::no_matching_release(self.package_id(), "gone"))
            }
        }
    }

    struct ImmediateInstaller;

    #[async_trait]
    impl Installer for ImmediateInstaller {
        async fn install(
            &self,
            _artifact: &Path,
            _package_id: &str,
        ) -> Result<PendingInstall, PlatformError> {
            let (completer, pending) = pending_install();
            completer.complete(Ok(()));
            Ok(pending)
        }
    }

    #[tokio::test]
    async fn resolver_trait_object_dispatches_to_implementation() {
        let resolver: Box<dyn ReleaseResolver> = Box::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });

        let first = resolver.resolve().await.expect("first resolve should succeed");
        assert_eq!(first.version, "1.0.0");
        assert!(resolver.resolve().await.is_err());
    }

    #[tokio::test]
    async fn installer_trait_object_returns_waitable_handle() {
        let installer: Box<dyn Installer> = Box::new(ImmediateInstaller);

        let mut pending = installer
            .install(Path::new("/tmp/app.apk"), "org.example.app")
            .await
            .expect("install should start");

        assert_eq!(pending.wait().await, Ok(()));
    }
}
