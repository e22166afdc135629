use std::sync::Arc;

use apkup_backend::{NetworkProbe, ReleaseInfo};
use log::{info, warn};

use crate::artifact_cache::LocalArtifactCache;
use crate::catalog::PackageDescriptor;
use crate::download::Downloader;
use crate::signature::SignatureValidator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchOutcome {
    SkippedMeteredNetwork,
    AlreadyCached,
    Downloaded,
    /// The download was signed by someone else and has been deleted.
    Rejected { fingerprint: String },
    Failed(String),
}

/// Downloads available updates ahead of an installation request.
pub struct Prefetcher {
    network: Arc<dyn NetworkProbe>,
    downloader: Downloader,
    artifacts: LocalArtifactCache,
    validator: Arc<SignatureValidator>,
}

impl Prefetcher {
    #[must_use]
    pub fn new(
        network: Arc<dyn NetworkProbe>,
        downloader: Downloader,
        artifacts: LocalArtifactCache,
        validator: Arc<SignatureValidator>,
    ) -> Self {
        Self {
            network,
            downloader,
            artifacts,
            validator,
        }
    }

    pub async fn prefetch(
        &self,
        descriptor: &PackageDescriptor,
        release: &ReleaseInfo,
    ) -> PrefetchOutcome {
        let package_id = descriptor.package_id;
        if self.network.is_metered() {
            info!("Not prefetching {package_id} on a metered network");
            return PrefetchOutcome::SkippedMeteredNetwork;
        }
        if self.artifacts.is_available(package_id, release) {
            return PrefetchOutcome::AlreadyCached;
        }

        self.artifacts.delete_complete(package_id);
        let path = self.artifacts.artifact_path(package_id);
        let outcome = self
            .downloader
            .start(package_id, &release.download_url, &path)
            .wait()
            .await;
        self.downloader.release(package_id);
        if !outcome.success {
            return PrefetchOutcome::Failed(outcome.error_message.unwrap_or_default());
        }

        match self.validator.check_archive_file(&path, descriptor).await {
            Ok(result) if result.is_valid => {
                if let Err(error) = self.artifacts.mark_complete(package_id, release) {
                    warn!("Failed to record prefetched {package_id}: {error}");
                    self.artifacts.delete(package_id);
                    return PrefetchOutcome::Failed(error.to_string());
                }
                info!("Prefetched {package_id} {}", release.version);
                PrefetchOutcome::Downloaded
            }
            Ok(result) => {
                self.artifacts.delete(package_id);
                PrefetchOutcome::Rejected {
                    fingerprint: result.hex_string,
                }
            }
            Err(error) => {
                self.artifacts.delete(package_id);
                PrefetchOutcome::Failed(error.to_string())
            }
        }
    }
}
