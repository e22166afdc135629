use std::sync::Arc;

use apkup_backend::{ApiConsumer, ReleaseInfo, ReleaseResolver, ResolveError};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};

use crate::abi::ArchitectureSelector;
use crate::catalog::{PackageDescriptor, SourceSpec};
use crate::source::{self, UpstreamRelease};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Resolves the newest release of one catalog package for one device.
pub struct PackageResolver {
    descriptor: &'static PackageDescriptor,
    consumer: Arc<dyn ApiConsumer>,
    selector: ArchitectureSelector,
    max_attempts: u32,
}

impl PackageResolver {
    #[must_use]
    pub fn new(
        descriptor: &'static PackageDescriptor,
        consumer: Arc<dyn ApiConsumer>,
        selector: ArchitectureSelector,
    ) -> Self {
        Self {
            descriptor,
            consumer,
            selector,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Upper bound on listing requests for paged sources.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn descriptor(&self) -> &'static PackageDescriptor {
        self.descriptor
    }

    async fn find_upstream(&self) -> Result<UpstreamRelease, ResolveError> {
        let consumer = self.consumer.as_ref();
        let package_id = self.descriptor.package_id;
        match &self.descriptor.source {
            SourceSpec::TaggedRelease(spec) => {
                source::github::find_release(
                    consumer,
                    spec,
                    &self.selector,
                    package_id,
                    self.max_attempts,
                )
                .await
            }
            SourceSpec::CiArtifactIndex(spec) => {
                source::mozilla_ci::find_release(
                    consumer,
                    spec,
                    &self.selector,
                    package_id,
                    Utc::now(),
                )
                .await
            }
            SourceSpec::HtmlScrape(spec) => {
                source::html::find_release(consumer, spec, &self.selector, package_id).await
            }
        }
    }
}

#[async_trait]
impl ReleaseResolver for PackageResolver {
    fn package_id(&self) -> &str {
        self.descriptor.package_id
    }

    async fn resolve(&self) -> Result<ReleaseInfo, ResolveError> {
        debug!("Resolving latest release of {}", self.descriptor.package_id);

        let upstream = self.find_upstream().await?;
        let version = self
            .descriptor
            .version_rule
            .extract(&upstream.raw_version)
            .ok_or_else(|| {
                ResolveError::no_matching_release(
                    self.descriptor.package_id,
                    format!("cannot extract a version from '{}'", upstream.raw_version),
                )
            })?;

        info!(
            "Latest {} release is {version} ({})",
            self.descriptor.package_id, upstream.download_url
        );

        Ok(ReleaseInfo {
            version,
            download_url: upstream.download_url,
            published_at: upstream.published_at,
            size_bytes: upstream.size_bytes,
            sha256: None,
        })
    }
}
