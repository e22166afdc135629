use std::sync::Arc;
use std::time::Duration;

use apkup_backend::{ReleaseInfo, ReleaseResolver, ResolveError};
use log::debug;
use moka::future::Cache;

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Upper bound on tracked packages; the catalog is far smaller.
const MAX_ENTRIES: u64 = 256;

/// In-memory cache of resolved releases, keyed by package identifier.
///
/// Concurrent lookups of the same package share a single upstream
/// resolution while other packages resolve independently. Failures are
/// never cached.
#[derive(Debug)]
pub struct ResolutionCache {
    entries: Cache<String, ReleaseInfo>,
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResolutionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Return the cached release while it is fresh, resolving otherwise.
    ///
    /// # Errors
    /// Propagates the resolver's error; nothing is stored in that case.
    pub async fn get_or_resolve(
        &self,
        resolver: &dyn ReleaseResolver,
    ) -> Result<ReleaseInfo, ResolveError> {
        let package_id = resolver.package_id();
        if let Some(release) = self.entries.get(package_id).await {
            debug!("Using cached release of {package_id}");
            return Ok(release);
        }

        self.entries
            .try_get_with(package_id.to_string(), resolver.resolve())
            .await
            .map_err(Arc::unwrap_or_clone)
    }

    /// Drop the cached release and resolve again.
    ///
    /// A lookup already running for the package is joined rather than
    /// duplicated.
    ///
    /// # Errors
    /// Propagates the resolver's error.
    pub async fn resolve_fresh(
        &self,
        resolver: &dyn ReleaseResolver,
    ) -> Result<ReleaseInfo, ResolveError> {
        self.invalidate(resolver.package_id()).await;
        self.get_or_resolve(resolver).await
    }

    pub async fn invalidate(&self, package_id: &str) {
        self.entries.invalidate(package_id).await;
    }

    #[cfg(test)]
    pub(crate) async fn cached(&self, package_id: &str) -> Option<ReleaseInfo> {
        self.entries.get(package_id).await
    }
}
