use std::sync::Arc;

use apkup_backend::{
    PackageRegistry, PlatformError, ReleaseInfo, ReleaseResolver, ResolveError, UpdateCheckResult,
};
use chrono::Utc;
use log::{debug, info};
use thiserror::Error;

use crate::resolution_cache::ResolutionCache;
use crate::update_store::UpdateCheckStore;
use crate::version::is_update_available;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheckError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Human readable version, with the publication day when known.
#[must_use]
pub fn display_version(release: &ReleaseInfo) -> String {
    match release.published_at {
        Some(published_at) => format!("{} ({})", release.version, published_at.format("%Y-%m-%d")),
        None => release.version.clone(),
    }
}

/// Whether `release` should be offered over what is installed.
///
/// Besides a differing version name, a release that reuses the installed
/// version name counts as new when it was published after the release
/// remembered at install time.
#[must_use]
pub fn update_decision(
    installed_version: Option<&str>,
    release: &ReleaseInfo,
    remembered: Option<&ReleaseInfo>,
) -> bool {
    if is_update_available(installed_version, &release.version) {
        return true;
    }
    let Some(remembered) = remembered.filter(|remembered| remembered.version == release.version)
    else {
        return false;
    };
    match (release.published_at, remembered.published_at) {
        (Some(available), Some(installed)) => available > installed,
        _ => false,
    }
}

/// Answers "is there something newer for this package?".
pub struct UpdateChecker {
    cache: Arc<ResolutionCache>,
    store: Arc<UpdateCheckStore>,
    registry: Arc<dyn PackageRegistry>,
}

impl UpdateChecker {
    #[must_use]
    pub fn new(
        cache: Arc<ResolutionCache>,
        store: Arc<UpdateCheckStore>,
        registry: Arc<dyn PackageRegistry>,
    ) -> Self {
        Self {
            cache,
            store,
            registry,
        }
    }

    /// Check one package. With `use_cache` a recent persisted answer or a
    /// fresh in-memory resolution is reused; without it upstream is asked
    /// again and both caches are refreshed.
    ///
    /// # Errors
    /// Returns an error when the release cannot be resolved or the installed
    /// version cannot be queried.
    pub async fn check(
        &self,
        resolver: &dyn ReleaseResolver,
        use_cache: bool,
    ) -> Result<UpdateCheckResult, UpdateCheckError> {
        let package_id = resolver.package_id();
        let now = Utc::now();

        if use_cache && let Some(stored) = self.store.get_fresh(package_id, now) {
            debug!("Using stored update check for {package_id}");
            return Ok(stored);
        }

        let release = if use_cache {
            self.cache.get_or_resolve(resolver).await?
        } else {
            self.cache.resolve_fresh(resolver).await?
        };
        let installed = self.registry.installed_version(package_id).await?;
        let remembered = self.store.installed_release(package_id);

        let result = UpdateCheckResult {
            is_update_available: update_decision(
                installed.as_deref(),
                &release,
                remembered.as_ref(),
            ),
            display_version: display_version(&release),
            release,
        };
        info!(
            "{package_id}: installed {}, available {}, update: {}",
            installed.as_deref().unwrap_or("none"),
            result.display_version,
            result.is_update_available
        );

        self.store.put(package_id, result.clone(), now);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::test_support::{FakeRegistry, StaticResolver, release};

    fn published(version: &str, day: u32) -> ReleaseInfo {
        ReleaseInfo {
            published_at: Utc.with_ymd_and_hms(2021, 7, day, 12, 0, 0).single(),
            ..release(version, "https://ci.example/target.apk")
        }
    }

    fn checker(
        dir: &tempfile::TempDir,
        registry: Arc<FakeRegistry>,
    ) -> (UpdateChecker, Arc<UpdateCheckStore>) {
        let store = Arc::new(UpdateCheckStore::open(
            &dir.path().join("update_checks.json"),
            Duration::from_secs(600),
        ));
        let checker = UpdateChecker::new(
            Arc::new(ResolutionCache::default()),
            Arc::clone(&store),
            registry,
        );
        (checker, store)
    }

    #[test]
    fn display_version_appends_publication_day() {
        assert_eq!(display_version(&published("90.1.2", 19)), "90.1.2 (2021-07-19)");
        assert_eq!(
            display_version(&release("4.3", "https://dl.example")),
            "4.3"
        );
    }

    #[test]
    fn rebuilt_release_with_same_version_is_an_update() {
        let remembered = published("90.1.2", 19);

        assert!(update_decision(
            Some("90.1.2"),
            &published("90.1.2", 21),
            Some(&remembered)
        ));
        assert!(!update_decision(
            Some("90.1.2"),
            &published("90.1.2", 19),
            Some(&remembered)
        ));
        assert!(!update_decision(Some("90.1.2"), &published("90.1.2", 21), None));
        assert!(update_decision(None, &published("90.1.2", 21), None));
    }

    #[tokio::test]
    async fn check_compares_against_the_installed_version() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let registry = Arc::new(FakeRegistry::new());
        registry.install("com.brave.browser", "1.18.12", b"cert");
        let (checker, _) = checker(&dir, registry);
        let resolver = StaticResolver::new(
            "com.brave.browser",
            Ok(release("1.20.103", "https://dl.example/brave.apk")),
        );

        let result = checker
            .check(&resolver, true)
            .await
            .expect("check should succeed");

        assert!(result.is_update_available);
        assert_eq!(result.display_version, "1.20.103");
    }

    #[tokio::test]
    async fn cached_checks_skip_upstream_until_bypassed() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let registry = Arc::new(FakeRegistry::new());
        registry.install("com.brave.browser", "1.20.103", b"cert");
        let (checker, store) = checker(&dir, registry);
        let resolver = StaticResolver::new(
            "com.brave.browser",
            Ok(release("1.20.103", "https://dl.example/brave.apk")),
        );

        let first = checker
            .check(&resolver, true)
            .await
            .expect("first check should succeed");
        let second = checker
            .check(&resolver, true)
            .await
            .expect("second check should succeed");
        assert!(!first.is_update_available);
        assert_eq!(first, second);
        assert_eq!(resolver.calls(), 1);
        assert!(store.get_fresh("com.brave.browser", Utc::now()).is_some());

        checker
            .check(&resolver, false)
            .await
            .expect("forced check should succeed");
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn resolution_failures_are_reported_and_not_stored() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let (checker, store) = checker(&dir, Arc::new(FakeRegistry::new()));
        let resolver = StaticResolver::new(
            "pkg",
            Err(ResolveError::no_matching_release("pkg", "no asset")),
        );

        let result = checker.check(&resolver, true).await;

        assert!(matches!(result, Err(UpdateCheckError::Resolve(_))));
        assert!(store.get_fresh("pkg", Utc::now()).is_none());
    }
}
