use apkup_backend::{ApiConsumer, ResolveError};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::Deserialize;

use super::{UpstreamRelease, unsupported_device};
use crate::abi::ArchitectureSelector;
use crate::catalog::{AssetPattern, TaggedReleaseSpec};
use crate::fetch::fetch_json;

const API_BASE: &str = "https://api.github.com/repos";

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
enum AssetMatcher {
    Exact(&'static str),
    EndsWith(&'static str),
}

impl AssetMatcher {
    fn for_device(
        pattern: AssetPattern,
        selector: &ArchitectureSelector,
        package_id: &str,
    ) -> Result<Self, ResolveError> {
        match pattern {
            AssetPattern::Exact(table) => selector
                .select(table)
                .map(|(_, name)| Self::Exact(name))
                .ok_or_else(|| unsupported_device(package_id, selector)),
            AssetPattern::EndsWith(table) => selector
                .select(table)
                .map(|(_, suffix)| Self::EndsWith(suffix))
                .ok_or_else(|| unsupported_device(package_id, selector)),
            AssetPattern::AnySuffix(suffix) => Ok(Self::EndsWith(suffix)),
        }
    }

    fn matches(self, asset_name: &str) -> bool {
        match self {
            Self::Exact(name) => asset_name == name,
            Self::EndsWith(suffix) => asset_name.ends_with(suffix),
        }
    }
}

fn is_valid_release(spec: &TaggedReleaseSpec, release: &GitHubRelease) -> bool {
    if release.prerelease && !spec.allow_prerelease {
        return false;
    }
    spec.name_prefix.is_none_or(|prefix| {
        release
            .name
            .as_deref()
            .is_some_and(|name| name.starts_with(prefix))
    })
}

/// Walk the release listing of a repository until a valid release with a
/// matching asset turns up.
///
/// The first attempt asks for `releases/latest`; each further attempt
/// fetches the next page of the full listing. Repositories configured as
/// `bulk_only` start paging immediately.
pub(crate) async fn find_release(
    consumer: &dyn ApiConsumer,
    spec: &TaggedReleaseSpec,
    selector: &ArchitectureSelector,
    package_id: &str,
    max_attempts: u32,
) -> Result<UpstreamRelease, ResolveError> {
    let matcher = AssetMatcher::for_device(spec.asset, selector, package_id)?;
    let base_url = format!("{API_BASE}/{}/{}/releases", spec.owner, spec.repo);
    let first_attempt = if spec.bulk_only { 2 } else { 1 };

    for attempt in first_attempt..=max_attempts {
        let releases = if attempt == 1 {
            vec![fetch_json::<GitHubRelease>(consumer, &format!("{base_url}/latest")).await?]
        } else {
            let page = attempt - 1;
            let url = format!("{base_url}?per_page={}&page={page}", spec.per_page);
            let releases: Vec<GitHubRelease> = fetch_json(consumer, &url).await?;
            if releases.is_empty() {
                debug!("{package_id}: release listing ended at page {page}");
                break;
            }
            releases
        };

        for release in releases
            .iter()
            .filter(|release| is_valid_release(spec, release))
        {
            if let Some(asset) = release
                .assets
                .iter()
                .find(|asset| matcher.matches(&asset.name))
            {
                return Ok(UpstreamRelease {
                    raw_version: release.tag_name.clone(),
                    download_url: asset.browser_download_url.clone(),
                    published_at: Some(release.published_at),
                    size_bytes: asset.size,
                });
            }

            if spec.fail_if_valid_release_has_no_asset {
                return Err(ResolveError::no_matching_release(
                    package_id,
                    format!("release {} has no matching asset", release.tag_name),
                ));
            }
            trace!(
                "{package_id}: release {} has no matching asset",
                release.tag_name
            );
        }
    }

    Err(ResolveError::no_matching_release(
        package_id,
        format!("no valid release with a matching asset after {max_attempts} attempts"),
    ))
}
