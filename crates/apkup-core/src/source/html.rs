use apkup_backend::{ApiConsumer, ResolveError};
use regex::Regex;

use super::{UpstreamRelease, unsupported_device};
use crate::abi::ArchitectureSelector;
use crate::catalog::HtmlScrapeSpec;

/// Find the download link for the device's ABI on a vendor download page.
///
/// Download pages carry no publication date, so none is reported.
pub(crate) async fn find_release(
    consumer: &dyn ApiConsumer,
    spec: &HtmlScrapeSpec,
    selector: &ArchitectureSelector,
    package_id: &str,
) -> Result<UpstreamRelease, ResolveError> {
    let (_, abi_name) = selector
        .select(spec.abi_names)
        .ok_or_else(|| unsupported_device(package_id, selector))?;
    let pattern = spec.link_pattern.replace("{abi}", &regex::escape(abi_name));
    let regex = Regex::new(&pattern).map_err(|error| {
        ResolveError::no_matching_release(package_id, format!("bad link pattern: {error}"))
    })?;

    let page = consumer.fetch_text(spec.page_url).await?;
    let captures = regex.captures(&page).ok_or_else(|| {
        ResolveError::no_matching_release(
            package_id,
            format!("no {abi_name} download link on {}", spec.page_url),
        )
    })?;

    let download_url = captures
        .get(0)
        .map(|link| link.as_str().to_string())
        .unwrap_or_default();
    let raw_version = captures
        .get(1)
        .map(|version| version.as_str().to_string())
        .unwrap_or_default();

    Ok(UpstreamRelease {
        raw_version,
        download_url,
        published_at: None,
        size_bytes: None,
    })
}
