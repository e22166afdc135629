//! Upstream release metadata sources.
//!
//! Each source turns one kind of upstream listing into an
//! [`UpstreamRelease`]; package specific version extraction happens in the
//! resolver.

pub(crate) mod github;
pub(crate) mod html;
pub(crate) mod mozilla_ci;

use apkup_backend::ResolveError;
use chrono::{DateTime, Utc};

use crate::abi::ArchitectureSelector;

/// Release metadata as published upstream, before version extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRelease {
    pub raw_version: String,
    pub download_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
}

fn unsupported_device(package_id: &str, selector: &ArchitectureSelector) -> ResolveError {
    let abis: Vec<&str> = selector
        .device_abis()
        .iter()
        .map(|abi| abi.android_name())
        .collect();
    ResolveError::no_matching_release(
        package_id,
        format!("no variant for device ABIs [{}]", abis.join(", ")),
    )
}
