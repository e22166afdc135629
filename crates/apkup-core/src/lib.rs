//! Release discovery and installation workflow for apkup.
//!
//! This crate holds everything that is independent of the command line and
//! of the concrete device backend:
//! - The package catalog and the upstream release sources it points at.
//! - Resolution and update-check caching.
//! - Resumable artifact downloads and the local artifact cache.
//! - Signing certificate validation.
//! - The per-package installation state machine.

pub mod abi;
pub mod artifact_cache;
pub mod catalog;
pub mod download;
pub mod fetch;
pub mod install;
pub mod persist;
pub mod prefetch;
pub mod resolution_cache;
pub mod resolver;
pub mod signature;
mod source;
pub mod update_check;
pub mod update_store;
pub mod version;

#[cfg(test)]
mod test_support;

pub use abi::ArchitectureSelector;
pub use artifact_cache::LocalArtifactCache;
pub use catalog::{CATALOG, PackageDescriptor, PostInstallHook, SourceSpec};
pub use download::{DownloadHandle, DownloadOutcome, DownloadStatus, Downloader};
pub use fetch::{HttpApiConsumer, build_http_client};
pub use install::{
    InstallController, InstallEnvironment, InstallFailure, InstallSnapshot, InstallState,
    PauseReason, RetainedSession,
};
pub use prefetch::{PrefetchOutcome, Prefetcher};
pub use resolution_cache::ResolutionCache;
pub use resolver::PackageResolver;
pub use signature::{SignatureValidator, certificate_fingerprint};
pub use update_check::{UpdateCheckError, UpdateChecker, display_version};
pub use update_store::UpdateCheckStore;
pub use version::is_update_available;
