use std::path::Path;
use std::sync::Arc;

use apkup_backend::{FingerprintResult, PackageRegistry, SignatureError};
use apkup_platform::read_signing_certificate;
use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::catalog::PackageDescriptor;

/// Lowercase hex SHA-256 of a DER encoded certificate.
#[must_use]
pub fn certificate_fingerprint(certificate: &[u8]) -> String {
    format!("{:x}", Sha256::digest(certificate))
}

fn compare(descriptor: &PackageDescriptor, certificate: &[u8]) -> FingerprintResult {
    let hex_string = certificate_fingerprint(certificate);
    let is_valid = hex_string.eq_ignore_ascii_case(descriptor.signature_sha256);
    if !is_valid {
        warn!(
            "Signature of {} is {hex_string}, expected {}",
            descriptor.package_id, descriptor.signature_sha256
        );
    }
    FingerprintResult {
        is_valid,
        hex_string,
    }
}

/// Compares signing certificates against the fingerprint pinned in the
/// catalog.
pub struct SignatureValidator {
    registry: Arc<dyn PackageRegistry>,
}

impl SignatureValidator {
    #[must_use]
    pub fn new(registry: Arc<dyn PackageRegistry>) -> Self {
        Self { registry }
    }

    /// Check the certificate an archive on disk is signed with.
    ///
    /// # Errors
    /// Returns [`SignatureError::ArchiveUnreadable`] when no certificate can
    /// be extracted.
    pub async fn check_archive_file(
        &self,
        path: &Path,
        descriptor: &PackageDescriptor,
    ) -> Result<FingerprintResult, SignatureError> {
        let owned_path = path.to_path_buf();
        let certificate = tokio::task::spawn_blocking(move || read_signing_certificate(&owned_path))
            .await
            .map_err(|error| SignatureError::ArchiveUnreadable {
                path: path.display().to_string(),
                details: error.to_string(),
            })?
            .map_err(|error| SignatureError::ArchiveUnreadable {
                path: path.display().to_string(),
                details: error.to_string(),
            })?;

        debug!("Checking signature of {}", path.display());
        Ok(compare(descriptor, &certificate))
    }

    /// Check the certificate of the package currently installed on the
    /// device.
    ///
    /// # Errors
    /// Returns [`SignatureError::PackageNotInstalled`] when the package is
    /// absent, or a platform error when the device cannot be queried.
    pub async fn check_installed_package(
        &self,
        descriptor: &PackageDescriptor,
    ) -> Result<FingerprintResult, SignatureError> {
        let certificate = self
            .registry
            .installed_certificate(descriptor.package_id)
            .await?
            .ok_or_else(|| SignatureError::PackageNotInstalled {
                package: descriptor.package_id.to_string(),
            })?;

        Ok(compare(descriptor, &certificate))
    }
}
