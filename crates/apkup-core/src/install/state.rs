use apkup_backend::{PlatformError, ResolveError, SignatureError};
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// The artifact is verified and waits for the caller to ask for
    /// installation.
    AwaitingInstallRequest,
    /// The platform installer is working on the artifact.
    AwaitingInstaller,
}

/// Node of the installation workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Start,
    InstalledSignatureChecked,
    StorageMounted,
    PreconditionsChecked,
    StartDownload,
    DownloadRunning,
    DownloadFinished,
    UseCachedArtifact,
    ArtifactVerified,
    Paused(PauseReason),
    InstallRequested,
    InstallerSucceeded,
    InstallerFailed(String),
    InstalledFingerprintVerified,
    Success,
    Error(InstallFailure),
}

impl InstallState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error(_))
    }

    /// Whether the workflow stopped and waits for input from outside.
    #[must_use]
    pub fn is_at_rest(&self) -> bool {
        self.is_terminal() || matches!(self, Self::Paused(_))
    }
}

/// Why an installation ended in the error state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallFailure {
    #[error("The installed package is signed with an unknown certificate ({fingerprint})")]
    UnknownSignatureOfInstalledPackage { fingerprint: String },

    #[error("The download directory is not accessible")]
    ExternalStorageNotAccessible,

    #[error(
        "Not enough free space: {} MiB required, {} MiB available",
        .required / MIB,
        .available / MIB
    )]
    NotEnoughStorage { required: u64, available: u64 },

    #[error("Failed to find the latest release: {0}")]
    ResolutionFailed(ResolveError),

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("The downloaded file has an unexpected signature {actual} (expected {expected})")]
    InvalidDownloadFingerprint { actual: String, expected: String },

    #[error("Installation failed: {message}")]
    InstallationFailed { message: String },

    #[error("The installed package has an unexpected signature {actual} (expected {expected})")]
    InvalidInstalledFingerprint { actual: String, expected: String },

    #[error("Signature check failed: {0}")]
    SignatureCheckFailed(SignatureError),

    #[error(transparent)]
    Platform(PlatformError),
}

impl InstallFailure {
    /// Vendor specific workaround for known installer diagnostics.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        let Self::InstallationFailed { message } = self else {
            return None;
        };
        (message.contains("INSTALL_FAILED_INTERNAL_ERROR") && message.contains("Permission Denied"))
            .then_some(
                "MIUI devices reject installs from unknown sources unless \"MIUI optimization\" \
                 is disabled in the developer options.",
            )
    }

    /// Every failure leaves the staged artifact for the caller to clean up.
    #[must_use]
    pub fn offers_cleanup(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denial_gets_a_vendor_hint() {
        let miui = InstallFailure::InstallationFailed {
            message: "Failure [INSTALL_FAILED_INTERNAL_ERROR: Permission Denied]".to_string(),
        };
        assert!(miui.hint().is_some_and(|hint| hint.contains("MIUI")));

        let other = InstallFailure::InstallationFailed {
            message: "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]".to_string(),
        };
        assert_eq!(other.hint(), None);
        assert_eq!(InstallFailure::ExternalStorageNotAccessible.hint(), None);
        assert!(other.offers_cleanup());
    }

    #[test]
    fn storage_failure_reports_sizes_in_mib() {
        let failure = InstallFailure::NotEnoughStorage {
            required: 500 * MIB,
            available: 120 * MIB + 42,
        };
        assert_eq!(
            failure.to_string(),
            "Not enough free space: 500 MiB required, 120 MiB available"
        );
    }

    #[test]
    fn rest_states_are_paused_or_terminal() {
        assert!(InstallState::Paused(PauseReason::AwaitingInstaller).is_at_rest());
        assert!(InstallState::Success.is_terminal());
        assert!(!InstallState::DownloadRunning.is_at_rest());
    }
}
