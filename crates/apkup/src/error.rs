use apkup_backend::PlatformError;
use apkup_core::{InstallFailure, UpdateCheckError};
use apkup_platform::AppPathsError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Unknown package '{name}', run `apkup list` to see the supported ones")]
    UnknownPackage { name: String },

    #[error(transparent)]
    Paths(#[from] AppPathsError),

    #[error("Device unavailable: {0}")]
    Device(#[from] PlatformError),

    #[error("Failed to set up HTTP client: {message}")]
    HttpClient { message: String },

    #[error("{package} is not supported on this device: {reason}")]
    Incompatible {
        package: &'static str,
        reason: String,
    },

    #[error("{package} update check failed: {source}")]
    CheckFailed {
        package: &'static str,
        source: UpdateCheckError,
    },

    #[error("{package} installation failed: {failure}")]
    InstallFailed {
        package: &'static str,
        failure: InstallFailure,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("{kind}: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl AppError {
    pub fn unknown_package(name: impl Into<String>) -> Self {
        Self::UnknownPackage { name: name.into() }
    }

    pub fn incompatible(package: &'static str, reason: impl Into<String>) -> Self {
        Self::Incompatible {
            package,
            reason: reason.into(),
        }
    }

    pub fn check_failed(package: &'static str, source: UpdateCheckError) -> Self {
        Self::CheckFailed { package, source }
    }

    pub fn install_failed(package: &'static str, failure: InstallFailure) -> Self {
        Self::InstallFailed { package, failure }
    }

    pub fn cancelled(operation: &'static str) -> Self {
        Self::Cancelled { operation }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        Self::HttpClient {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use apkup_backend::ResolveError;

    use super::*;

    #[test]
    fn unknown_package_points_at_list_command() {
        let error = AppError::unknown_package("chrome");

        assert_eq!(
            error,
            AppError::UnknownPackage {
                name: "chrome".to_string()
            }
        );
        assert_eq!(
            error.to_string(),
            "Unknown package 'chrome', run `apkup list` to see the supported ones"
        );
    }

    #[test]
    fn constructors_keep_package_context() {
        let incompatible = AppError::incompatible("brave", "requires Android SDK 24, device has 21");
        let cancelled = AppError::cancelled("Installation");

        assert_eq!(
            incompatible.to_string(),
            "brave is not supported on this device: requires Android SDK 24, device has 21"
        );
        assert_eq!(cancelled.to_string(), "Installation cancelled");
    }

    #[test]
    fn check_failure_includes_resolver_message() {
        let error = AppError::check_failed(
            "bromite",
            UpdateCheckError::Resolve(ResolveError::unavailable(
                "https://api.github.com/repos/bromite/bromite/releases/latest",
                "HTTP 502 Bad Gateway",
            )),
        );

        assert!(error.to_string().starts_with("bromite update check failed: "));
        assert!(error.to_string().contains("HTTP 502 Bad Gateway"));
    }

    #[test]
    fn install_failure_wraps_state_machine_error() {
        let error = AppError::install_failed(
            "firefox",
            InstallFailure::DownloadFailed {
                message: "connection reset".to_string(),
            },
        );

        assert_eq!(
            error.to_string(),
            "firefox installation failed: Download failed: connection reset"
        );
    }

    #[test]
    fn io_errors_keep_kind_and_message() {
        let error = AppError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));

        assert!(matches!(
            error,
            AppError::Io {
                kind: std::io::ErrorKind::PermissionDenied,
                ..
            }
        ));
        assert_eq!(error.to_string(), "permission denied: denied");
    }
}
