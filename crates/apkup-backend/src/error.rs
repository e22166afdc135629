use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Upstream unavailable ({url}): {details}")]
    UpstreamUnavailable { url: String, details: String },

    #[error("Upstream rate limited ({url}){}", reset_suffix(.reset_at.as_ref()))]
    UpstreamRateLimited {
        url: String,
        reset_at: Option<DateTime<Utc>>,
    },

    #[error("Invalid response from {url}: {details}")]
    InvalidResponse { url: String, details: String },

    #[error("No matching release for {package}: {reason}")]
    NoMatchingRelease { package: String, reason: String },
}

fn reset_suffix(reset_at: Option<&DateTime<Utc>>) -> String {
    reset_at.map_or_else(String::new, |at| format!(", retry after {}", at.to_rfc3339()))
}

impl ResolveError {
    pub fn unavailable(url: impl Into<String>, details: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            url: url.into(),
            details: details.into(),
        }
    }

    pub fn unavailable_from<E>(url: impl Into<String>, error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::unavailable(url, error.to_string())
    }

    pub fn invalid_response(url: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            details: details.into(),
        }
    }

    pub fn no_matching_release(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoMatchingRelease {
            package: package.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Transport failure: {details}")]
    TransportFailure { details: String },

    #[error("HTTP code: {status}")]
    HttpStatus { status: u16 },

    #[error("Refusing to download over an insecure connection: {url}")]
    InsecureUrlRejected { url: String },

    #[error("IO error ({kind}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("Download was cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn transport<E>(error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::TransportFailure {
            details: error.to_string(),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Required tool not found: {tool}")]
    ToolNotFound { tool: &'static str },

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unexpected output from `{command}`: {details}")]
    UnexpectedOutput { command: String, details: String },

    #[error("IO error ({kind}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Cannot read signing certificate of {path}: {details}")]
    ArchiveUnreadable { path: String, details: String },

    #[error("Package {package} is not installed")]
    PackageNotInstalled { package: String },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Diagnostic reported by the platform installer, kept verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct InstallerRejected {
    pub message: String,
}

impl InstallerRejected {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DownloadError, PlatformError, ResolveError};

    #[test]
    fn io_error_conversion_maps_to_io_variant() {
        let mapped = DownloadError::from(std::io::Error::other("disk full"));
        assert!(
            matches!(mapped, DownloadError::Io { kind, ref message } if kind == std::io::ErrorKind::Other && message.contains("disk full"))
        );

        let mapped = PlatformError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(
            mapped,
            PlatformError::Io {
                kind: std::io::ErrorKind::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn http_status_display_matches_download_diagnostic() {
        assert_eq!(
            DownloadError::HttpStatus { status: 404 }.to_string(),
            "HTTP code: 404"
        );
    }

    #[test]
    fn rate_limit_display_mentions_reset_time_when_known() {
        let unknown = ResolveError::UpstreamRateLimited {
            url: "https://api.github.com".to_string(),
            reset_at: None,
        };
        assert_eq!(
            unknown.to_string(),
            "Upstream rate limited (https://api.github.com)"
        );

        let known = ResolveError::UpstreamRateLimited {
            url: "https://api.github.com".to_string(),
            reset_at: chrono::DateTime::from_timestamp(1_612_956_645, 0),
        };
        assert!(known.to_string().contains("retry after 2021-02-10T11:30:45"));
    }

    #[test]
    fn constructor_helpers_fill_expected_variant() {
        assert!(matches!(
            ResolveError::unavailable_from("https://x", "connection reset"),
            ResolveError::UpstreamUnavailable { ref details, .. } if details == "connection reset"
        ));
        assert!(matches!(
            ResolveError::no_matching_release("com.brave.browser", "no asset"),
            ResolveError::NoMatchingRelease { ref package, .. } if package == "com.brave.browser"
        ));
    }
}
