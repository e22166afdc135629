//! Host-side collaborators: application paths, the adb-backed device,
//! local staging storage, and APK signing certificate extraction.

pub mod apk;
mod adb;
mod paths;
mod probes;

pub use adb::AdbDevice;
pub use apk::{CertificateError, read_signing_certificate};
pub use paths::{AppPaths, AppPathsError, BaseDir};
pub use probes::{ConfiguredNetwork, LocalStorage};
