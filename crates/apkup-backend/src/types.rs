use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::watch;

use crate::error::InstallerRejected;

/// Native instruction set a device can execute, in Android naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Abi {
    Arm64V8a,
    ArmeabiV7a,
    Armeabi,
    X86,
    X86_64,
    Mips,
    Mips64,
}

impl Abi {
    pub const ALL: [Abi; 7] = [
        Abi::Arm64V8a,
        Abi::ArmeabiV7a,
        Abi::Armeabi,
        Abi::X86,
        Abi::X86_64,
        Abi::Mips,
        Abi::Mips64,
    ];

    #[must_use]
    pub fn android_name(self) -> &'static str {
        match self {
            Self::Arm64V8a => "arm64-v8a",
            Self::ArmeabiV7a => "armeabi-v7a",
            Self::Armeabi => "armeabi",
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
            Self::Mips => "mips",
            Self::Mips64 => "mips64",
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.android_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown ABI: {input}")]
pub struct AbiParseError {
    pub input: String,
}

impl FromStr for Abi {
    type Err = AbiParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|abi| abi.android_name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| AbiParseError {
                input: trimmed.to_string(),
            })
    }
}

/// What the target device reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Supported ABIs, most preferred first.
    pub abis: Vec<Abi>,
    pub sdk_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub download_url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheckResult {
    pub release: ReleaseInfo,
    pub is_update_available: bool,
    pub display_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintResult {
    pub is_valid: bool,
    pub hex_string: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    #[must_use]
    pub fn percentage(&self) -> Option<u8> {
        let total = self.total.filter(|total| *total > 0)?;
        let percent = self.downloaded.min(total).saturating_mul(100) / total;
        u8::try_from(percent).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Mounted,
    ReadOnly,
    Missing,
}

pub type InstallOutcome = Result<(), InstallerRejected>;

/// Create a linked completer/handle pair for an asynchronous installation.
#[must_use]
pub fn pending_install() -> (InstallCompleter, PendingInstall) {
    let (tx, rx) = watch::channel(None);
    (InstallCompleter { tx }, PendingInstall { rx })
}

/// Receiving side of an installation handed to the platform installer.
///
/// Cloning yields another handle observing the same installation.
#[derive(Debug, Clone)]
pub struct PendingInstall {
    rx: watch::Receiver<Option<InstallOutcome>>,
}

impl PendingInstall {
    /// Wait until the installer reports back.
    ///
    /// A completer dropped without reporting counts as a rejection.
    pub async fn wait(&mut self) -> InstallOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(abandoned())),
            Err(_) => Err(abandoned()),
        }
    }
}

fn abandoned() -> InstallerRejected {
    InstallerRejected::new("installer stopped without reporting a result")
}

#[derive(Debug)]
pub struct InstallCompleter {
    tx: watch::Sender<Option<InstallOutcome>>,
}

impl InstallCompleter {
    pub fn complete(self, outcome: InstallOutcome) {
        self.tx.send_replace(Some(outcome));
    }
}
