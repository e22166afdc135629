mod error;
mod traits;
mod types;

pub use error::{DownloadError, InstallerRejected, PlatformError, ResolveError, SignatureError};
pub use traits::{
    ApiConsumer, Installer, NetworkProbe, PackageRegistry, ReleaseResolver, StorageProbe,
};
pub use types::{
    Abi, AbiParseError, DeviceProfile, DownloadProgress, FingerprintResult, InstallCompleter,
    InstallOutcome, MountState, PendingInstall, ReleaseInfo, UpdateCheckResult, pending_install,
};
