use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Relocates every apkup directory under a single root when set.
pub const HOME_ENV: &str = "APKUP_HOME";

const APP_DIR: &str = "apkup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDir {
    Config,
    Cache,
    Data,
}

impl fmt::Display for BaseDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "config",
            Self::Cache => "cache",
            Self::Data => "data",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Could not determine the {0} directory; set {env} to choose one", env = HOME_ENV)]
pub struct AppPathsError(pub BaseDir);

/// Where settings, cached update checks, staged downloads and logs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Paths from `APKUP_HOME`, or the platform's per-user directories.
    ///
    /// # Errors
    /// Returns an error when a platform base directory cannot be determined.
    pub fn new() -> Result<Self, AppPathsError> {
        Self::resolve(std::env::var_os(HOME_ENV), platform_dir)
    }

    /// Every directory as a child of `root`.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
            data_dir: root.join("data"),
        }
    }

    fn resolve(
        home: Option<OsString>,
        base: impl Fn(BaseDir) -> Option<PathBuf>,
    ) -> Result<Self, AppPathsError> {
        if let Some(root) = home.filter(|root| !root.is_empty()) {
            return Ok(Self::under(Path::new(&root)));
        }
        let dir = |kind| {
            base(kind)
                .map(|dir| dir.join(APP_DIR))
                .ok_or(AppPathsError(kind))
        };
        Ok(Self {
            config_dir: dir(BaseDir::Config)?,
            cache_dir: dir(BaseDir::Cache)?,
            data_dir: dir(BaseDir::Data)?,
        })
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    #[must_use]
    pub fn update_cache_file(&self) -> PathBuf {
        self.cache_dir.join("update_checks.json")
    }

    /// Staging directory for downloaded archives.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("debug.log")
    }

    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(self.download_dir())?;
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

// On macOS these are ~/Library/Application Support and ~/Library/Caches.
fn platform_dir(kind: BaseDir) -> Option<PathBuf> {
    match kind {
        BaseDir::Config => dirs::config_dir(),
        BaseDir::Cache => dirs::cache_dir(),
        BaseDir::Data => dirs::data_dir(),
    }
}
