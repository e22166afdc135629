use std::path::{Path, PathBuf};
use std::time::Duration;

use apkup_core::persist::write_atomic;
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_max_release_attempts")]
    pub max_release_attempts: u32,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_min_free_space")]
    pub min_free_space_mib: u64,

    #[serde(default)]
    pub adb_path: Option<PathBuf>,

    #[serde(default)]
    pub device_serial: Option<String>,

    #[serde(default)]
    pub github_token: Option<String>,

    #[serde(default)]
    pub network_metered: bool,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_max_release_attempts() -> u32 {
    5
}

fn default_http_timeout() -> u64 {
    30
}

fn default_min_free_space() -> u64 {
    500
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            max_release_attempts: default_max_release_attempts(),
            http_timeout_secs: default_http_timeout(),
            min_free_space_mib: default_min_free_space(),
            adb_path: None,
            device_serial: None,
            github_token: None,
            network_metered: false,
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl AppSettings {
    /// Read settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                warn!("Ignoring invalid settings in {}: {error}", path.display());
                Self::default()
            }),
            Err(error) => {
                warn!("Failed to read {}: {error}", path.display());
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &content)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_space_mib.saturating_mul(1024 * 1024)
    }
}
