use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use apkup_backend::{ReleaseInfo, UpdateCheckResult};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::persist::write_atomic;

const KEY_PREFIX: &str = "cached_update_check_result__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUpdateCheck {
    pub result: UpdateCheckResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    update_checks: BTreeMap<String, StoredUpdateCheck>,
    #[serde(default)]
    installed_releases: BTreeMap<String, ReleaseInfo>,
}

/// Update check results persisted between runs.
///
/// Also remembers the release last installed for packages whose upstream
/// may rebuild an artifact without bumping its version name.
#[derive(Debug)]
pub struct UpdateCheckStore {
    path: PathBuf,
    ttl: Duration,
    document: Mutex<StoreDocument>,
}

fn key(package_id: &str) -> String {
    format!("{KEY_PREFIX}{package_id}")
}

impl UpdateCheckStore {
    /// Load the store at `path`; a missing or unreadable file starts empty.
    #[must_use]
    pub fn open(path: &Path, ttl: Duration) -> Self {
        let document = match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|error| {
                warn!("Discarding unreadable update check store {}: {error}", path.display());
                StoreDocument::default()
            }),
            Err(_) => StoreDocument::default(),
        };

        Self {
            path: path.to_path_buf(),
            ttl,
            document: Mutex::new(document),
        }
    }

    fn document(&self) -> std::sync::MutexGuard<'_, StoreDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, document: &StoreDocument) {
        let result = serde_json::to_vec_pretty(document)
            .map_err(std::io::Error::other)
            .and_then(|data| write_atomic(&self.path, &data));
        if let Err(error) = result {
            warn!(
                "Failed to persist update checks to {}: {error}",
                self.path.display()
            );
        }
    }

    /// Stored result for `package_id` if it is younger than the TTL.
    ///
    /// Entries stamped in the future count as stale.
    #[must_use]
    pub fn get_fresh(&self, package_id: &str, now: DateTime<Utc>) -> Option<UpdateCheckResult> {
        let document = self.document();
        let stored = document.update_checks.get(&key(package_id))?;
        let age = (now - stored.timestamp).to_std().ok()?;
        (age < self.ttl).then(|| stored.result.clone())
    }

    pub fn put(&self, package_id: &str, result: UpdateCheckResult, now: DateTime<Utc>) {
        let mut document = self.document();
        document.update_checks.insert(
            key(package_id),
            StoredUpdateCheck {
                result,
                timestamp: now,
            },
        );
        self.save(&document);
    }

    pub fn remove(&self, package_id: &str) {
        let mut document = self.document();
        if document.update_checks.remove(&key(package_id)).is_some() {
            self.save(&document);
        }
    }

    pub fn clear(&self) {
        let mut document = self.document();
        document.update_checks.clear();
        self.save(&document);
    }

    #[must_use]
    pub fn installed_release(&self, package_id: &str) -> Option<ReleaseInfo> {
        self.document().installed_releases.get(package_id).cloned()
    }

    pub fn remember_installed(&self, package_id: &str, release: &ReleaseInfo) {
        let mut document = self.document();
        document
            .installed_releases
            .insert(package_id.to_string(), release.clone());
        self.save(&document);
    }
}
