use std::sync::{Mutex, MutexGuard, PoisonError};

use apkup_backend::{PendingInstall, ReleaseInfo};

#[derive(Debug, Default)]
struct SessionData {
    release: Option<ReleaseInfo>,
    pending_install: Option<PendingInstall>,
}

/// Workflow state that outlives a single [`super::InstallController`].
///
/// Holding on to the session lets a controller created later pick up where
/// a torn down one stopped: re-awaiting an installer that is still busy, or
/// reattaching to a download that is still running.
#[derive(Debug, Default)]
pub struct RetainedSession {
    data: Mutex<SessionData>,
}

impl RetainedSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn release(&self) -> Option<ReleaseInfo> {
        self.data().release.clone()
    }

    #[must_use]
    pub fn pending_install(&self) -> Option<PendingInstall> {
        self.data().pending_install.clone()
    }

    pub(crate) fn set_release(&self, release: Option<ReleaseInfo>) {
        self.data().release = release;
    }

    pub(crate) fn set_pending_install(&self, pending: Option<PendingInstall>) {
        self.data().pending_install = pending;
    }

    pub(crate) fn reset(&self) {
        *self.data() = SessionData::default();
    }
}
