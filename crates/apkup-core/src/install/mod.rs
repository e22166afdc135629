//! End to end installation workflow for one package.
//!
//! [`InstallController`] runs an [`InstallState`] machine on its own task.
//! The machine pauses once the artifact is verified and again while the
//! platform installer works; the caller moves it on with
//! [`InstallController::request_installation`] and observes progress
//! through snapshots.

mod machine;
mod session;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use apkup_backend::{
    DownloadProgress, Installer, PackageRegistry, ReleaseInfo, ReleaseResolver, StorageProbe,
};
use log::debug;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use session::RetainedSession;
pub use state::{InstallFailure, InstallState, PauseReason};

use crate::artifact_cache::LocalArtifactCache;
use crate::catalog::PackageDescriptor;
use crate::download::Downloader;
use crate::resolution_cache::ResolutionCache;
use crate::signature::SignatureValidator;
use crate::update_store::UpdateCheckStore;
use machine::{Command, InstallMachine};

pub const DEFAULT_MIN_FREE_BYTES: u64 = 500 * 1024 * 1024;

/// Collaborators shared by every installation.
pub struct InstallEnvironment {
    pub registry: Arc<dyn PackageRegistry>,
    pub installer: Arc<dyn Installer>,
    pub storage: Arc<dyn StorageProbe>,
    pub resolution_cache: Arc<ResolutionCache>,
    pub update_store: Arc<UpdateCheckStore>,
    pub artifacts: LocalArtifactCache,
    pub downloader: Downloader,
    pub validator: Arc<SignatureValidator>,
    pub min_free_bytes: u64,
}

impl InstallEnvironment {
    /// Drop everything staged for `package_id`, stopping a running download.
    pub fn clean_artifacts(&self, package_id: &str) -> usize {
        if self.downloader.cancel(package_id) {
            debug!("Cancelled download of {package_id}");
        }
        self.artifacts.delete(package_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSnapshot {
    pub state: InstallState,
    pub progress: Option<DownloadProgress>,
    pub release: Option<ReleaseInfo>,
    /// Incremented each time the machine pauses.
    pub pause_epoch: u64,
}

impl Default for InstallSnapshot {
    fn default() -> Self {
        Self {
            state: InstallState::Start,
            progress: None,
            release: None,
            pause_epoch: 0,
        }
    }
}

/// Owner of a running installation workflow.
///
/// Dropping the controller cancels the workflow; the [`RetainedSession`] it
/// was started with keeps what a later controller needs to resume.
pub struct InstallController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<InstallSnapshot>,
    requested_epoch: AtomicU64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl InstallController {
    #[must_use]
    pub fn spawn(
        env: Arc<InstallEnvironment>,
        descriptor: &'static PackageDescriptor,
        resolver: Arc<dyn ReleaseResolver>,
        session: Arc<RetainedSession>,
    ) -> Self {
        let (snapshot_tx, snapshot) = watch::channel(InstallSnapshot::default());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut machine = InstallMachine::new(env, descriptor, resolver, session, snapshot_tx);
        let initial = machine.entry_state();
        debug!("Starting installation of {} at {initial:?}", descriptor.package_id);
        let task = tokio::spawn(machine.drive(initial, command_rx, cancel.clone()));

        Self {
            commands,
            snapshot,
            requested_epoch: AtomicU64::new(0),
            cancel,
            task: Some(task),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> InstallSnapshot {
        self.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<InstallSnapshot> {
        self.snapshot.clone()
    }

    /// Ask the paused machine to hand the artifact to the installer.
    ///
    /// Ignored unless the machine currently waits for exactly this request.
    pub fn request_installation(&self) -> bool {
        let snapshot = self.snapshot.borrow();
        if snapshot.state != InstallState::Paused(PauseReason::AwaitingInstallRequest) {
            return false;
        }
        let pause_epoch = snapshot.pause_epoch;
        drop(snapshot);

        let sent = self
            .commands
            .send(Command::RequestInstallation { pause_epoch })
            .is_ok();
        if sent {
            self.requested_epoch.store(pause_epoch, Ordering::SeqCst);
        }
        sent
    }

    /// Wait until the machine is paused or finished.
    ///
    /// A pause whose installation request was already sent does not count.
    pub async fn wait_for_rest(&mut self) -> InstallSnapshot {
        let requested = self.requested_epoch.load(Ordering::SeqCst);
        let settled = self
            .snapshot
            .wait_for(|snapshot| {
                snapshot.state.is_at_rest()
                    && !(snapshot.state
                        == InstallState::Paused(PauseReason::AwaitingInstallRequest)
                        && snapshot.pause_epoch == requested)
            })
            .await
            .map(|snapshot| snapshot.clone());
        settled.unwrap_or_else(|_| self.snapshot.borrow().clone())
    }

    /// Cancel the workflow and wait for its task to stop.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for InstallController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
