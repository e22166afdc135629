use std::sync::Arc;

use apkup_backend::{
    DownloadProgress, InstallOutcome, MountState, ReleaseInfo, ReleaseResolver, SignatureError,
};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::session::RetainedSession;
use super::state::{InstallFailure, InstallState, PauseReason};
use super::{InstallEnvironment, InstallSnapshot};
use crate::catalog::{PackageDescriptor, PostInstallHook};
use crate::download::{DownloadHandle, DownloadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    RequestInstallation { pause_epoch: u64 },
}

struct InstallerFinished {
    pause_epoch: u64,
    outcome: InstallOutcome,
}

pub(crate) struct InstallMachine {
    env: Arc<InstallEnvironment>,
    descriptor: &'static PackageDescriptor,
    resolver: Arc<dyn ReleaseResolver>,
    session: Arc<RetainedSession>,
    snapshot: watch::Sender<InstallSnapshot>,
    download: Option<DownloadHandle>,
}

impl InstallMachine {
    pub(crate) fn new(
        env: Arc<InstallEnvironment>,
        descriptor: &'static PackageDescriptor,
        resolver: Arc<dyn ReleaseResolver>,
        session: Arc<RetainedSession>,
        snapshot: watch::Sender<InstallSnapshot>,
    ) -> Self {
        Self {
            env,
            descriptor,
            resolver,
            session,
            snapshot,
            download: None,
        }
    }

    fn package_id(&self) -> &'static str {
        self.descriptor.package_id
    }

    /// Where a freshly created machine picks up the retained session.
    pub(crate) fn entry_state(&mut self) -> InstallState {
        if self.session.pending_install().is_some() {
            return InstallState::Paused(PauseReason::AwaitingInstaller);
        }
        if self.session.release().is_some()
            && let Some(handle) = self.env.downloader.attach(self.package_id())
        {
            self.download = Some(handle);
            return InstallState::DownloadRunning;
        }
        InstallState::Start
    }

    fn publish(&self, state: &InstallState, pause_epoch: u64) {
        let release = self.session.release();
        self.snapshot.send_modify(|snapshot| {
            snapshot.state = state.clone();
            snapshot.pause_epoch = pause_epoch;
            if release.is_some() {
                snapshot.release = release;
            }
        });
    }

    fn publish_progress(&self, progress: DownloadProgress) {
        self.snapshot
            .send_modify(|snapshot| snapshot.progress = Some(progress));
    }

    /// Run transitions until the workflow ends or `cancel` fires.
    pub(crate) async fn drive(
        mut self,
        initial: InstallState,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) {
        let (inbox, mut installer_events) = mpsc::unbounded_channel();
        let mut pause_epoch = 0_u64;
        let mut state = initial;

        loop {
            if matches!(state, InstallState::Paused(_)) {
                pause_epoch += 1;
            }
            self.publish(&state, pause_epoch);
            if state.is_terminal() {
                info!("Installation of {} ended in {state:?}", self.package_id());
                break;
            }

            let next = match state {
                InstallState::Paused(reason) => {
                    if reason == PauseReason::AwaitingInstaller
                        && !self.forward_installer_completion(&inbox, pause_epoch, &cancel)
                    {
                        InstallState::Error(InstallFailure::InstallationFailed {
                            message: "installer completion was lost".to_string(),
                        })
                    } else {
                        let resumed = self
                            .wait_while_paused(
                                reason,
                                pause_epoch,
                                &mut commands,
                                &mut installer_events,
                                &cancel,
                            )
                            .await;
                        match resumed {
                            Some(next) => next,
                            None => break,
                        }
                    }
                }
                current => tokio::select! {
                    () = cancel.cancelled() => break,
                    next = self.step(current) => next,
                },
            };

            debug!("{}: -> {next:?}", self.package_id());
            state = next;
        }
    }

    /// Deliver the pending installer's outcome to the inbox, tagged with the
    /// pause it belongs to.
    fn forward_installer_completion(
        &self,
        inbox: &mpsc::UnboundedSender<InstallerFinished>,
        pause_epoch: u64,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(mut pending) = self.session.pending_install() else {
            return false;
        };
        let inbox = inbox.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                outcome = pending.wait() => {
                    let _ = inbox.send(InstallerFinished { pause_epoch, outcome });
                }
            }
        });
        true
    }

    async fn wait_while_paused(
        &self,
        reason: PauseReason,
        pause_epoch: u64,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        installer_events: &mut mpsc::UnboundedReceiver<InstallerFinished>,
        cancel: &CancellationToken,
    ) -> Option<InstallState> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return None,
                Some(command) = commands.recv() => match command {
                    Command::RequestInstallation { pause_epoch: epoch }
                        if epoch == pause_epoch && reason == PauseReason::AwaitingInstallRequest =>
                    {
                        return Some(InstallState::InstallRequested);
                    }
                    Command::RequestInstallation { .. } => {
                        debug!("{}: ignoring stale installation request", self.package_id());
                    }
                },
                Some(event) = installer_events.recv() => {
                    if event.pause_epoch != pause_epoch || reason != PauseReason::AwaitingInstaller {
                        continue;
                    }
                    self.session.set_pending_install(None);
                    return Some(match event.outcome {
                        Ok(()) => InstallState::InstallerSucceeded,
                        Err(rejected) => InstallState::InstallerFailed(rejected.message),
                    });
                }
            }
        }
    }

    async fn step(&mut self, state: InstallState) -> InstallState {
        match state {
            InstallState::Start => self.check_installed_signature().await,
            InstallState::InstalledSignatureChecked => self.check_storage_mounted(),
            InstallState::StorageMounted => self.check_free_space(),
            InstallState::PreconditionsChecked => self.resolve_release().await,
            InstallState::StartDownload => self.start_download(),
            InstallState::DownloadRunning => self.follow_download().await,
            InstallState::DownloadFinished | InstallState::UseCachedArtifact => {
                self.verify_artifact().await
            }
            InstallState::ArtifactVerified => {
                InstallState::Paused(PauseReason::AwaitingInstallRequest)
            }
            InstallState::InstallRequested => self.hand_to_installer().await,
            InstallState::InstallerSucceeded => self.verify_installed_package().await,
            InstallState::InstallerFailed(message) => {
                InstallState::Error(InstallFailure::InstallationFailed { message })
            }
            InstallState::InstalledFingerprintVerified => self.finish().await,
            rest @ (InstallState::Paused(_) | InstallState::Success | InstallState::Error(_)) => {
                rest
            }
        }
    }

    async fn check_installed_signature(&self) -> InstallState {
        match self
            .env
            .validator
            .check_installed_package(self.descriptor)
            .await
        {
            Ok(result) if !result.is_valid => {
                InstallState::Error(InstallFailure::UnknownSignatureOfInstalledPackage {
                    fingerprint: result.hex_string,
                })
            }
            Ok(_) | Err(SignatureError::PackageNotInstalled { .. }) => {
                InstallState::InstalledSignatureChecked
            }
            Err(error) => InstallState::Error(InstallFailure::SignatureCheckFailed(error)),
        }
    }

    fn check_storage_mounted(&self) -> InstallState {
        match self.env.storage.mount_state() {
            MountState::Mounted => InstallState::StorageMounted,
            MountState::ReadOnly | MountState::Missing => {
                InstallState::Error(InstallFailure::ExternalStorageNotAccessible)
            }
        }
    }

    fn check_free_space(&self) -> InstallState {
        match self.env.storage.free_bytes() {
            Ok(available) if available >= self.env.min_free_bytes => {
                InstallState::PreconditionsChecked
            }
            Ok(available) => InstallState::Error(InstallFailure::NotEnoughStorage {
                required: self.env.min_free_bytes,
                available,
            }),
            Err(error) => InstallState::Error(InstallFailure::Platform(error)),
        }
    }

    async fn resolve_release(&self) -> InstallState {
        let release = match self
            .env
            .resolution_cache
            .get_or_resolve(self.resolver.as_ref())
            .await
        {
            Ok(release) => release,
            Err(error) => return InstallState::Error(InstallFailure::ResolutionFailed(error)),
        };

        let cached = self.env.artifacts.is_available(self.package_id(), &release);
        self.session.set_release(Some(release));
        if cached {
            info!("Reusing downloaded artifact of {}", self.package_id());
            InstallState::UseCachedArtifact
        } else {
            InstallState::StartDownload
        }
    }

    fn current_release(&self) -> Result<ReleaseInfo, InstallState> {
        self.session.release().ok_or_else(|| {
            InstallState::Error(InstallFailure::DownloadFailed {
                message: "no release resolved".to_string(),
            })
        })
    }

    fn start_download(&mut self) -> InstallState {
        let release = match self.current_release() {
            Ok(release) => release,
            Err(failed) => return failed,
        };
        let package_id = self.package_id();
        self.env.artifacts.delete_complete(package_id);
        let destination = self.env.artifacts.artifact_path(package_id);
        self.download = Some(
            self.env
                .downloader
                .start(package_id, &release.download_url, &destination),
        );
        InstallState::DownloadRunning
    }

    async fn follow_download(&mut self) -> InstallState {
        let package_id = self.package_id();
        let Some(mut handle) = self
            .download
            .take()
            .or_else(|| self.env.downloader.attach(package_id))
        else {
            return InstallState::StartDownload;
        };

        if let DownloadStatus::Running(progress) = handle.status() {
            self.publish_progress(progress);
        }
        while let Some(status) = handle.next_status().await {
            if let DownloadStatus::Running(progress) = status {
                self.publish_progress(progress);
            }
        }

        let outcome = handle.wait().await;
        self.env.downloader.release(package_id);
        if !outcome.success {
            return InstallState::Error(InstallFailure::DownloadFailed {
                message: outcome.error_message.unwrap_or_default(),
            });
        }

        let release = match self.current_release() {
            Ok(release) => release,
            Err(failed) => return failed,
        };
        match self.env.artifacts.mark_complete(package_id, &release) {
            Ok(()) => InstallState::DownloadFinished,
            Err(error) => InstallState::Error(InstallFailure::DownloadFailed {
                message: error.to_string(),
            }),
        }
    }

    async fn verify_artifact(&self) -> InstallState {
        let package_id = self.package_id();
        let path = self.env.artifacts.artifact_path(package_id);
        match self
            .env
            .validator
            .check_archive_file(&path, self.descriptor)
            .await
        {
            Ok(result) if result.is_valid => InstallState::ArtifactVerified,
            Ok(result) => {
                warn!("Deleting {} with unexpected signature", path.display());
                self.env.artifacts.delete(package_id);
                InstallState::Error(InstallFailure::InvalidDownloadFingerprint {
                    actual: result.hex_string,
                    expected: self.descriptor.signature_sha256.to_string(),
                })
            }
            Err(error) => {
                self.env.artifacts.delete(package_id);
                InstallState::Error(InstallFailure::SignatureCheckFailed(error))
            }
        }
    }

    async fn hand_to_installer(&self) -> InstallState {
        let package_id = self.package_id();
        let path = self.env.artifacts.artifact_path(package_id);
        match self.env.installer.install(&path, package_id).await {
            Ok(pending) => {
                self.session.set_pending_install(Some(pending));
                InstallState::Paused(PauseReason::AwaitingInstaller)
            }
            Err(error) => InstallState::Error(InstallFailure::Platform(error)),
        }
    }

    async fn verify_installed_package(&self) -> InstallState {
        match self
            .env
            .validator
            .check_installed_package(self.descriptor)
            .await
        {
            Ok(result) if result.is_valid => InstallState::InstalledFingerprintVerified,
            Ok(result) => InstallState::Error(InstallFailure::InvalidInstalledFingerprint {
                actual: result.hex_string,
                expected: self.descriptor.signature_sha256.to_string(),
            }),
            Err(error) => InstallState::Error(InstallFailure::SignatureCheckFailed(error)),
        }
    }

    async fn finish(&self) -> InstallState {
        let package_id = self.package_id();
        if self.descriptor.post_install == PostInstallHook::RememberInstalledRelease
            && let Some(release) = self.session.release()
        {
            self.env.update_store.remember_installed(package_id, &release);
        }

        self.env.artifacts.delete(package_id);
        self.env.resolution_cache.invalidate(package_id).await;
        self.env.update_store.remove(package_id);
        self.session.reset();
        InstallState::Success
    }
}
