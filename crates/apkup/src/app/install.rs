use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use apkup_backend::{DeviceProfile, ReleaseInfo};
use apkup_core::{
    ArchitectureSelector, InstallController, InstallSnapshot, InstallState, PackageDescriptor,
    PauseReason, RetainedSession,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};

use super::{App, find_package};
use crate::error::AppError;

/// Why `descriptor` cannot run on the device, if it cannot.
pub fn compatibility_issue(
    descriptor: &PackageDescriptor,
    profile: &DeviceProfile,
) -> Option<String> {
    if !descriptor.supports_sdk(profile.sdk_version) {
        return Some(format!(
            "requires Android SDK {}, device has {}",
            descriptor.min_sdk, profile.sdk_version
        ));
    }
    let selector = ArchitectureSelector::for_device(profile);
    if selector.best_abi(descriptor.supported_abis).is_none() {
        let abis: Vec<_> = profile.abis.iter().map(|abi| abi.android_name()).collect();
        return Some(format!("no build for device ABIs {}", abis.join(", ")));
    }
    None
}

pub async fn run_install(app: &App, name: &str, assume_yes: bool) -> Result<(), AppError> {
    let descriptor = find_package(name)?;
    let device = app.connect().await?;
    if let Some(reason) = compatibility_issue(descriptor, &device.profile) {
        return Err(AppError::incompatible(descriptor.name, reason));
    }

    let resolver = Arc::new(app.resolver(descriptor, &device));
    let controller = InstallController::spawn(
        app.install_environment(&device),
        descriptor,
        resolver,
        Arc::new(RetainedSession::new()),
    );
    let result = follow(&controller, descriptor, assume_yes).await;
    controller.shutdown().await;
    result
}

async fn follow(
    controller: &InstallController,
    descriptor: &'static PackageDescriptor,
    assume_yes: bool,
) -> Result<(), AppError> {
    let mut updates = controller.subscribe();
    let mut report = ProgressReport::default();
    let mut requested_epoch = None;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        report.show(&snapshot);

        match &snapshot.state {
            InstallState::Success => {
                let version = snapshot
                    .release
                    .as_ref()
                    .map_or("", |release| release.version.as_str());
                println!("{} {version} installed", descriptor.title);
                return Ok(());
            }
            InstallState::Error(failure) => {
                if let Some(hint) = failure.hint() {
                    println!("Hint: {hint}");
                }
                if failure.offers_cleanup() {
                    println!(
                        "Run `apkup clean {}` to remove the downloaded file.",
                        descriptor.name
                    );
                }
                return Err(AppError::install_failed(descriptor.name, failure.clone()));
            }
            InstallState::Paused(PauseReason::AwaitingInstallRequest)
                if requested_epoch != Some(snapshot.pause_epoch) =>
            {
                if !assume_yes && !confirm(descriptor, snapshot.release.as_ref()).await? {
                    info!("Installation of {} declined", descriptor.package_id);
                    return Err(AppError::cancelled("Installation"));
                }
                if controller.request_installation() {
                    requested_epoch = Some(snapshot.pause_epoch);
                }
            }
            _ => {}
        }

        if updates.changed().await.is_err() {
            debug!("Installation of {} stopped without a result", descriptor.package_id);
            return Err(AppError::cancelled("Installation"));
        }
    }
}

/// Prints each state once and drives a progress bar while downloading.
struct ProgressReport {
    last_state: Option<InstallState>,
    last_decile: Option<u8>,
    bar: Option<ProgressBar>,
    visible: bool,
}

impl Default for ProgressReport {
    fn default() -> Self {
        Self {
            last_state: None,
            last_decile: None,
            bar: None,
            visible: true,
        }
    }
}

impl ProgressReport {
    fn show(&mut self, snapshot: &InstallSnapshot) {
        if let Some(line) = self.state_line(snapshot) {
            println!("{line}");
        }
        self.track_download(snapshot);
    }

    fn state_line(&mut self, snapshot: &InstallSnapshot) -> Option<&'static str> {
        if self.last_state.as_ref() == Some(&snapshot.state) {
            return None;
        }
        self.last_state = Some(snapshot.state.clone());
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.last_decile = None;
        describe_state(&snapshot.state)
    }

    fn track_download(&mut self, snapshot: &InstallSnapshot) {
        if snapshot.state != InstallState::DownloadRunning {
            return;
        }
        let Some(progress) = snapshot.progress.as_ref() else {
            return;
        };

        let bar = self
            .bar
            .get_or_insert_with(|| new_download_bar(progress.total, self.visible));
        if let Some(total) = progress.total
            && bar.length() != Some(total)
        {
            bar.set_length(total);
            set_bar_style(bar, true);
        }
        bar.set_position(progress.downloaded);

        if let Some(percent) = progress.percentage()
            && self.last_decile != Some(percent / 10)
        {
            self.last_decile = Some(percent / 10);
            debug!("Download at {percent}%");
        }
    }
}

fn new_download_bar(total: Option<u64>, visible: bool) -> ProgressBar {
    let target = if visible {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let bar = ProgressBar::with_draw_target(total, target);
    set_bar_style(&bar, total.is_some());
    if total.is_none() {
        bar.enable_steady_tick(Duration::from_millis(120));
    }
    bar
}

fn set_bar_style(bar: &ProgressBar, sized: bool) {
    let template = if sized {
        "  [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ETA {eta}"
    } else {
        "  {spinner:.green} {bytes} {bytes_per_sec}"
    };
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style.progress_chars("#>-"));
    }
}

fn describe_state(state: &InstallState) -> Option<&'static str> {
    match state {
        InstallState::InstalledSignatureChecked => Some("Installed package signature verified"),
        InstallState::PreconditionsChecked => Some("Enough storage available"),
        InstallState::StartDownload => Some("Starting download"),
        InstallState::DownloadRunning => Some("Downloading"),
        InstallState::DownloadFinished => Some("Download finished"),
        InstallState::UseCachedArtifact => Some("Using the previously downloaded file"),
        InstallState::ArtifactVerified => Some("Download signature verified"),
        InstallState::InstallRequested => Some("Installing"),
        InstallState::Paused(PauseReason::AwaitingInstaller) => Some("Waiting for the installer"),
        InstallState::InstalledFingerprintVerified => Some("Installed signature verified"),
        _ => None,
    }
}

async fn confirm(
    descriptor: &PackageDescriptor,
    release: Option<&ReleaseInfo>,
) -> Result<bool, AppError> {
    let version = release.map_or("the latest release", |release| release.version.as_str());
    print!("Install {} {version}? [y/N] ", descriptor.title);
    std::io::stdout().flush()?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(std::io::Error::other)??;
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
