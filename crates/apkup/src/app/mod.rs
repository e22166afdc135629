mod check;
mod install;
mod maintenance;

use std::sync::Arc;

use apkup_backend::DeviceProfile;
use apkup_core::{
    ArchitectureSelector, Downloader, HttpApiConsumer, InstallEnvironment, LocalArtifactCache,
    PackageDescriptor, PackageResolver, Prefetcher, ResolutionCache, SignatureValidator,
    UpdateCheckStore, UpdateChecker, build_http_client, catalog,
};
use apkup_platform::{AdbDevice, AppPaths, ConfiguredNetwork, LocalStorage};
use log::{debug, info};

pub use check::run_check;
pub use install::run_install;
pub use maintenance::{run_clean, run_list};

use crate::error::AppError;
use crate::settings::AppSettings;

/// Long-lived collaborators for one invocation of the tool.
pub struct App {
    settings: AppSettings,
    consumer: Arc<HttpApiConsumer>,
    resolution_cache: Arc<ResolutionCache>,
    update_store: Arc<UpdateCheckStore>,
    artifacts: LocalArtifactCache,
    downloader: Downloader,
}

/// The connected device and what it can run.
pub struct Device {
    adb: Arc<AdbDevice>,
    profile: DeviceProfile,
}

impl App {
    pub fn new(settings: AppSettings, paths: &AppPaths) -> Result<Self, AppError> {
        paths.ensure_dirs()?;

        let api_client = build_http_client(Some(settings.http_timeout()))?;
        // Artifacts can take minutes, only the connect timeout applies.
        let download_client = build_http_client(None)?;

        let consumer = Arc::new(
            HttpApiConsumer::new(api_client).with_github_token(settings.github_token.clone()),
        );
        let update_store = Arc::new(UpdateCheckStore::open(
            &paths.update_cache_file(),
            settings.cache_ttl(),
        ));

        Ok(Self {
            resolution_cache: Arc::new(ResolutionCache::new(settings.cache_ttl())),
            artifacts: LocalArtifactCache::new(paths.download_dir()),
            downloader: Downloader::new(download_client),
            consumer,
            update_store,
            settings,
        })
    }

    pub async fn connect(&self) -> Result<Device, AppError> {
        let adb = AdbDevice::locate(
            self.settings.adb_path.clone(),
            self.settings.device_serial.clone(),
        )?;
        let profile = adb.device_profile().await?;
        info!(
            "Connected device: SDK {}, ABIs {:?}",
            profile.sdk_version, profile.abis
        );
        Ok(Device {
            adb: Arc::new(adb),
            profile,
        })
    }

    fn resolver(&self, descriptor: &'static PackageDescriptor, device: &Device) -> PackageResolver {
        PackageResolver::new(
            descriptor,
            self.consumer.clone(),
            ArchitectureSelector::for_device(&device.profile),
        )
        .with_max_attempts(self.settings.max_release_attempts)
    }

    fn update_checker(&self, device: &Device) -> UpdateChecker {
        UpdateChecker::new(
            self.resolution_cache.clone(),
            self.update_store.clone(),
            device.adb.clone(),
        )
    }

    fn validator(device: &Device) -> Arc<SignatureValidator> {
        Arc::new(SignatureValidator::new(device.adb.clone()))
    }

    fn prefetcher(&self, device: &Device) -> Prefetcher {
        Prefetcher::new(
            Arc::new(ConfiguredNetwork {
                metered: self.settings.network_metered,
            }),
            self.downloader.clone(),
            self.artifacts.clone(),
            Self::validator(device),
        )
    }

    fn install_environment(&self, device: &Device) -> Arc<InstallEnvironment> {
        Arc::new(InstallEnvironment {
            registry: device.adb.clone(),
            installer: device.adb.clone(),
            storage: Arc::new(LocalStorage::new(self.artifacts.dir().to_path_buf())),
            resolution_cache: self.resolution_cache.clone(),
            update_store: self.update_store.clone(),
            artifacts: self.artifacts.clone(),
            downloader: self.downloader.clone(),
            validator: Self::validator(device),
            min_free_bytes: self.settings.min_free_bytes(),
        })
    }
}

/// Look a package up by short name or package identifier.
pub fn find_package(name: &str) -> Result<&'static PackageDescriptor, AppError> {
    catalog::find(name).ok_or_else(|| {
        debug!("No catalog entry for '{name}'");
        AppError::unknown_package(name)
    })
}

/// Packages named on the command line, or the whole catalog when none are.
pub fn select_packages(names: &[String]) -> Result<Vec<&'static PackageDescriptor>, AppError> {
    if names.is_empty() {
        return Ok(catalog::CATALOG.iter().collect());
    }
    names.iter().map(|name| find_package(name)).collect()
}
