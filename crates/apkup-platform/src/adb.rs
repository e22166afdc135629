use std::path::{Path, PathBuf};
use std::process::Output;

use apkup_backend::{
    Abi, DeviceProfile, InstallOutcome, Installer, InstallerRejected, PackageRegistry,
    PendingInstall, PlatformError, pending_install,
};
use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use tokio::process::Command;

use crate::apk::read_signing_certificate;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// An Android device reachable through the `adb` command line tool.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb: PathBuf,
    serial: Option<String>,
}

impl AdbDevice {
    #[must_use]
    pub fn new(adb: PathBuf, serial: Option<String>) -> Self {
        Self { adb, serial }
    }

    /// Use `adb_path` when given, otherwise search `PATH` for `adb`.
    ///
    /// # Errors
    /// Returns [`PlatformError::ToolNotFound`] when no `adb` binary is found.
    pub fn locate(adb_path: Option<PathBuf>, serial: Option<String>) -> Result<Self, PlatformError> {
        let adb = match adb_path {
            Some(path) => path,
            None => which::which("adb").map_err(|error| {
                debug!("adb lookup failed: {error}");
                PlatformError::ToolNotFound { tool: "adb" }
            })?,
        };
        debug!("Using adb at {}", adb.display());
        Ok(Self::new(adb, serial))
    }

    fn build_command(&self, args: &[&str]) -> Command {
        debug!(
            "Building adb command: {} {}",
            self.adb.display(),
            args.join(" ")
        );

        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        cmd.args(args);
        cmd.kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    }

    async fn output(&self, args: &[&str]) -> Result<Output, PlatformError> {
        let output = self.build_command(args).output().await?;
        debug!("adb command exit status: {:?}", output.status);
        trace!("adb stdout: {}", String::from_utf8_lossy(&output.stdout));
        if !output.stderr.is_empty() {
            trace!("adb stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(output)
    }

    async fn execute(&self, args: &[&str]) -> Result<String, PlatformError> {
        info!("Executing adb command: {}", args.join(" "));

        let output = self.output(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("adb command failed: args={args:?}, stderr='{stderr}'");
            Err(PlatformError::CommandFailed {
                command: format!("adb {}", args.join(" ")),
                stderr,
            })
        }
    }

    /// Query the device's ABI preference list and SDK level.
    ///
    /// # Errors
    /// Returns an error when `adb` fails or the properties cannot be parsed.
    pub async fn device_profile(&self) -> Result<DeviceProfile, PlatformError> {
        let abi_list = self
            .execute(&["shell", "getprop", "ro.product.cpu.abilist"])
            .await?;
        let sdk = self
            .execute(&["shell", "getprop", "ro.build.version.sdk"])
            .await?;
        parse_device_profile(&abi_list, &sdk)
    }

    async fn run_install(&self, artifact: &Path) -> InstallOutcome {
        let path = artifact.to_string_lossy();
        match self.output(&["install", "-r", &path]).await {
            Ok(output) => parse_install_output(
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            ),
            Err(error) => Err(InstallerRejected::new(error.to_string())),
        }
    }
}

#[async_trait]
impl PackageRegistry for AdbDevice {
    async fn installed_version(&self, package_id: &str) -> Result<Option<String>, PlatformError> {
        let output = self
            .execute(&["shell", "dumpsys", "package", package_id])
            .await?;
        Ok(parse_version_name(&output))
    }

    async fn installed_certificate(
        &self,
        package_id: &str,
    ) -> Result<Option<Vec<u8>>, PlatformError> {
        let output = self.output(&["shell", "pm", "path", package_id]).await?;
        let Some(remote) = parse_package_path(&String::from_utf8_lossy(&output.stdout)) else {
            debug!("{package_id} is not installed on the device");
            return Ok(None);
        };

        let temp_dir = tempfile::tempdir()?;
        let local = temp_dir.path().join("base.apk");
        let local_arg = local.to_string_lossy().to_string();
        self.execute(&["pull", &remote, &local_arg]).await?;

        let certificate = tokio::task::spawn_blocking(move || read_signing_certificate(&local))
            .await
            .map_err(std::io::Error::other)?
            .map_err(|error| PlatformError::UnexpectedOutput {
                command: format!("adb pull {remote}"),
                details: error.to_string(),
            })?;

        Ok(Some(certificate))
    }
}

#[async_trait]
impl Installer for AdbDevice {
    async fn install(
        &self,
        artifact: &Path,
        package_id: &str,
    ) -> Result<PendingInstall, PlatformError> {
        tokio::fs::metadata(artifact).await?;

        let (completer, pending) = pending_install();
        let device = self.clone();
        let artifact = artifact.to_path_buf();
        let package_id = package_id.to_string();

        info!("Installing {} for {package_id}", artifact.display());
        tokio::spawn(async move {
            let outcome = device.run_install(&artifact).await;
            match &outcome {
                Ok(()) => info!("adb reported successful installation of {package_id}"),
                Err(rejected) => warn!("adb rejected installation of {package_id}: {rejected}"),
            }
            completer.complete(outcome);
        });

        Ok(pending)
    }
}

fn parse_device_profile(abi_list: &str, sdk: &str) -> Result<DeviceProfile, PlatformError> {
    let abis: Vec<Abi> = abi_list
        .trim()
        .split(',')
        .filter(|name| !name.is_empty())
        .filter_map(|name| match name.parse() {
            Ok(abi) => Some(abi),
            Err(error) => {
                debug!("Ignoring device ABI: {error}");
                None
            }
        })
        .collect();

    if abis.is_empty() {
        return Err(PlatformError::UnexpectedOutput {
            command: "adb shell getprop ro.product.cpu.abilist".to_string(),
            details: format!("no known ABI in '{}'", abi_list.trim()),
        });
    }

    let sdk_version = sdk
        .trim()
        .parse()
        .map_err(|_| PlatformError::UnexpectedOutput {
            command: "adb shell getprop ro.build.version.sdk".to_string(),
            details: format!("'{}' is not an SDK level", sdk.trim()),
        })?;

    Ok(DeviceProfile { abis, sdk_version })
}

fn parse_version_name(dumpsys: &str) -> Option<String> {
    dumpsys
        .lines()
        .find_map(|line| line.trim().strip_prefix("versionName="))
        .map(|version| version.trim().to_string())
        .filter(|version| !version.is_empty())
}

fn parse_package_path(output: &str) -> Option<String> {
    let paths: Vec<&str> = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .collect();
    paths
        .iter()
        .find(|path| path.ends_with("/base.apk"))
        .or_else(|| paths.first())
        .map(|path| (*path).to_string())
}

fn parse_install_output(stdout: &str, stderr: &str) -> InstallOutcome {
    let lines: Vec<&str> = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.iter().any(|line| *line == "Success") {
        return Ok(());
    }

    let message = lines
        .iter()
        .find(|line| line.contains("Failure") || line.contains("INSTALL_FAILED"))
        .or_else(|| lines.last())
        .copied()
        .unwrap_or("adb install reported no result");
    Err(InstallerRejected::new(message))
}
