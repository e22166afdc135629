//! Fakes and fixture builders shared by the unit tests of this crate.

use std::collections::HashMap;
use std::io::{Cursor, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use apkup_backend::{
    ApiConsumer, InstallCompleter, InstallOutcome, Installer, MountState, PackageRegistry,
    PendingInstall, PlatformError, ReleaseInfo, ReleaseResolver, ResolveError, StorageProbe,
    pending_install,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::catalog::{
    AssetPattern, PackageDescriptor, PostInstallHook, SourceSpec, TaggedReleaseSpec, VersionRule,
};

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    if content.len() < 0x80 {
        out.push(u8::try_from(content.len()).expect("short length should fit"));
    } else {
        let len = u16::try_from(content.len()).expect("fixture content should be small");
        out.push(0x82);
        out.extend_from_slice(&len.to_be_bytes());
    }
    out.extend_from_slice(content);
    out
}

/// A DER blob standing in for an X.509 certificate.
pub fn fake_certificate(marker: &str) -> Vec<u8> {
    der(0x30, format!("test certificate {marker}").as_bytes())
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// A minimal JAR-signed archive carrying `certificate` in `META-INF/CERT.RSA`.
pub fn fake_apk(certificate: &[u8]) -> Vec<u8> {
    let signed_data_oid = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
    let data_oid = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];
    let signed_data = der(
        0x30,
        &[
            der(0x02, &[1]),
            der(0x31, &[]),
            der(0x30, &der(0x06, &data_oid)),
            der(0xa0, certificate),
            der(0x31, &[]),
        ]
        .concat(),
    );
    let pkcs7 = der(
        0x30,
        &[der(0x06, &signed_data_oid), der(0xa0, &signed_data)].concat(),
    );

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    writer
        .start_file("AndroidManifest.xml", options)
        .expect("manifest entry should be started");
    writer
        .write_all(b"<manifest/>")
        .expect("manifest entry should be written");
    writer
        .start_file("META-INF/CERT.RSA", options)
        .expect("signature entry should be started");
    writer
        .write_all(&pkcs7)
        .expect("signature entry should be written");
    writer
        .finish()
        .expect("archive should be finalized")
        .into_inner()
}

pub fn tagged_release_source() -> SourceSpec {
    SourceSpec::TaggedRelease(TaggedReleaseSpec {
        owner: "example",
        repo: "app",
        per_page: 5,
        bulk_only: false,
        allow_prerelease: false,
        name_prefix: None,
        asset: AssetPattern::AnySuffix(".apk"),
        fail_if_valid_release_has_no_asset: false,
    })
}

/// A descriptor that lives for the rest of the test binary.
pub fn leak_descriptor(
    package_id: &str,
    signature_sha256: &str,
    source: SourceSpec,
) -> &'static PackageDescriptor {
    leak_descriptor_with_hook(package_id, signature_sha256, source, PostInstallHook::Nothing)
}

pub fn leak_descriptor_with_hook(
    package_id: &str,
    signature_sha256: &str,
    source: SourceSpec,
    post_install: PostInstallHook,
) -> &'static PackageDescriptor {
    Box::leak(Box::new(PackageDescriptor {
        name: Box::leak(package_id.to_string().into_boxed_str()),
        package_id: Box::leak(package_id.to_string().into_boxed_str()),
        title: "Test Package",
        min_sdk: 21,
        supported_abis: &apkup_backend::Abi::ALL,
        signature_sha256: Box::leak(signature_sha256.to_string().into_boxed_str()),
        source,
        version_rule: VersionRule::Verbatim,
        post_install,
    }))
}

pub fn release(version: &str, download_url: &str) -> ReleaseInfo {
    ReleaseInfo {
        version: version.to_string(),
        download_url: download_url.to_string(),
        published_at: None,
        size_bytes: None,
        sha256: None,
    }
}

/// A release with every optional field filled in.
pub fn detailed_release() -> ReleaseInfo {
    ReleaseInfo {
        version: "1.20.103".to_string(),
        download_url: "https://dl.example/v1.20.103/BraveMonoarm64.apk".to_string(),
        published_at: Some(
            "2021-02-10T11:30:45.123456789Z"
                .parse()
                .expect("timestamp should parse"),
        ),
        size_bytes: Some(171_400_033),
        sha256: Some("9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08".to_string()),
    }
}

/// Canned responses keyed by URL; every request is recorded.
#[derive(Default)]
pub struct FakeApiConsumer {
    responses: HashMap<String, Result<String, ResolveError>>,
    requests: Mutex<Vec<String>>,
}

impl FakeApiConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, url: &str, body: &str) -> Self {
        self.responses.insert(url.to_string(), Ok(body.to_string()));
        self
    }

    pub fn with_error(mut self, url: &str, error: ResolveError) -> Self {
        self.responses.insert(url.to_string(), Err(error));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("request log should not be poisoned")
            .clone()
    }
}

#[async_trait]
impl ApiConsumer for FakeApiConsumer {
    async fn fetch_text(&self, url: &str) -> Result<String, ResolveError> {
        self.requests
            .lock()
            .expect("request log should not be poisoned")
            .push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(ResolveError::unavailable(url, "HTTP 404 Not Found")))
    }
}

/// Resolver returning a fixed result and counting invocations.
pub struct StaticResolver {
    package_id: String,
    result: Mutex<Result<ReleaseInfo, ResolveError>>,
    delay: Option<std::time::Duration>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(package_id: &str, result: Result<ReleaseInfo, ResolveError>) -> Self {
        Self {
            package_id: package_id.to_string(),
            result: Mutex::new(result),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_result(&self, result: Result<ReleaseInfo, ResolveError>) {
        *self.result.lock().expect("result should not be poisoned") = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseResolver for StaticResolver {
    fn package_id(&self) -> &str {
        &self.package_id
    }

    async fn resolve(&self) -> Result<ReleaseInfo, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result
            .lock()
            .expect("result should not be poisoned")
            .clone()
    }
}

#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub version: String,
    pub certificate: Vec<u8>,
}

/// Device package registry backed by a map.
#[derive(Default)]
pub struct FakeRegistry {
    packages: Mutex<HashMap<String, InstalledPackage>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, package_id: &str, version: &str, certificate: &[u8]) {
        self.packages
            .lock()
            .expect("registry should not be poisoned")
            .insert(
                package_id.to_string(),
                InstalledPackage {
                    version: version.to_string(),
                    certificate: certificate.to_vec(),
                },
            );
    }

    fn get(&self, package_id: &str) -> Option<InstalledPackage> {
        self.packages
            .lock()
            .expect("registry should not be poisoned")
            .get(package_id)
            .cloned()
    }
}

#[async_trait]
impl PackageRegistry for FakeRegistry {
    async fn installed_version(&self, package_id: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.get(package_id).map(|package| package.version))
    }

    async fn installed_certificate(
        &self,
        package_id: &str,
    ) -> Result<Option<Vec<u8>>, PlatformError> {
        Ok(self.get(package_id).map(|package| package.certificate))
    }
}

/// What [`FakeInstaller`] does with an installation request.
pub enum InstallBehavior {
    /// Report success and register `certificate` for the package.
    Succeed { version: String, certificate: Vec<u8> },
    Reject(String),
    /// Keep the completer so the test decides when and how it finishes.
    Hold,
}

pub struct FakeInstaller {
    registry: std::sync::Arc<FakeRegistry>,
    behavior: InstallBehavior,
    held: Mutex<Option<InstallCompleter>>,
    installed_paths: Mutex<Vec<PathBuf>>,
}

impl FakeInstaller {
    pub fn new(registry: std::sync::Arc<FakeRegistry>, behavior: InstallBehavior) -> Self {
        Self {
            registry,
            behavior,
            held: Mutex::new(None),
            installed_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.installed_paths
            .lock()
            .expect("installer log should not be poisoned")
            .len()
    }

    pub fn abandon_held(&self) {
        let completer = self
            .held
            .lock()
            .expect("installer should not be poisoned")
            .take();
        assert!(completer.is_some(), "an installation should be held");
    }

    pub fn complete_held(&self, outcome: InstallOutcome) {
        let completer = self
            .held
            .lock()
            .expect("installer should not be poisoned")
            .take()
            .expect("an installation should be held");
        completer.complete(outcome);
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn install(
        &self,
        artifact: &Path,
        package_id: &str,
    ) -> Result<PendingInstall, PlatformError> {
        self.installed_paths
            .lock()
            .expect("installer log should not be poisoned")
            .push(artifact.to_path_buf());

        let (completer, pending) = pending_install();
        match &self.behavior {
            InstallBehavior::Succeed {
                version,
                certificate,
            } => {
                self.registry.install(package_id, version, certificate);
                completer.complete(Ok(()));
            }
            InstallBehavior::Reject(message) => {
                completer.complete(Err(apkup_backend::InstallerRejected::new(message.clone())));
            }
            InstallBehavior::Hold => {
                *self.held.lock().expect("installer should not be poisoned") = Some(completer);
            }
        }
        Ok(pending)
    }
}

pub struct FakeStorage {
    pub state: MountState,
    pub free: u64,
}

impl StorageProbe for FakeStorage {
    fn mount_state(&self) -> MountState {
        self.state
    }

    fn free_bytes(&self) -> Result<u64, PlatformError> {
        Ok(self.free)
    }
}
