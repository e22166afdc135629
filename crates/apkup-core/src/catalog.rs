//! The fixed set of packages this tool knows how to update.

use apkup_backend::Abi;
use regex::Regex;

use crate::abi::AbiNames;

const FIREFOX_CI_INDEX: &str = "https://firefox-ci-tc.services.mozilla.com/api/index/v1/";

#[derive(Debug)]
pub struct PackageDescriptor {
    /// Short name used on the command line.
    pub name: &'static str,
    pub package_id: &'static str,
    pub title: &'static str,
    pub min_sdk: u32,
    pub supported_abis: &'static [Abi],
    /// SHA-256 of the expected signing certificate, lowercase hex.
    pub signature_sha256: &'static str,
    pub source: SourceSpec,
    pub version_rule: VersionRule,
    pub post_install: PostInstallHook,
}

#[derive(Debug)]
pub enum SourceSpec {
    TaggedRelease(TaggedReleaseSpec),
    CiArtifactIndex(CiArtifactSpec),
    HtmlScrape(HtmlScrapeSpec),
}

#[derive(Debug)]
pub struct TaggedReleaseSpec {
    pub owner: &'static str,
    pub repo: &'static str,
    pub per_page: u32,
    /// Skip the `releases/latest` probe and page through the listing directly.
    pub bulk_only: bool,
    pub allow_prerelease: bool,
    pub name_prefix: Option<&'static str>,
    pub asset: AssetPattern,
    /// Give up instead of moving on when the first valid release lacks a
    /// matching asset.
    pub fail_if_valid_release_has_no_asset: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum AssetPattern {
    /// Asset name equals the entry for the selected ABI.
    Exact(AbiNames),
    /// Asset name ends with the entry for the selected ABI.
    EndsWith(AbiNames),
    /// ABI independent asset identified by its suffix.
    AnySuffix(&'static str),
}

#[derive(Debug)]
pub struct CiArtifactSpec {
    pub index_url: &'static str,
    /// Index task name; `{abi}` is replaced with the ABI spelling.
    pub task: &'static str,
    /// Artifact path inside the task; `{abi}` is replaced likewise.
    pub artifact: &'static str,
    pub abi_names: AbiNames,
    pub version_key: &'static str,
    pub date_key: &'static str,
}

#[derive(Debug)]
pub struct HtmlScrapeSpec {
    pub page_url: &'static str,
    /// Regex for the download link. `{abi}` is replaced with the escaped ABI
    /// spelling; capture group 1 is the version.
    pub link_pattern: &'static str,
    pub abi_names: AbiNames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRule {
    Verbatim,
    StripPrefix(&'static str),
    /// First capture group of the pattern.
    Capture(&'static str),
}

impl VersionRule {
    #[must_use]
    pub fn extract(self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        let version = match self {
            Self::Verbatim => raw,
            Self::StripPrefix(prefix) => raw.strip_prefix(prefix).unwrap_or(raw),
            Self::Capture(pattern) => {
                let regex = Regex::new(pattern).ok()?;
                regex.captures(raw)?.get(1)?.as_str()
            }
        };
        (!version.is_empty()).then(|| version.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostInstallHook {
    Nothing,
    /// Record the installed release so rebuilt artifacts that reuse a version
    /// name are still offered as updates.
    RememberInstalledRelease,
}

impl PackageDescriptor {
    #[must_use]
    pub fn supports_sdk(&self, sdk_version: u32) -> bool {
        sdk_version >= self.min_sdk
    }
}

pub static CATALOG: [PackageDescriptor; 7] = [
    PackageDescriptor {
        name: "brave",
        package_id: "com.brave.browser",
        title: "Brave Browser",
        min_sdk: 24,
        supported_abis: &[Abi::Arm64V8a, Abi::ArmeabiV7a, Abi::X86_64, Abi::X86],
        signature_sha256: "9c2db70513515fdbfbbc585b3edf3d7123d4dc67c94ffd306361c1d79bbf18ac",
        source: SourceSpec::TaggedRelease(TaggedReleaseSpec {
            owner: "brave",
            repo: "brave-browser",
            per_page: 20,
            bulk_only: false,
            allow_prerelease: true,
            name_prefix: Some("Release v"),
            asset: AssetPattern::Exact(&[
                (Abi::ArmeabiV7a, "BraveMonoarm.apk"),
                (Abi::Arm64V8a, "BraveMonoarm64.apk"),
                (Abi::X86, "BraveMonox86.apk"),
                (Abi::X86_64, "BraveMonox64.apk"),
            ]),
            fail_if_valid_release_has_no_asset: false,
        }),
        version_rule: VersionRule::StripPrefix("v"),
        post_install: PostInstallHook::Nothing,
    },
    PackageDescriptor {
        name: "bromite",
        package_id: "org.bromite.bromite",
        title: "Bromite",
        min_sdk: 21,
        supported_abis: &[Abi::Arm64V8a, Abi::ArmeabiV7a, Abi::X86, Abi::X86_64],
        signature_sha256: "e1ee5cd076d7b0dc84cb2b45fb78b86df2eb39a3b6c56ba3dc292a5e0c3b9504",
        source: SourceSpec::TaggedRelease(TaggedReleaseSpec {
            owner: "bromite",
            repo: "bromite",
            per_page: 5,
            bulk_only: false,
            allow_prerelease: false,
            name_prefix: None,
            asset: AssetPattern::Exact(&[
                (Abi::ArmeabiV7a, "arm_ChromePublic.apk"),
                (Abi::Arm64V8a, "arm64_ChromePublic.apk"),
                (Abi::X86, "x86_ChromePublic.apk"),
                (Abi::X86_64, "x64_ChromePublic.apk"),
            ]),
            fail_if_valid_release_has_no_asset: false,
        }),
        version_rule: VersionRule::Verbatim,
        post_install: PostInstallHook::Nothing,
    },
    PackageDescriptor {
        name: "ffupdater",
        package_id: "de.marmaro.krt.ffupdater",
        title: "FFUpdater",
        min_sdk: 24,
        supported_abis: &Abi::ALL,
        signature_sha256: "f4e642bb85cbbcfd7302b2cbcbd346993a41067c27d995df492c9d0d38747e62",
        source: SourceSpec::TaggedRelease(TaggedReleaseSpec {
            owner: "Tobi823",
            repo: "ffupdater",
            per_page: 5,
            bulk_only: false,
            allow_prerelease: false,
            name_prefix: None,
            asset: AssetPattern::AnySuffix(".apk"),
            fail_if_valid_release_has_no_asset: false,
        }),
        version_rule: VersionRule::Verbatim,
        post_install: PostInstallHook::Nothing,
    },
    PackageDescriptor {
        name: "firefox-klar",
        package_id: "org.mozilla.klar",
        title: "Firefox Klar",
        min_sdk: 21,
        supported_abis: &[Abi::Arm64V8a, Abi::ArmeabiV7a],
        signature_sha256: "6203a473be36d64ee37f87fa500edbc79eab930610ab9b9fa4ca7d5c1f1b4ffc",
        source: SourceSpec::CiArtifactIndex(CiArtifactSpec {
            index_url: FIREFOX_CI_INDEX,
            task: "project.mobile.focus.release.latest",
            artifact: "public/app-klar-{abi}-release-unsigned.apk",
            abi_names: &[(Abi::ArmeabiV7a, "arm"), (Abi::Arm64V8a, "aarch64")],
            version_key: "tag_name",
            date_key: "published_at",
        }),
        version_rule: VersionRule::Capture(r"^v(.*)$"),
        post_install: PostInstallHook::Nothing,
    },
    PackageDescriptor {
        name: "firefox",
        package_id: "org.mozilla.firefox",
        title: "Firefox",
        min_sdk: 21,
        supported_abis: &[Abi::Arm64V8a, Abi::ArmeabiV7a, Abi::X86_64, Abi::X86],
        signature_sha256: "a78b62a5165b4494b2fead9e76a280d22d937fee6251aece599446b2ea319b04",
        source: SourceSpec::CiArtifactIndex(CiArtifactSpec {
            index_url: FIREFOX_CI_INDEX,
            task: "mobile.v2.fenix.release.latest.{abi}",
            artifact: "public/build/{abi}/target.apk",
            abi_names: &[
                (Abi::ArmeabiV7a, "armeabi-v7a"),
                (Abi::Arm64V8a, "arm64-v8a"),
                (Abi::X86, "x86"),
                (Abi::X86_64, "x86_64"),
            ],
            version_key: "version",
            date_key: "now",
        }),
        version_rule: VersionRule::Verbatim,
        post_install: PostInstallHook::RememberInstalledRelease,
    },
    PackageDescriptor {
        name: "lockwise",
        package_id: "mozilla.lockbox",
        title: "Firefox Lockwise",
        min_sdk: 24,
        supported_abis: &Abi::ALL,
        signature_sha256: "64d26b507078deba2fee42d6bd0bfad41d39ffc4e791f281028e5e73d3c8d2f2",
        source: SourceSpec::TaggedRelease(TaggedReleaseSpec {
            owner: "mozilla-lockwise",
            repo: "lockwise-android",
            per_page: 5,
            bulk_only: false,
            allow_prerelease: false,
            name_prefix: None,
            asset: AssetPattern::AnySuffix(".apk"),
            fail_if_valid_release_has_no_asset: false,
        }),
        // Tags look like "release-v4.0.3" or "release-v4.0.0-RC-2".
        version_rule: VersionRule::Capture(r"^release-v((\d)+(\.\d+)*)"),
        post_install: PostInstallHook::Nothing,
    },
    PackageDescriptor {
        name: "vivaldi",
        package_id: "com.vivaldi.browser",
        title: "Vivaldi",
        min_sdk: 24,
        supported_abis: &[Abi::Arm64V8a, Abi::ArmeabiV7a, Abi::X86_64],
        signature_sha256: "e8a78544655ba8c09817f732768f5689b1662ec4b2bc5a0bc0ec138d33ca3d1e",
        source: SourceSpec::HtmlScrape(HtmlScrapeSpec {
            page_url: "https://vivaldi.com/download/",
            link_pattern: r"https://downloads\.vivaldi\.com/stable/Vivaldi\.([0-9][0-9.]*)_{abi}\.apk",
            abi_names: &[
                (Abi::ArmeabiV7a, "armeabi-v7a"),
                (Abi::Arm64V8a, "arm64-v8a"),
                (Abi::X86_64, "x86-64"),
            ],
        }),
        version_rule: VersionRule::Verbatim,
        post_install: PostInstallHook::Nothing,
    },
];

/// Look a package up by its short name or its package identifier.
#[must_use]
pub fn find(name_or_id: &str) -> Option<&'static PackageDescriptor> {
    CATALOG.iter().find(|descriptor| {
        descriptor.name.eq_ignore_ascii_case(name_or_id) || descriptor.package_id == name_or_id
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn catalog_entries_are_unique_and_well_formed() {
        let names: HashSet<_> = CATALOG.iter().map(|d| d.name).collect();
        let ids: HashSet<_> = CATALOG.iter().map(|d| d.package_id).collect();
        assert_eq!(names.len(), CATALOG.len());
        assert_eq!(ids.len(), CATALOG.len());

        for descriptor in &CATALOG {
            assert_eq!(descriptor.signature_sha256.len(), 64, "{}", descriptor.name);
            assert!(
                descriptor
                    .signature_sha256
                    .chars()
                    .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
                "{}",
                descriptor.name
            );
            assert!(!descriptor.supported_abis.is_empty(), "{}", descriptor.name);
        }
    }

    #[test]
    fn abi_tables_only_name_supported_abis() {
        for descriptor in &CATALOG {
            let table = match &descriptor.source {
                SourceSpec::TaggedRelease(spec) => match spec.asset {
                    AssetPattern::Exact(table) | AssetPattern::EndsWith(table) => table,
                    AssetPattern::AnySuffix(_) => continue,
                },
                SourceSpec::CiArtifactIndex(spec) => spec.abi_names,
                SourceSpec::HtmlScrape(spec) => spec.abi_names,
            };
            for (abi, _) in table {
                assert!(
                    descriptor.supported_abis.contains(abi),
                    "{} lists unsupported {abi}",
                    descriptor.name
                );
            }
        }
    }

    #[test]
    fn find_accepts_name_or_package_id() {
        assert_eq!(
            find("Brave").map(|d| d.package_id),
            Some("com.brave.browser")
        );
        assert_eq!(find("mozilla.lockbox").map(|d| d.name), Some("lockwise"));
        assert!(find("chrome").is_none());
    }

    #[test]
    fn version_rules_extract_expected_strings() {
        assert_eq!(
            VersionRule::StripPrefix("v").extract("v1.20.103").as_deref(),
            Some("1.20.103")
        );
        assert_eq!(
            VersionRule::Verbatim.extract("90.0.4430.59").as_deref(),
            Some("90.0.4430.59")
        );
        let lockwise = VersionRule::Capture(r"^release-v((\d)+(\.\d+)*)");
        assert_eq!(
            lockwise.extract("release-v4.0.0-RC-2").as_deref(),
            Some("4.0.0")
        );
        assert_eq!(lockwise.extract("nightly-4.0.0"), None);
        assert_eq!(
            VersionRule::Capture(r"^v(.*)$").extract("v98.1.0").as_deref(),
            Some("98.1.0")
        );
        assert_eq!(VersionRule::Verbatim.extract("  "), None);
    }

    #[test]
    fn link_patterns_compile_for_every_abi() {
        for descriptor in &CATALOG {
            if let SourceSpec::HtmlScrape(spec) = &descriptor.source {
                for (_, name) in spec.abi_names {
                    let pattern = spec.link_pattern.replace("{abi}", &regex::escape(name));
                    assert!(Regex::new(&pattern).is_ok(), "{pattern}");
                }
            }
        }
    }
}
