use std::cmp::Ordering;

use semver::Prerelease;

/// Whether `available` should replace `installed`.
///
/// A missing installation always counts as an update. Versions that cannot be
/// parsed on either side fall back to plain inequality.
#[must_use]
pub fn is_update_available(installed: Option<&str>, available: &str) -> bool {
    match installed {
        None => true,
        Some(installed) => is_newer_version(available, installed),
    }
}

#[must_use]
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    let latest = latest.trim();
    let current = current.trim();
    match (DottedVersion::parse(latest), DottedVersion::parse(current)) {
        (Some(latest), Some(current)) => latest.cmp(&current) == Ordering::Greater,
        _ => latest != current,
    }
}

/// A dotted numeric version of any length with an optional semver style
/// pre-release suffix, e.g. `96.3.0`, `4.3.2439.61` or `1.0.0-beta.2`.
#[derive(Debug, PartialEq, Eq)]
struct DottedVersion {
    components: Vec<u64>,
    pre: Prerelease,
}

impl DottedVersion {
    fn parse(version: &str) -> Option<Self> {
        let version = version.strip_prefix('v').unwrap_or(version);
        let (core, suffix) = split_core_and_suffix(version);
        let components = core
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        let pre = match suffix.strip_prefix('-') {
            Some(pre) => {
                let pre = pre.split('+').next().unwrap_or_default();
                Prerelease::new(pre).ok()?
            }
            None if suffix.is_empty() || suffix.starts_with('+') => Prerelease::EMPTY,
            None => return None,
        };

        Some(Self { components, pre })
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        let component = |version: &Self, index: usize| -> u64 {
            version.components.get(index).copied().unwrap_or(0)
        };
        (0..len)
            .map(|index| component(self, index).cmp(&component(other, index)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn split_core_and_suffix(version: &str) -> (&str, &str) {
    let suffix_idx = version.find(['-', '+']).unwrap_or(version.len());
    (&version[..suffix_idx], &version[suffix_idx..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert!(is_newer_version("1.0.1", "1.0.0"));
        assert!(is_newer_version("1.20.103", "1.18.12"));
        assert!(is_newer_version("4.3.2439.61", "4.3.2439.44"));
        assert!(is_newer_version("1.2", "1.1.9"));
        assert!(is_newer_version("1.0.0", "1.0.0-beta.2"));
        assert!(!is_newer_version("1.2", "1.2.0"));
        assert!(!is_newer_version("1.0.0-beta.2", "1.0.0-beta.10"));
        assert!(!is_newer_version("96.3.0", "96.3.0"));
        assert!(!is_newer_version("0.9.0", "1.0.0"));
    }

    #[test]
    fn unparseable_versions_compare_by_inequality() {
        assert!(is_newer_version("nightly-2021", "nightly-2020"));
        assert!(!is_newer_version("nightly-2021", "nightly-2021"));
    }

    #[test]
    fn missing_installation_is_always_an_update() {
        assert!(is_update_available(None, "1.0.0"));
        assert!(is_update_available(Some("1.18.12"), "1.20.103"));
        assert!(!is_update_available(Some("1.20.103"), "1.20.103"));
    }
}
