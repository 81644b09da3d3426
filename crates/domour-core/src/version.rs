use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::Version;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no versions found for {prefix} in checksums")]
    NoVersionsFound { prefix: String },
    #[error("invalid release version '{input}'")]
    InvalidVersion { input: String },
}

/// A release tag of the form `v<major>.<minor>[.<patch>]`.
///
/// Equality, ordering and hashing follow the numeric components with a
/// missing patch read as 0, so `v1.2` and `v1.2.0` are the same release.
/// Display keeps the tag exactly as published.
#[derive(Debug, Clone)]
pub struct VersionString {
    tag: String,
    version: Version,
}

impl VersionString {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }
}

impl FromStr for VersionString {
    type Err = ResolveError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || ResolveError::InvalidVersion {
            input: input.to_string(),
        };
        if !is_valid_semver(input) {
            return Err(invalid());
        }

        let mut components = input[1..].split('.').map(str::parse::<u64>);
        let mut next = || components.next().transpose().map_err(|_| invalid());
        let major = next()?.ok_or_else(invalid)?;
        let minor = next()?.ok_or_else(invalid)?;
        let patch = next()?.unwrap_or(0);

        Ok(Self {
            tag: input.to_string(),
            version: Version::new(major, minor, patch),
        })
    }
}

impl PartialEq for VersionString {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for VersionString {}

impl PartialOrd for VersionString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }
}

impl Hash for VersionString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

/// Leading `v`, then two or three dot-separated runs of ASCII digits.
#[must_use]
pub fn is_valid_semver(input: &str) -> bool {
    let Some(rest) = input.strip_prefix('v') else {
        return false;
    };
    let segments: Vec<&str> = rest.split('.').collect();
    (2..=3).contains(&segments.len())
        && segments
            .iter()
            .all(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

/// Every valid version published for `prefix` in a checksums manifest.
///
/// Lines that do not mention `<prefix>_v`, or whose version token does not
/// validate, are skipped.
pub fn versions_in_manifest<'a>(
    manifest: &'a str,
    prefix: &'a str,
) -> impl Iterator<Item = VersionString> + 'a {
    let marker = format!("{prefix}_v");
    manifest.lines().filter_map(move |line| {
        let start = line.find(&marker)? + prefix.len() + 1;
        let token = line[start..].split('_').next()?;
        token.parse().ok()
    })
}

/// Pick the highest version published for `prefix`.
///
/// # Errors
/// Returns [`ResolveError::NoVersionsFound`] when the manifest holds no
/// valid version for the prefix.
pub fn resolve_latest(manifest: &str, prefix: &str) -> Result<VersionString, ResolveError> {
    versions_in_manifest(manifest, prefix)
        .max()
        .ok_or_else(|| ResolveError::NoVersionsFound {
            prefix: prefix.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(tag: &str) -> VersionString {
        tag.parse().expect("test version should parse")
    }

    #[test]
    fn semver_validation() {
        assert!(is_valid_semver("v1.2"));
        assert!(is_valid_semver("v1.2.3"));
        assert!(is_valid_semver("v0.0.10"));
        assert!(!is_valid_semver("1.2.3"));
        assert!(!is_valid_semver("v1"));
        assert!(!is_valid_semver("v1..2"));
        assert!(!is_valid_semver("v1.2.3.4"));
        assert!(!is_valid_semver("v1.2-beta"));
        assert!(!is_valid_semver("v1.2."));
        assert!(!is_valid_semver("V1.2.3"));
    }

    #[test]
    fn missing_patch_compares_as_zero() {
        assert_eq!(version("v1.2"), version("v1.2.0"));
        assert!(version("v1.2.1") > version("v1.2"));
        assert!(version("v2.0") > version("v1.99.99"));
        assert_eq!(version("v1.2").to_string(), "v1.2");
    }

    #[test]
    fn overflowing_components_are_rejected() {
        assert!("v99999999999999999999999.1".parse::<VersionString>().is_err());
    }

    #[test]
    fn resolve_latest_orders_numerically() {
        let manifest = "\
1111  foo_v1.2.0_linux_amd64.tar.gz
2222  foo_v1.10.0_linux_amd64.tar.gz
3333  foo_v1.9.9_windows_amd64.zip
noise line without any version
4444  bar_v9.9.9_linux_amd64.tar.gz
";
        let latest = resolve_latest(manifest, "foo").expect("foo should resolve");
        assert_eq!(latest.as_str(), "v1.10.0");
    }

    #[test]
    fn resolve_latest_skips_malformed_entries() {
        let manifest = "\
1111  foo_vnext_linux_amd64.tar.gz
2222  foo_v1..2_linux_amd64.tar.gz
3333  foo_v3_linux_amd64.tar.gz
4444  foo_v0.4_linux_amd64.tar.gz
5555  foo_v1.2.3.4_linux_amd64.tar.gz
";
        let latest = resolve_latest(manifest, "foo").expect("foo should resolve");
        assert_eq!(latest.as_str(), "v0.4");
    }

    #[test]
    fn resolve_latest_fails_without_matching_versions() {
        let error = resolve_latest("1111  bar_v1.0.0_linux_amd64.tar.gz\n", "foo")
            .expect_err("foo has no releases");
        assert_eq!(
            error,
            ResolveError::NoVersionsFound {
                prefix: "foo".to_string()
            }
        );
        assert!(resolve_latest("", "foo").is_err());
    }

    #[test]
    fn versions_in_manifest_handles_crlf_lines() {
        let manifest = "1111  foo_v1.0.0_linux_amd64.tar.gz\r\n2222  foo_v1.1_darwin_arm64.tar.gz\r\n";
        let versions: Vec<String> = versions_in_manifest(manifest, "foo")
            .map(|version| version.to_string())
            .collect();
        assert_eq!(versions, ["v1.0.0", "v1.1"]);
    }
}
