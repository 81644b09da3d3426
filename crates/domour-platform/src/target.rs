use std::fmt;

/// Container format of a release archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How a downloaded helper binary is moved to its install location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperInstallMode {
    /// Copy into a system path through an elevated `install` invocation.
    ElevatedCopy,
    /// Rename from a temp file on the same volume as the target.
    SameVolumeRename,
}

/// Release target in the naming scheme used by published archives
/// (`linux`/`darwin`/`windows`, `amd64`/`arm64`/...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    os: String,
    arch: String,
}

impl Platform {
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        Self::new(
            release_os_name(std::env::consts::OS),
            release_arch_name(std::env::consts::ARCH),
        )
    }

    #[must_use]
    pub fn os(&self) -> &str {
        &self.os
    }

    #[must_use]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Any pair the runtime reports is publishable; only empty identifiers
    /// cannot be mapped to an archive name.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        !self.os.trim().is_empty() && !self.arch.trim().is_empty()
    }

    #[must_use]
    pub fn archive_format(&self) -> ArchiveFormat {
        if self.is_windows() {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::TarGz
        }
    }

    #[must_use]
    pub fn helper_install_mode(&self) -> HelperInstallMode {
        if self.is_windows() {
            HelperInstallMode::SameVolumeRename
        } else {
            HelperInstallMode::ElevatedCopy
        }
    }

    /// File name of `name` as shipped inside a release archive.
    #[must_use]
    pub fn executable_name(&self, name: &str) -> String {
        if self.is_windows() {
            format!("{name}.exe")
        } else {
            name.to_string()
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

fn release_os_name(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn release_arch_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "arm",
        "powerpc64" => "ppc64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{ArchiveFormat, HelperInstallMode, Platform, release_arch_name, release_os_name};

    #[test]
    fn windows_uses_zip_and_rename() {
        let platform = Platform::new("windows", "amd64");

        assert_eq!(platform.archive_format(), ArchiveFormat::Zip);
        assert_eq!(
            platform.helper_install_mode(),
            HelperInstallMode::SameVolumeRename
        );
        assert_eq!(platform.executable_name("vlink"), "vlink.exe");
    }

    #[test]
    fn unix_uses_tarball_and_elevated_copy() {
        for os in ["linux", "darwin", "freebsd"] {
            let platform = Platform::new(os, "arm64");
            assert_eq!(platform.archive_format(), ArchiveFormat::TarGz);
            assert_eq!(
                platform.helper_install_mode(),
                HelperInstallMode::ElevatedCopy
            );
            assert_eq!(platform.executable_name("vlink"), "vlink");
        }
    }

    #[test]
    fn runtime_names_map_to_release_names() {
        assert_eq!(release_os_name("macos"), "darwin");
        assert_eq!(release_os_name("linux"), "linux");
        assert_eq!(release_arch_name("x86_64"), "amd64");
        assert_eq!(release_arch_name("aarch64"), "arm64");
        assert_eq!(release_arch_name("riscv64"), "riscv64");
    }

    #[test]
    fn empty_identifiers_are_unsupported() {
        assert!(Platform::new("linux", "amd64").is_supported());
        assert!(!Platform::new("", "amd64").is_supported());
        assert!(!Platform::new("linux", " ").is_supported());
        assert!(Platform::current().is_supported());
    }
}
