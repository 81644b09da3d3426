use sha2::{Digest, Sha256};

/// Name of the checksums manifest published next to every release.
pub const MANIFEST_FILE: &str = "checksums.txt";

/// One `<sha256>  <file name>` line of a checksums manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub checksum: String,
    pub file_name: String,
}

impl ManifestEntry {
    /// Parse a `sha256sum`-style line. Binary-mode markers (`*`) and leading
    /// `./` on the file name are ignored.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let checksum = parts.next()?;
        let file_name = parts
            .next()?
            .trim_start_matches('*')
            .trim_start_matches("./");
        if file_name.is_empty() {
            return None;
        }
        Some(Self {
            checksum: checksum.to_ascii_lowercase(),
            file_name: file_name.to_string(),
        })
    }
}

pub fn entries(manifest: &str) -> impl Iterator<Item = ManifestEntry> + '_ {
    manifest.lines().filter_map(ManifestEntry::parse_line)
}

#[must_use]
pub fn expected_checksum(manifest: &str, file_name: &str) -> Option<String> {
    entries(manifest)
        .find(|entry| entry.file_name == file_name)
        .map(|entry| entry.checksum)
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
