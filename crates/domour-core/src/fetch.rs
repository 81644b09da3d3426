use std::time::Duration;

use domour_platform::{ArchiveFormat, Platform};
use futures_util::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::manifest::{self, MANIFEST_FILE};
use crate::updater::UpdateProgress;
use crate::version::{self, ResolveError, VersionString};

const MANIFEST_TIMEOUT: Duration = Duration::from_secs(20);
const ARCHIVE_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const APPLICATION_BASE_URL: &str = "https://qtopie.space/downloads/domour/";
const APPLICATION_PRODUCT: &str = "domour-copilot";
const HELPER_BASE_URL: &str = "https://qtopie.space/downloads/vlink/";
const HELPER_PRODUCT: &str = "vlink";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("{context}: {source}")]
    Network {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context} failed with HTTP {status} for {url}")]
    HttpStatus {
        context: &'static str,
        url: String,
        status: reqwest::StatusCode,
    },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("unsupported platform for {product}: {platform}")]
    UnsupportedPlatform { product: String, platform: Platform },
    #[error("checksum mismatch for {file_name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file_name: String,
        expected: String,
        actual: String,
    },
}

impl FetchError {
    fn network(context: &'static str, source: reqwest::Error) -> Self {
        Self::Network { context, source }
    }
}

/// Where a product's releases are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseChannel {
    base_url: String,
    product: String,
}

impl ReleaseChannel {
    #[must_use]
    pub fn new(base_url: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            product: product.into(),
        }
    }

    /// Releases of the desktop app itself.
    #[must_use]
    pub fn application() -> Self {
        Self::new(APPLICATION_BASE_URL, APPLICATION_PRODUCT)
    }

    /// Releases of the vlink helper.
    #[must_use]
    pub fn helper() -> Self {
        Self::new(HELPER_BASE_URL, HELPER_PRODUCT)
    }

    #[must_use]
    pub fn product(&self) -> &str {
        &self.product
    }

    #[must_use]
    pub fn manifest_url(&self) -> String {
        self.file_url(MANIFEST_FILE)
    }

    #[must_use]
    pub fn file_url(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.base_url.trim_end_matches('/'))
    }
}

/// Which release to fetch. Empty input and `latest` both mean the newest
/// release listed in the channel's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRequest {
    Latest,
    Exact(String),
}

impl VersionRequest {
    #[must_use]
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "" | "latest" => Self::Latest,
            version => Self::Exact(version.to_string()),
        }
    }
}

/// `<product>_<version>_<os>_<arch>.<ext>`, or `None` when the platform
/// cannot be named.
#[must_use]
pub fn archive_file_name(product: &str, version: &str, os: &str, arch: &str) -> Option<String> {
    let platform = Platform::new(os, arch);
    if !platform.is_supported() {
        return None;
    }
    let extension = platform.archive_format().extension();
    Some(format!("{product}_{version}_{os}_{arch}.{extension}"))
}

/// A downloaded release archive, not yet unpacked.
#[derive(Debug, Clone)]
pub struct FetchedRelease {
    pub version: String,
    pub file_name: String,
    pub format: ArchiveFormat,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReleaseClient {
    http: reqwest::Client,
    platform: Platform,
}

impl ReleaseClient {
    /// Client for the platform this binary was built for.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, FetchError> {
        Self::for_platform(Platform::current())
    }

    /// Client that downloads archives built for `platform`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn for_platform(platform: Platform) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(format!("domour/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::ClientBuild)?;
        Ok(Self::with_client(http, platform))
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client, platform: Platform) -> Self {
        Self { http, platform }
    }

    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Download the channel manifest and pick its newest version.
    ///
    /// # Errors
    /// Returns an error when the manifest cannot be downloaded or lists no
    /// valid version for the channel's product.
    pub async fn resolve_latest(
        &self,
        channel: &ReleaseChannel,
    ) -> Result<(VersionString, String), FetchError> {
        let manifest = self.fetch_manifest(channel).await?;
        let latest = version::resolve_latest(&manifest, channel.product())?;
        info!("Latest {} release is {latest}", channel.product());
        Ok((latest, manifest))
    }

    /// Download the release archive for this client's platform.
    ///
    /// # Errors
    /// Returns an error on network failure, non-200 responses, unresolvable
    /// versions, unsupported platforms, or a checksum mismatch against the
    /// manifest.
    pub async fn fetch(
        &self,
        channel: &ReleaseChannel,
        request: &VersionRequest,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<FetchedRelease, FetchError> {
        let (version, manifest) = match request {
            VersionRequest::Latest => {
                let _ = progress.send(UpdateProgress::Resolving).await;
                let (latest, manifest) = self.resolve_latest(channel).await?;
                (latest.to_string(), Some(manifest))
            }
            VersionRequest::Exact(version) => (version.clone(), None),
        };

        let file_name = archive_file_name(
            channel.product(),
            &version,
            self.platform.os(),
            self.platform.arch(),
        )
        .ok_or_else(|| FetchError::UnsupportedPlatform {
            product: channel.product().to_string(),
            platform: self.platform.clone(),
        })?;

        let url = channel.file_url(&file_name);
        info!("Downloading {url}");
        let bytes = self.download_archive(&url, progress).await?;

        if let Some(manifest) = manifest {
            let _ = progress.send(UpdateProgress::Verifying).await;
            verify_checksum(&manifest, &file_name, &bytes)?;
        } else {
            debug!("No manifest fetched for {file_name}, skipping checksum verification");
        }

        Ok(FetchedRelease {
            version,
            file_name,
            format: self.platform.archive_format(),
            bytes,
        })
    }

    async fn fetch_manifest(&self, channel: &ReleaseChannel) -> Result<String, FetchError> {
        let url = channel.manifest_url();
        debug!("Fetching release manifest {url}");
        let response = self
            .http
            .get(&url)
            .timeout(MANIFEST_TIMEOUT)
            .send()
            .await
            .map_err(|error| FetchError::network("failed to download checksums", error))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::HttpStatus {
                context: "checksums download",
                url,
                status: response.status(),
            });
        }

        response
            .text()
            .await
            .map_err(|error| FetchError::network("failed to read checksums", error))
    }

    async fn download_archive(
        &self,
        url: &str,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<Vec<u8>, FetchError> {
        let response = self
            .http
            .get(url)
            .timeout(ARCHIVE_TIMEOUT)
            .send()
            .await
            .map_err(|error| FetchError::network("download request failed", error))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::HttpStatus {
                context: "archive download",
                url: url.to_string(),
                status: response.status(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        let mut bytes = Vec::with_capacity(usize::try_from(total).unwrap_or_default());
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| FetchError::network("download stream error", error))?;
            bytes.extend_from_slice(&chunk);
            let _ = progress
                .send(UpdateProgress::Downloading {
                    downloaded: bytes.len() as u64,
                    total,
                })
                .await;
        }

        info!("Download complete: {} bytes", bytes.len());
        Ok(bytes)
    }
}

fn verify_checksum(manifest: &str, file_name: &str, bytes: &[u8]) -> Result<(), FetchError> {
    let Some(expected) = manifest::expected_checksum(manifest, file_name) else {
        warn!("No checksum entry for {file_name}; continuing without verification");
        return Ok(());
    };

    let actual = manifest::sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(&expected) {
        info!("Checksum verified for {file_name}");
        Ok(())
    } else {
        Err(FetchError::ChecksumMismatch {
            file_name: file_name.to_string(),
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchError, ReleaseChannel, VersionRequest, archive_file_name, verify_checksum};

    #[test]
    fn archive_file_name_depends_on_os() {
        assert_eq!(
            archive_file_name("x", "v2.0.0", "windows", "amd64").as_deref(),
            Some("x_v2.0.0_windows_amd64.zip")
        );
        assert_eq!(
            archive_file_name("x", "v2.0.0", "linux", "amd64").as_deref(),
            Some("x_v2.0.0_linux_amd64.tar.gz")
        );
        assert_eq!(
            archive_file_name("vlink", "v1.3", "darwin", "arm64").as_deref(),
            Some("vlink_v1.3_darwin_arm64.tar.gz")
        );
        assert!(archive_file_name("x", "v2.0.0", "", "amd64").is_none());
    }

    #[test]
    fn version_request_treats_blank_and_latest_alike() {
        assert_eq!(VersionRequest::parse(""), VersionRequest::Latest);
        assert_eq!(VersionRequest::parse("  latest "), VersionRequest::Latest);
        assert_eq!(
            VersionRequest::parse(" v1.2.0 "),
            VersionRequest::Exact("v1.2.0".to_string())
        );
    }

    #[test]
    fn channel_urls_tolerate_trailing_slash() {
        let with_slash = ReleaseChannel::new("https://example.test/vlink/", "vlink");
        let without = ReleaseChannel::new("https://example.test/vlink", "vlink");

        assert_eq!(
            with_slash.manifest_url(),
            "https://example.test/vlink/checksums.txt"
        );
        assert_eq!(with_slash.manifest_url(), without.manifest_url());
        assert_eq!(
            ReleaseChannel::helper().file_url("vlink_v1.0_linux_amd64.tar.gz"),
            "https://qtopie.space/downloads/vlink/vlink_v1.0_linux_amd64.tar.gz"
        );
    }

    #[test]
    fn verify_checksum_reports_mismatch() {
        let manifest = "0000000000000000000000000000000000000000000000000000000000000000  a.tar.gz\n";

        let error = verify_checksum(manifest, "a.tar.gz", b"abc").expect_err("digest differs");
        assert!(matches!(error, FetchError::ChecksumMismatch { .. }));
        assert!(verify_checksum(manifest, "b.tar.gz", b"abc").is_ok());
    }
}
