use std::path::{Path, PathBuf};

use log::{error, info};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::apply::{self, ApplyError, ElevatedInstaller};
use crate::archive::{self, ArchiveError};
use crate::fetch::{FetchError, FetchedRelease, ReleaseChannel, ReleaseClient, VersionRequest};

#[derive(Debug, Clone)]
pub enum UpdateProgress {
    Resolving,
    Downloading { downloaded: u64, total: u64 },
    Verifying,
    Extracting,
    Applying,
    Complete(ApplyOutcome),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The application binary on disk was replaced. The running process keeps
    /// the old image until it is restarted.
    RestartRequired { version: String },
    HelperInstalled { version: String, path: PathBuf },
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl UpdateError {
    /// Whether the caller can fix this by asking the user for something.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Apply(ApplyError::ElevationRequired { .. }))
    }

    /// The previous binary could not be restored after a failed apply.
    #[must_use]
    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, Self::Apply(ApplyError::RollbackFailed { .. }))
    }
}

/// Fetch, unpack and install releases of the app and its helper.
#[derive(Debug, Clone)]
pub struct Updater {
    client: ReleaseClient,
    application: ReleaseChannel,
    helper: ReleaseChannel,
    application_binary: Option<PathBuf>,
    helper_binary: PathBuf,
}

impl Updater {
    #[must_use]
    pub fn new(client: ReleaseClient, helper_binary: PathBuf) -> Self {
        Self {
            client,
            application: ReleaseChannel::application(),
            helper: ReleaseChannel::helper(),
            application_binary: None,
            helper_binary,
        }
    }

    #[must_use]
    pub fn with_application_channel(mut self, channel: ReleaseChannel) -> Self {
        self.application = channel;
        self
    }

    #[must_use]
    pub fn with_helper_channel(mut self, channel: ReleaseChannel) -> Self {
        self.helper = channel;
        self
    }

    /// Replace this binary instead of the running executable.
    #[must_use]
    pub fn with_application_binary(mut self, path: PathBuf) -> Self {
        self.application_binary = Some(path);
        self
    }

    #[must_use]
    pub fn helper_binary(&self) -> &Path {
        &self.helper_binary
    }

    /// Download `version` of the app and swap it in for the current binary.
    ///
    /// The running process is never restarted.
    ///
    /// # Errors
    /// Returns an error when fetching, extracting or applying fails.
    /// [`UpdateError::is_rollback_failure`] marks the case where the previous
    /// binary could not be restored.
    pub async fn update_application(
        &self,
        version: &VersionRequest,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<ApplyOutcome, UpdateError> {
        let result = self.run_application_update(version, progress).await;
        report(result, progress).await
    }

    /// Download `version` of the helper and install it at its fixed path.
    ///
    /// # Errors
    /// Returns [`ApplyError::ElevationRequired`] before any network request
    /// when this platform installs through an elevated copy and no installer
    /// was given. Otherwise returns fetch, extract or install errors.
    pub async fn install_helper(
        &self,
        version: &VersionRequest,
        elevated: Option<&dyn ElevatedInstaller>,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<ApplyOutcome, UpdateError> {
        let result = self.run_helper_install(version, elevated, progress).await;
        report(result, progress).await
    }

    async fn run_application_update(
        &self,
        version: &VersionRequest,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<ApplyOutcome, UpdateError> {
        let target = match &self.application_binary {
            Some(path) => path.clone(),
            None => apply::running_executable()?,
        };

        let release = self.client.fetch(&self.application, version, progress).await?;
        let binary = self.extract(&release, self.application.product(), progress).await?;

        let _ = progress.send(UpdateProgress::Applying).await;
        if self.application_binary.is_some() {
            apply::replace_binary(&target, &binary)?;
        } else {
            apply::replace_running_executable(&target, &binary)?;
        }
        info!("Application updated to {}", release.version);

        Ok(ApplyOutcome::RestartRequired {
            version: release.version,
        })
    }

    async fn run_helper_install(
        &self,
        version: &VersionRequest,
        elevated: Option<&dyn ElevatedInstaller>,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<ApplyOutcome, UpdateError> {
        let mode = self.client.platform().helper_install_mode();
        if mode == domour_platform::HelperInstallMode::ElevatedCopy && elevated.is_none() {
            return Err(ApplyError::ElevationRequired {
                target: self.helper_binary.clone(),
            }
            .into());
        }

        let release = self.client.fetch(&self.helper, version, progress).await?;
        let binary = self.extract(&release, self.helper.product(), progress).await?;

        let _ = progress.send(UpdateProgress::Applying).await;
        apply::install_helper_binary(&binary, &self.helper_binary, mode, elevated).await?;

        Ok(ApplyOutcome::HelperInstalled {
            version: release.version,
            path: self.helper_binary.clone(),
        })
    }

    async fn extract(
        &self,
        release: &FetchedRelease,
        product: &str,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<Vec<u8>, ArchiveError> {
        let _ = progress.send(UpdateProgress::Extracting).await;
        let entry = self.client.platform().executable_name(product);
        archive::extract_entry(&release.bytes, &entry, release.format)
    }
}

async fn report(
    result: Result<ApplyOutcome, UpdateError>,
    progress: &mpsc::Sender<UpdateProgress>,
) -> Result<ApplyOutcome, UpdateError> {
    match &result {
        Ok(outcome) => {
            let _ = progress.send(UpdateProgress::Complete(outcome.clone())).await;
        }
        Err(update_error) => {
            error!("Update failed: {update_error}");
            let _ = progress
                .send(UpdateProgress::Failed(update_error.to_string()))
                .await;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::apply::ApplyError;
    use crate::archive::ArchiveError;

    use super::UpdateError;

    #[test]
    fn only_elevation_is_actionable() {
        let elevation = UpdateError::from(ApplyError::ElevationRequired {
            target: PathBuf::from("/usr/local/bin/vlink"),
        });
        let missing = UpdateError::from(ArchiveError::EntryNotFound {
            entry: "vlink".to_string(),
            format: domour_platform::ArchiveFormat::TarGz,
        });

        assert!(elevation.is_actionable());
        assert!(!missing.is_actionable());
        assert!(!elevation.is_rollback_failure());
    }

    #[test]
    fn rollback_failure_is_flagged() {
        let error = UpdateError::from(ApplyError::RollbackFailed {
            target: PathBuf::from("/opt/domour/domour-copilot"),
            apply_error: std::io::Error::other("disk full"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });

        assert!(error.is_rollback_failure());
        assert!(!error.is_actionable());
    }
}
