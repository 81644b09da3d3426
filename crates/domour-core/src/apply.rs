use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use domour_platform::{HelperInstallMode, HideWindow};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const BACKUP_SUFFIX: &str = "old";
const INSTALL_MODE: &str = "0755";

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("administrator password is required to install {}", target.display())]
    ElevationRequired { target: PathBuf },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to replace {}: {source}", target.display())]
    Replace {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "update failed ({apply_error}) and rollback failed: {source}; {} may be missing",
        target.display()
    )]
    RollbackFailed {
        target: PathBuf,
        apply_error: std::io::Error,
        #[source]
        source: std::io::Error,
    },
    #[error("elevated install failed: {details}")]
    Elevated { details: String },
}

impl ApplyError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }
}

/// Password handed to `sudo -S`. Never printed.
#[derive(Clone)]
pub struct ElevationCredential(String);

impl ElevationCredential {
    /// `None` for blank input, so a missing password cannot reach `sudo`.
    #[must_use]
    pub fn new(secret: &str) -> Option<Self> {
        let trimmed = secret.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ElevationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ElevationCredential(<redacted>)")
    }
}

/// Copies a staged file into a location the current user cannot write.
#[async_trait]
pub trait ElevatedInstaller: Send + Sync {
    async fn install(&self, source: &Path, target: &Path) -> Result<(), ApplyError>;
}

/// Runs `sudo -S install -m 0755 <source> <target>`, feeding the password on
/// stdin.
#[derive(Debug, Clone)]
pub struct SudoInstaller {
    credential: ElevationCredential,
}

impl SudoInstaller {
    #[must_use]
    pub fn new(credential: ElevationCredential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl ElevatedInstaller for SudoInstaller {
    async fn install(&self, source: &Path, target: &Path) -> Result<(), ApplyError> {
        info!("Installing {} with sudo", target.display());
        let mut child = tokio::process::Command::new("sudo")
            .arg("-S")
            .args(["install", "-m", INSTALL_MODE])
            .arg(source)
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .hide_window()
            .spawn()
            .map_err(|error| ApplyError::io("failed to run sudo", error))?;

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{}\n", self.credential.expose());
            if let Err(error) = stdin.write_all(line.as_bytes()).await {
                debug!("sudo closed stdin early: {error}");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|error| ApplyError::io("failed to wait for sudo", error))?;
        if output.status.success() {
            return Ok(());
        }

        let mut details = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if details.is_empty() {
            details = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        if details.is_empty() {
            details = output.status.to_string();
        }
        Err(ApplyError::Elevated { details })
    }
}

/// Path the running executable lives at.
///
/// # Errors
/// Returns an error if the current executable cannot be located.
pub fn running_executable() -> Result<PathBuf, ApplyError> {
    let exe = std::env::current_exe()
        .map_err(|error| ApplyError::io("failed to get current executable", error))?;

    // After a replace, /proc/self/exe points at the unlinked inode and the
    // path gains a " (deleted)" suffix.
    #[cfg(target_os = "linux")]
    let exe = {
        let path = exe.to_string_lossy();
        match path.strip_suffix(" (deleted)") {
            Some(stripped) => PathBuf::from(stripped),
            None => exe,
        }
    };

    Ok(exe)
}

/// Sibling path the previous binary is parked at during a swap.
#[must_use]
pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    target.with_file_name(name)
}

/// Replace `target` with `contents`.
///
/// The new binary is staged next to the target and renamed over it, so the
/// path always holds either the old or the new binary. The previous binary is
/// hard-linked to its backup path first so a failed swap can be undone.
///
/// # Errors
/// Returns [`ApplyError::Replace`] when the swap fails and the original is
/// still in place, and [`ApplyError::RollbackFailed`] when it could not be
/// restored.
pub fn replace_binary(target: &Path, contents: &[u8]) -> Result<(), ApplyError> {
    let staged = stage_beside(target, contents)?;
    commit_with_backup(target, move |target| {
        staged.persist(target).map(|_| ()).map_err(|error| error.error)
    })
}

/// Replace the running executable at `exe` with `contents` via
/// `self_replace`, keeping the same backup and rollback guarantees as
/// [`replace_binary`].
///
/// # Errors
/// Same as [`replace_binary`].
pub fn replace_running_executable(exe: &Path, contents: &[u8]) -> Result<(), ApplyError> {
    let staged = stage_beside(exe, contents)?;
    info!("Replacing binary via self-replace");
    commit_with_backup(exe, |_| self_replace::self_replace(staged.path()))
}

fn stage_beside(target: &Path, contents: &[u8]) -> Result<tempfile::NamedTempFile, ApplyError> {
    let dir = target
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staged = stage_file(dir, ".domour-staged-", contents)?;
    copy_permissions(target, staged.path());
    Ok(staged)
}

fn commit_with_backup<F>(target: &Path, install: F) -> Result<(), ApplyError>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    let backup = backup_path(target);
    if let Err(error) = std::fs::remove_file(&backup)
        && error.kind() != std::io::ErrorKind::NotFound
    {
        return Err(ApplyError::io_with_path(
            "failed to remove old backup",
            &backup,
            &error,
        ));
    }

    let had_original = target.exists();
    if had_original {
        link_or_copy(target, &backup)
            .map_err(|error| ApplyError::io_with_path("failed to back up", target, &error))?;
    }

    match install(target) {
        Ok(()) => {
            if had_original {
                discard_backup(&backup);
            }
            info!("Replaced {}", target.display());
            Ok(())
        }
        Err(apply_error) if had_original => {
            warn!("Apply failed: {apply_error}");
            if target.exists() {
                discard_backup(&backup);
                return Err(ApplyError::Replace {
                    target: target.to_path_buf(),
                    source: apply_error,
                });
            }
            warn!("{} is missing, restoring backup", target.display());
            match std::fs::rename(&backup, target) {
                Ok(()) => Err(ApplyError::Replace {
                    target: target.to_path_buf(),
                    source: apply_error,
                }),
                Err(source) => Err(ApplyError::RollbackFailed {
                    target: target.to_path_buf(),
                    apply_error,
                    source,
                }),
            }
        }
        Err(source) => Err(ApplyError::Replace {
            target: target.to_path_buf(),
            source,
        }),
    }
}

fn link_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::hard_link(from, to) {
        Ok(()) => Ok(()),
        Err(error) => {
            debug!("Hard link to {} failed, copying: {error}", to.display());
            std::fs::copy(from, to).map(|_| ())
        }
    }
}

fn discard_backup(backup: &Path) {
    if let Err(error) = std::fs::remove_file(backup) {
        // A running Windows image cannot be deleted, only renamed.
        debug!("Leaving {} for later cleanup: {error}", backup.display());
    }
}

/// Remove the backup a previous application update could not delete.
pub fn cleanup_stale_backup() {
    let Ok(exe) = running_executable() else {
        return;
    };
    let backup = backup_path(&exe);
    if backup.exists() {
        info!("Cleaning up previous binary: {}", backup.display());
        if let Err(error) = std::fs::remove_file(&backup) {
            debug!("Failed to remove {}: {error}", backup.display());
        }
    }
}

/// Install a helper binary at `target` using the platform's install mode.
///
/// # Errors
/// Returns [`ApplyError::ElevationRequired`] when the mode needs an elevated
/// installer and none was given, or an I/O / install error otherwise.
pub async fn install_helper_binary(
    contents: &[u8],
    target: &Path,
    mode: HelperInstallMode,
    elevated: Option<&dyn ElevatedInstaller>,
) -> Result<(), ApplyError> {
    match mode {
        HelperInstallMode::ElevatedCopy => {
            let installer = elevated.ok_or_else(|| ApplyError::ElevationRequired {
                target: target.to_path_buf(),
            })?;
            let staged = stage_file(&std::env::temp_dir(), "vlink-", contents)?;
            installer.install(staged.path(), target).await?;
            info!("Installed helper at {}", target.display());
            Ok(())
        }
        HelperInstallMode::SameVolumeRename => {
            let dir = target.parent().ok_or_else(|| ApplyError::Replace {
                target: target.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "target has no parent directory",
                ),
            })?;
            std::fs::create_dir_all(dir).map_err(|error| {
                ApplyError::io_with_path("failed to create directory", dir, &error)
            })?;
            let staged = stage_file(dir, "vlink-", contents)?;
            staged
                .persist(target)
                .map_err(|error| ApplyError::Replace {
                    target: target.to_path_buf(),
                    source: error.error,
                })?;
            info!("Installed helper at {}", target.display());
            Ok(())
        }
    }
}

fn stage_file(
    dir: &Path,
    prefix: &str,
    contents: &[u8],
) -> Result<tempfile::NamedTempFile, ApplyError> {
    let mut staged = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile_in(dir)
        .map_err(|error| ApplyError::io_with_path("failed to create temp file", dir, &error))?;
    staged
        .write_all(contents)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|error| ApplyError::io("failed to write temp file", error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = staged
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o755));
    }

    Ok(staged)
}

fn copy_permissions(from: &Path, to: &Path) {
    if let Ok(metadata) = std::fs::metadata(from) {
        let _ = std::fs::set_permissions(to, metadata.permissions());
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use domour_platform::HelperInstallMode;

    use super::{
        ApplyError, ElevatedInstaller, ElevationCredential, backup_path, cleanup_stale_backup,
        commit_with_backup, install_helper_binary, replace_binary, running_executable,
    };

    #[derive(Default)]
    struct RecordingInstaller {
        installed: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ElevatedInstaller for RecordingInstaller {
        async fn install(&self, source: &Path, target: &Path) -> Result<(), ApplyError> {
            let contents = std::fs::read(source).expect("staged file should exist");
            std::fs::write(target, &contents).expect("target should be writable");
            self.installed
                .lock()
                .expect("installer lock should not be poisoned")
                .push(contents);
            Ok(())
        }
    }

    #[test]
    fn replace_binary_swaps_contents_and_removes_backup() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("domour-copilot");
        std::fs::write(&target, b"old").expect("original should be written");

        replace_binary(&target, b"new").expect("replace should succeed");

        assert_eq!(std::fs::read(&target).expect("target readable"), b"new");
        assert!(!backup_path(&target).exists());
    }

    #[test]
    fn replace_binary_creates_missing_target() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("domour-copilot");

        replace_binary(&target, b"fresh").expect("replace should succeed");

        assert_eq!(std::fs::read(&target).expect("target readable"), b"fresh");
    }

    #[cfg(unix)]
    #[test]
    fn replace_binary_keeps_executable_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("domour-copilot");
        std::fs::write(&target, b"old").expect("original should be written");
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o750))
            .expect("permissions should be set");

        replace_binary(&target, b"new").expect("replace should succeed");

        let mode = std::fs::metadata(&target)
            .expect("metadata readable")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn original_stays_in_place_until_the_swap() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("domour-copilot");
        std::fs::write(&target, b"old").expect("original should be written");

        commit_with_backup(&target, |target| {
            assert_eq!(std::fs::read(target)?, b"old");
            assert_eq!(std::fs::read(backup_path(target))?, b"old");
            std::fs::write(target, b"new")
        })
        .expect("install should succeed");

        assert_eq!(std::fs::read(&target).expect("target readable"), b"new");
        assert!(!backup_path(&target).exists());
    }

    #[test]
    fn failed_install_keeps_original() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("domour-copilot");
        std::fs::write(&target, b"old").expect("original should be written");

        let error = commit_with_backup(&target, |_| Err(std::io::Error::other("disk full")))
            .expect_err("install fails");

        assert!(matches!(error, ApplyError::Replace { .. }));
        assert_eq!(std::fs::read(&target).expect("target readable"), b"old");
        assert!(!backup_path(&target).exists());
    }

    #[test]
    fn install_that_removes_target_is_rolled_back() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("domour-copilot");
        std::fs::write(&target, b"old").expect("original should be written");

        let error = commit_with_backup(&target, |target| {
            std::fs::remove_file(target)?;
            Err(std::io::Error::other("disk full"))
        })
        .expect_err("install fails");

        assert!(matches!(error, ApplyError::Replace { .. }));
        assert_eq!(std::fs::read(&target).expect("target readable"), b"old");
    }

    #[test]
    fn lost_backup_is_reported_as_rollback_failure() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("domour-copilot");
        std::fs::write(&target, b"old").expect("original should be written");

        let error = commit_with_backup(&target, |target| {
            std::fs::remove_file(backup_path(target))?;
            std::fs::remove_file(target)?;
            Err(std::io::Error::other("disk full"))
        })
        .expect_err("install fails");

        assert!(matches!(error, ApplyError::RollbackFailed { .. }));
        assert!(error.to_string().contains("rollback failed"));
    }

    #[test]
    fn stale_backup_beside_the_executable_is_removed() {
        let exe = running_executable().expect("test binary has a path");
        let backup = backup_path(&exe);
        std::fs::write(&backup, b"previous").expect("backup should be written");

        cleanup_stale_backup();

        assert!(!backup.exists());
    }

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/opt/domour/domour-copilot.exe")),
            Path::new("/opt/domour/domour-copilot.exe.old")
        );
    }

    #[test]
    fn credential_rejects_blank_and_hides_secret() {
        assert!(ElevationCredential::new("   ").is_none());
        let credential = ElevationCredential::new(" hunter2 ").expect("non-blank");
        assert_eq!(credential.expose(), "hunter2");
        assert!(!format!("{credential:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn elevated_copy_requires_installer() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("vlink");

        let error =
            install_helper_binary(b"helper", &target, HelperInstallMode::ElevatedCopy, None)
                .await
                .expect_err("installer is missing");

        assert!(matches!(error, ApplyError::ElevationRequired { .. }));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn elevated_copy_hands_staged_file_to_installer() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("vlink");
        let installer = RecordingInstaller::default();

        install_helper_binary(
            b"helper",
            &target,
            HelperInstallMode::ElevatedCopy,
            Some(&installer),
        )
        .await
        .expect("install should succeed");

        assert_eq!(std::fs::read(&target).expect("target readable"), b"helper");
        assert_eq!(
            installer
                .installed
                .lock()
                .expect("installer lock should not be poisoned")
                .as_slice(),
            [b"helper".to_vec()]
        );
    }

    #[tokio::test]
    async fn rename_mode_without_parent_is_not_an_elevation_error() {
        let error = install_helper_binary(
            b"helper",
            Path::new("/"),
            HelperInstallMode::SameVolumeRename,
            None,
        )
        .await
        .expect_err("root has no parent directory");

        assert!(matches!(error, ApplyError::Replace { .. }));
        assert!(error.to_string().contains("no parent directory"));
    }

    #[tokio::test]
    async fn rename_mode_creates_directory_and_replaces_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join(".vlink").join("vlink.exe");

        install_helper_binary(b"v1", &target, HelperInstallMode::SameVolumeRename, None)
            .await
            .expect("first install should succeed");
        install_helper_binary(b"v2", &target, HelperInstallMode::SameVolumeRename, None)
            .await
            .expect("second install should succeed");

        assert_eq!(std::fs::read(&target).expect("target readable"), b"v2");
        let leftovers = std::fs::read_dir(target.parent().expect("parent exists"))
            .expect("dir readable")
            .count();
        assert_eq!(leftovers, 1);
    }
}
