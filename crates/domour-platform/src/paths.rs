use std::path::PathBuf;
use thiserror::Error;

use crate::Platform;

const HELPER_SYSTEM_BINARY: &str = "/usr/local/bin/vlink";
const HELPER_SYSTEM_CONFIG: &str = "/etc/vlink/config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine home directory")]
    HomeDirUnavailable,
    #[error("Could not determine data directory")]
    DataDirUnavailable,
}

/// Per-user locations used by the desktop app.
///
/// Settings live under `~/.domour` on every platform so they can be edited by
/// hand; logs and lock files go to the platform data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub home_dir: PathBuf,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Build application paths for the current user.
    ///
    /// # Errors
    /// Returns an error when the home or data directory cannot be determined.
    pub fn new() -> Result<Self, AppPathsError> {
        let home_dir = dirs::home_dir().ok_or(AppPathsError::HomeDirUnavailable)?;

        #[cfg(target_os = "macos")]
        let data_dir = home_dir.join("Library/Application Support/domour");

        #[cfg(not(target_os = "macos"))]
        let data_dir = dirs::data_dir()
            .ok_or(AppPathsError::DataDirUnavailable)?
            .join("domour");

        Ok(Self {
            config_dir: home_dir.join(".domour"),
            home_dir,
            data_dir,
        })
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("cosmos-assistant.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("debug.log")
    }

    #[must_use]
    pub fn instance_lock_file(&self) -> PathBuf {
        self.data_dir.join("instance.lock")
    }

    /// Per-user directory of the vlink helper (`~/.vlink`).
    #[must_use]
    pub fn helper_dir(&self) -> PathBuf {
        self.home_dir.join(".vlink")
    }

    #[must_use]
    pub fn helper_config_file(&self) -> PathBuf {
        self.helper_dir().join("config.json")
    }

    /// System-wide helper config consulted when the user has none. Windows has
    /// no such location.
    #[must_use]
    pub fn helper_system_config(&self, platform: &Platform) -> Option<PathBuf> {
        (!platform.is_windows()).then(|| PathBuf::from(HELPER_SYSTEM_CONFIG))
    }

    /// Install location of the helper binary.
    #[must_use]
    pub fn helper_binary(&self, platform: &Platform) -> PathBuf {
        if platform.is_windows() {
            self.helper_dir().join(platform.executable_name("vlink"))
        } else {
            PathBuf::from(HELPER_SYSTEM_BINARY)
        }
    }

    /// Ensure all application directories exist on disk.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
