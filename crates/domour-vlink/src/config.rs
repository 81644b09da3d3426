use std::io::Write;
use std::path::{Path, PathBuf};

use domour_platform::{AppPaths, Platform};
use log::{debug, info};

use crate::error::HelperConfigError;

/// Written when no configuration exists so the user has a file to edit.
pub const DEFAULT_CONFIG: &str = "{}\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperConfig {
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigResolution {
    /// A configuration file the helper can be launched with.
    Existing(PathBuf),
    /// Nothing was found, so a default home configuration was created.
    Created(HelperConfig),
}

/// Where the helper binary and its configuration live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperLayout {
    binary: PathBuf,
    home_config: PathBuf,
    system_config: Option<PathBuf>,
}

impl HelperLayout {
    #[must_use]
    pub fn new(binary: PathBuf, home_config: PathBuf, system_config: Option<PathBuf>) -> Self {
        Self {
            binary,
            home_config,
            system_config,
        }
    }

    #[must_use]
    pub fn detect(paths: &AppPaths, platform: &Platform) -> Self {
        Self::new(
            paths.helper_binary(platform),
            paths.helper_config_file(),
            paths.helper_system_config(platform),
        )
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    #[must_use]
    pub fn home_config(&self) -> &Path {
        &self.home_config
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.binary.is_file()
    }

    /// Home configuration first, then the system-wide one. When neither
    /// exists a default home configuration is created.
    ///
    /// # Errors
    /// Returns an error if the default configuration cannot be written.
    pub fn resolve_config(&self) -> Result<ConfigResolution, HelperConfigError> {
        if self.home_config.is_file() {
            return Ok(ConfigResolution::Existing(self.home_config.clone()));
        }
        if let Some(system) = self.system_config.as_ref().filter(|path| path.is_file()) {
            debug!("Using system helper config {}", system.display());
            return Ok(ConfigResolution::Existing(system.clone()));
        }

        let created = self.ensure_home_config()?;
        Ok(ConfigResolution::Created(created))
    }

    /// Read the home configuration, creating it first if missing.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or read.
    pub fn read_config(&self) -> Result<HelperConfig, HelperConfigError> {
        if !self.home_config.is_file() {
            return self.ensure_home_config();
        }
        let content = std::fs::read_to_string(&self.home_config)
            .map_err(|error| HelperConfigError::io("failed to read", &self.home_config, error))?;
        Ok(HelperConfig {
            path: self.home_config.clone(),
            content,
        })
    }

    /// Overwrite the home configuration. The file is readable only by the
    /// owner on unix.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_config(&self, content: &str) -> Result<HelperConfig, HelperConfigError> {
        write_private(&self.home_config, content)?;
        info!("Saved helper config to {}", self.home_config.display());
        Ok(HelperConfig {
            path: self.home_config.clone(),
            content: content.to_string(),
        })
    }

    fn ensure_home_config(&self) -> Result<HelperConfig, HelperConfigError> {
        info!(
            "Creating default helper config at {}",
            self.home_config.display()
        );
        write_private(&self.home_config, DEFAULT_CONFIG)?;
        Ok(HelperConfig {
            path: self.home_config.clone(),
            content: DEFAULT_CONFIG.to_string(),
        })
    }
}

fn write_private(path: &Path, content: &str) -> Result<(), HelperConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|error| HelperConfigError::io("failed to create", dir, error))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .map_err(|error| HelperConfigError::io("failed to open", path, error))?;
    file.write_all(content.as_bytes())
        .map_err(|error| HelperConfigError::io("failed to write", path, error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|error| HelperConfigError::io("failed to restrict", path, error))?;
    }

    Ok(())
}
