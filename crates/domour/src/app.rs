use std::sync::{Mutex, PoisonError};

use domour_core::{
    ApplyOutcome, ElevationCredential, ReleaseChannel, ReleaseClient, SudoInstaller,
    UpdateProgress, Updater, VersionRequest, VersionString,
};
use domour_platform::{AppPaths, HelperInstallMode, Platform};
use domour_vlink::{HelperConfig, HelperLayout, StartOutcome, StopOutcome, Supervisor, SupervisorState};
use log::{debug, info};
use tokio::sync::mpsc;

use crate::chat::{Attachment, ChatRelay};
use crate::error::AppError;
use crate::settings::AppSettings;

/// Snapshot of the helper for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperStatus {
    pub installed: bool,
    pub state: SupervisorState,
    pub port_alive: bool,
}

/// Everything the host exposes: settings, the helper, updates and chat.
#[derive(Debug)]
pub struct App {
    paths: AppPaths,
    platform: Platform,
    settings: Mutex<AppSettings>,
    supervisor: Supervisor,
}

impl App {
    pub fn new() -> Result<Self, AppError> {
        let paths = AppPaths::new()?;
        paths
            .ensure_dirs()
            .map_err(|error| AppError::io("failed to create app directories", error))?;
        Ok(Self::with_paths(paths, Platform::current()))
    }

    pub fn with_paths(paths: AppPaths, platform: Platform) -> Self {
        let settings = AppSettings::load_from(&paths.settings_file());
        let supervisor = Supervisor::new(HelperLayout::detect(&paths, &platform));
        Self {
            paths,
            platform,
            settings: Mutex::new(settings),
            supervisor,
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn about() -> String {
        format!(
            "A smart assistant.\nVersion: v{}\n\nMade with \u{2665} in Guangzhou by \u{a9}qtopie 2026.",
            env!("CARGO_PKG_VERSION")
        )
    }

    pub fn settings(&self) -> AppSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_settings(&self, next: AppSettings) -> Result<(), AppError> {
        next.save_to(&self.paths.settings_file())
            .map_err(|error| AppError::io("failed to save settings", error))?;
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = next;
        info!("Settings saved");
        Ok(())
    }

    pub async fn start_helper(&self) -> Result<StartOutcome, AppError> {
        Ok(self.supervisor.start().await?)
    }

    pub async fn stop_helper(&self) -> StopOutcome {
        self.supervisor.stop().await
    }

    pub async fn helper_status(&self) -> HelperStatus {
        HelperStatus {
            installed: self.supervisor.layout().is_installed(),
            state: self.supervisor.state(),
            port_alive: self.supervisor.probe().await,
        }
    }

    pub fn helper_config(&self) -> Result<HelperConfig, AppError> {
        Ok(self.supervisor.layout().read_config()?)
    }

    pub fn save_helper_config(&self, content: &str) -> Result<HelperConfig, AppError> {
        Ok(self.supervisor.layout().save_config(content)?)
    }

    /// Whether installing the helper on this platform needs a password.
    pub fn helper_install_needs_credential(&self) -> bool {
        self.platform.helper_install_mode() == HelperInstallMode::ElevatedCopy
    }

    /// The newest published release, if it is newer than this build.
    pub async fn check_for_update(&self) -> Result<Option<VersionString>, AppError> {
        let client = self.release_client()?;
        let (latest, _) = client.resolve_latest(&ReleaseChannel::application()).await?;
        let current = format!("v{}", env!("CARGO_PKG_VERSION"));
        match current.parse::<VersionString>() {
            Ok(current) if latest <= current => {
                debug!("Running {current}, latest is {latest}");
                Ok(None)
            }
            _ => Ok(Some(latest)),
        }
    }

    pub async fn update_application(
        &self,
        version: &str,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<ApplyOutcome, AppError> {
        let updater = self.updater()?;
        Ok(updater
            .update_application(&VersionRequest::parse(version), progress)
            .await?)
    }

    pub async fn install_helper(
        &self,
        version: &str,
        credential: Option<ElevationCredential>,
        progress: &mpsc::Sender<UpdateProgress>,
    ) -> Result<ApplyOutcome, AppError> {
        let updater = self.updater()?;
        let installer = credential.map(SudoInstaller::new);
        let elevated = installer
            .as_ref()
            .map(|installer| installer as &dyn domour_core::ElevatedInstaller);
        Ok(updater
            .install_helper(&VersionRequest::parse(version), elevated, progress)
            .await?)
    }

    pub async fn chat(&self, prompt: &str, attachments: &[Attachment]) -> Result<String, AppError> {
        if prompt.trim().is_empty() {
            return Ok(String::new());
        }
        let relay = ChatRelay::gemini()?;
        Ok(relay.send(prompt, attachments).await?)
    }

    fn release_client(&self) -> Result<ReleaseClient, AppError> {
        Ok(ReleaseClient::for_platform(self.platform.clone())?)
    }

    fn updater(&self) -> Result<Updater, AppError> {
        Ok(Updater::new(
            self.release_client()?,
            self.supervisor.layout().binary().to_path_buf(),
        ))
    }
}
