use domour_core::{FetchError, UpdateError};
use domour_platform::AppPathsError;
use domour_vlink::{HelperConfigError, SupervisorError};
use thiserror::Error;

use crate::chat::ChatError;
use crate::single_instance::AcquireError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to resolve application paths: {0}")]
    Paths(#[from] AppPathsError),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Instance(#[from] AcquireError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    HelperConfig(#[from] HelperConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl AppError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    /// Errors the user can resolve by supplying configuration or a password.
    pub fn is_actionable(&self) -> bool {
        match self {
            Self::Supervisor(error) => error.is_actionable(),
            Self::Update(error) => error.is_actionable(),
            _ => false,
        }
    }
}
