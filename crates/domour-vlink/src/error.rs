use std::path::PathBuf;

use thiserror::Error;

use crate::config::HelperConfig;

#[derive(Debug, Error)]
pub enum HelperConfigError {
    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HelperConfigError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A default configuration was just written and must be filled in
    /// before the helper can start.
    #[error("vlink configuration required, edit {}", .0.path.display())]
    ConfigRequired(HelperConfig),
    #[error("failed to start {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] HelperConfigError),
}

impl SupervisorError {
    /// Whether the caller should prompt the user instead of reporting a
    /// failure.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::ConfigRequired(_))
    }
}
