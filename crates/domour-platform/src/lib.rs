mod commands;
mod paths;
mod target;

pub use commands::HideWindow;
pub use paths::{AppPaths, AppPathsError};
pub use target::{ArchiveFormat, HelperInstallMode, Platform};
