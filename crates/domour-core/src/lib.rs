//! Release pipeline for Domour and its vlink helper.
//!
//! - Checksums manifest parsing and latest-version resolution.
//! - Release archive download for the current platform.
//! - Binary extraction from zip and tar.gz archives.
//! - Binary replacement with backup and rollback, and elevated helper installs.

pub mod apply;
pub mod archive;
pub mod fetch;
pub mod manifest;
pub mod updater;
pub mod version;

pub use apply::{
    ApplyError, ElevatedInstaller, ElevationCredential, SudoInstaller, cleanup_stale_backup,
};
pub use archive::{ArchiveError, extract_entry};
pub use fetch::{
    FetchError, FetchedRelease, ReleaseChannel, ReleaseClient, VersionRequest, archive_file_name,
};
pub use updater::{ApplyOutcome, UpdateError, UpdateProgress, Updater};
pub use version::{ResolveError, VersionString, is_valid_semver, resolve_latest};
