//! Lifecycle management for the vlink network helper.

mod config;
mod error;
mod probe;
mod supervisor;

pub use config::{ConfigResolution, DEFAULT_CONFIG, HelperConfig, HelperLayout};
pub use error::{HelperConfigError, SupervisorError};
pub use probe::{DEFAULT_PROBE_ADDR, PROBE_TIMEOUT, probe};
pub use supervisor::{STOP_GRACE_PERIOD, StartOutcome, StopOutcome, Supervisor, SupervisorState};
