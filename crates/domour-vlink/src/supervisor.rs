use std::fmt;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use domour_platform::HideWindow;
use log::{debug, error, info, warn};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, watch};

use crate::config::{ConfigResolution, HelperLayout};
use crate::error::{HelperConfigError, SupervisorError};
use crate::probe::{DEFAULT_PROBE_ADDR, PROBE_TIMEOUT, probe};

/// How long `stop` waits after the interrupt before killing the helper.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    AlreadyRunning { pid: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// The helper exited after the interrupt.
    Exited,
    /// The helper outlived the grace period and was killed.
    Killed,
}

#[derive(Debug)]
struct ProcessHandle {
    instance: u64,
    pid: Option<u32>,
    exited: watch::Receiver<bool>,
    kill: mpsc::Sender<()>,
}

impl ProcessHandle {
    fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }
}

#[derive(Debug, Default)]
struct Slot {
    handle: Option<ProcessHandle>,
    next_instance: u64,
}

/// Owns the vlink helper process.
///
/// Clones share the same process slot. The child itself is owned by a
/// detached watcher task spawned on start; the slot only holds a handle to
/// signal it and observe its exit.
#[derive(Debug, Clone)]
pub struct Supervisor {
    layout: HelperLayout,
    probe_addr: SocketAddr,
    grace_period: Duration,
    slot: Arc<Mutex<Slot>>,
    state: Arc<watch::Sender<SupervisorState>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(layout: HelperLayout) -> Self {
        let (state, _) = watch::channel(SupervisorState::Stopped);
        Self {
            layout,
            probe_addr: DEFAULT_PROBE_ADDR,
            grace_period: STOP_GRACE_PERIOD,
            slot: Arc::new(Mutex::new(Slot::default())),
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn with_probe_addr(mut self, addr: SocketAddr) -> Self {
        self.probe_addr = addr;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &HelperLayout {
        &self.layout
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.slot
            .lock()
            .await
            .handle
            .as_ref()
            .is_some_and(ProcessHandle::is_alive)
    }

    /// Launch the helper unless it is already running.
    ///
    /// # Errors
    /// Returns [`SupervisorError::ConfigRequired`] after writing a default
    /// configuration when none existed, and [`SupervisorError::Spawn`] when
    /// the binary cannot be launched.
    pub async fn start(&self) -> Result<StartOutcome, SupervisorError> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.handle.as_ref().filter(|handle| handle.is_alive()) {
            debug!("Helper already running (pid {:?})", handle.pid);
            return Ok(StartOutcome::AlreadyRunning { pid: handle.pid });
        }
        slot.handle = None;
        self.state.send_replace(SupervisorState::Starting);

        let config = match self.resolve_config().await {
            Ok(ConfigResolution::Existing(path)) => path,
            Ok(ConfigResolution::Created(created)) => {
                warn!(
                    "No helper configuration found, created {}",
                    created.path.display()
                );
                self.state.send_replace(SupervisorState::Stopped);
                return Err(SupervisorError::ConfigRequired(created));
            }
            Err(config_error) => {
                self.state.send_replace(SupervisorState::Stopped);
                return Err(config_error.into());
            }
        };

        let binary = self.layout.binary().to_path_buf();
        info!(
            "Starting helper: {} -config {}",
            binary.display(),
            config.display()
        );
        let mut command = Command::new(&binary);
        command
            .arg("-config")
            .arg(&config)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .background();

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!("Failed to start helper {}: {source}", binary.display());
                self.state.send_replace(SupervisorState::Stopped);
                return Err(SupervisorError::Spawn { binary, source });
            }
        };

        let pid = child.id();
        slot.next_instance += 1;
        let instance = slot.next_instance;
        let (exited_tx, exited_rx) = watch::channel(false);
        let (kill_tx, kill_rx) = mpsc::channel(1);
        slot.handle = Some(ProcessHandle {
            instance,
            pid,
            exited: exited_rx,
            kill: kill_tx,
        });
        self.state.send_replace(SupervisorState::Running);
        drop(slot);

        tokio::spawn(watch_exit(
            child,
            instance,
            exited_tx,
            kill_rx,
            Arc::clone(&self.slot),
            Arc::clone(&self.state),
        ));

        info!("Helper started (pid {pid:?})");
        Ok(StartOutcome::Started { pid })
    }

    async fn resolve_config(&self) -> Result<ConfigResolution, HelperConfigError> {
        let layout = self.layout.clone();
        tokio::task::spawn_blocking(move || layout.resolve_config())
            .await
            .map_err(|join_error| {
                HelperConfigError::io(
                    "failed to resolve",
                    self.layout.home_config(),
                    std::io::Error::other(join_error),
                )
            })?
    }

    /// Interrupt the helper and wait for it to exit, killing it once the
    /// grace period runs out. Signal failures are ignored.
    pub async fn stop(&self) -> StopOutcome {
        let mut slot = self.slot.lock().await;
        let Some(mut handle) = slot.handle.take() else {
            debug!("Stop requested but helper is not running");
            return StopOutcome::NotRunning;
        };
        if !handle.is_alive() {
            self.state.send_replace(SupervisorState::Stopped);
            return StopOutcome::NotRunning;
        }

        self.state.send_replace(SupervisorState::Stopping);
        info!("Stopping helper (pid {:?})", handle.pid);
        if let Some(pid) = handle.pid
            && let Err(signal_error) = interrupt(pid)
        {
            debug!("Failed to interrupt helper: {signal_error}");
        }

        let wait = tokio::time::timeout(self.grace_period, handle.exited.wait_for(|exited| *exited));
        let outcome = if wait.await.is_ok() {
            StopOutcome::Exited
        } else {
            warn!(
                "Helper did not exit within {:?}, killing it",
                self.grace_period
            );
            let _ = handle.kill.send(()).await;
            let _ = handle.exited.wait_for(|exited| *exited).await;
            StopOutcome::Killed
        };

        self.state.send_replace(SupervisorState::Stopped);
        info!("Helper stopped");
        outcome
    }

    /// Whether the helper port accepts connections, whoever started it.
    pub async fn probe(&self) -> bool {
        probe(self.probe_addr, PROBE_TIMEOUT).await
    }
}

async fn watch_exit(
    mut child: Child,
    instance: u64,
    exited: watch::Sender<bool>,
    mut kill: mpsc::Receiver<()>,
    slot: Arc<Mutex<Slot>>,
    state: Arc<watch::Sender<SupervisorState>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Some(()) = kill.recv() => {
            if let Err(kill_error) = child.start_kill() {
                debug!("Failed to kill helper: {kill_error}");
            }
            child.wait().await
        }
    };
    match status {
        Ok(status) => info!("Helper exited: {status}"),
        Err(wait_error) => warn!("Failed to wait for helper: {wait_error}"),
    }
    exited.send_replace(true);

    let mut slot = slot.lock().await;
    if slot
        .handle
        .as_ref()
        .is_some_and(|handle| handle.instance == instance)
    {
        slot.handle = None;
        state.send_replace(SupervisorState::Stopped);
    }
}

#[cfg(unix)]
fn interrupt(pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid, libc::SIGINT) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "interrupt signals are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{StopOutcome, Supervisor, SupervisorState};
    use crate::config::HelperLayout;
    use crate::error::SupervisorError;

    fn idle_supervisor() -> Supervisor {
        Supervisor::new(HelperLayout::new(
            PathBuf::from("/nonexistent/vlink"),
            PathBuf::from("/nonexistent/.vlink/config.json"),
            None,
        ))
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(SupervisorState::Stopping.to_string(), "stopping");
        assert_eq!(SupervisorState::Running.to_string(), "running");
    }

    #[tokio::test]
    async fn missing_config_is_created_off_the_async_thread() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let home_config = temp.path().join(".vlink").join("config.json");
        let supervisor = Supervisor::new(HelperLayout::new(
            temp.path().join("vlink"),
            home_config.clone(),
            None,
        ));

        let error = supervisor.start().await.expect_err("config is required first");

        assert!(matches!(error, SupervisorError::ConfigRequired(ref config) if config.path == home_config));
        assert!(home_config.is_file());
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let supervisor = idle_supervisor();

        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(!supervisor.is_running().await);
    }
}
