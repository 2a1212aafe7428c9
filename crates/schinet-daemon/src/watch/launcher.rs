//! Viewer process launcher.
//!
//! The relay never talks to the viewer through the child handle: the viewer
//! dials back over TCP and identifies itself, so terminal wrappers and
//! `cmd /C start` are free to fork.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::types::WatchError;

/// Where a viewer should dial back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerTarget {
    pub host: String,
    pub port: u16,
}

/// Starts viewer processes. Implemented per platform by [`SystemSpawner`];
/// tests substitute an in-process viewer.
pub trait ProcessSpawner: Send + Sync {
    fn spawn_viewer(&self, target: &ViewerTarget) -> Result<SpawnedViewer, WatchError>;
}

/// A launched viewer, possibly without a handle we can wait on.
#[derive(Debug, Default)]
pub struct SpawnedViewer {
    child: Option<Child>,
}

impl SpawnedViewer {
    pub const fn process(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// A viewer with no child handle (in-process, or fully detached).
    pub const fn detached() -> Self {
        Self { child: None }
    }

    pub fn os_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Kill the launcher process. Used when the viewer never attached.
    pub async fn kill(self) {
        if let Some(mut child) = self.child {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Viewer process already gone");
            }
        }
    }

    /// Wait for the launcher process to exit, killing it after `grace`.
    pub async fn reap(self, grace: Duration) {
        let Some(mut child) = self.child else {
            return;
        };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Viewer process exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed waiting for viewer process"),
            Err(_) => {
                warn!(pid = ?child.id(), "Viewer did not exit after shutdown, killing");
                let _ = child.kill().await;
            }
        }
    }
}

/// Launches `<program> --viewer --host H --port P` in its own console.
#[derive(Debug, Clone)]
pub struct SystemSpawner {
    program: PathBuf,
    /// Terminal wrapper argv on Unix, e.g. `["xterm", "-e"]`. Without one the
    /// viewer shares the daemon's terminal.
    #[cfg_attr(windows, allow(dead_code))]
    terminal: Option<Vec<String>>,
}

impl SystemSpawner {
    pub const fn new(program: PathBuf, terminal: Option<Vec<String>>) -> Self {
        Self { program, terminal }
    }

    /// Spawner that relaunches the running executable.
    pub fn current_exe(terminal: Option<Vec<String>>) -> Result<Self, WatchError> {
        let program = std::env::current_exe().map_err(|e| WatchError::SpawnFailed {
            reason: format!("cannot locate own executable: {e}"),
        })?;
        Ok(Self::new(program, terminal))
    }

    fn viewer_args(target: &ViewerTarget) -> Vec<String> {
        vec![
            "--viewer".to_string(),
            "--host".to_string(),
            target.host.clone(),
            "--port".to_string(),
            target.port.to_string(),
        ]
    }

    #[cfg(windows)]
    fn command(&self, target: &ViewerTarget) -> Command {
        let mut cmd = Command::new("cmd");
        // Empty title argument, otherwise `start` takes the program path as one.
        cmd.args(["/C", "start", ""])
            .arg(&self.program)
            .args(Self::viewer_args(target));
        cmd
    }

    #[cfg(not(windows))]
    fn command(&self, target: &ViewerTarget) -> Command {
        let wrapper = self.terminal.as_deref().unwrap_or_default();
        let mut cmd = match wrapper.split_first() {
            Some((term, term_args)) => {
                let mut cmd = Command::new(term);
                cmd.args(term_args).arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.args(Self::viewer_args(target));
        cmd
    }
}

impl ProcessSpawner for SystemSpawner {
    fn spawn_viewer(&self, target: &ViewerTarget) -> Result<SpawnedViewer, WatchError> {
        let mut cmd = self.command(target);
        cmd.stdin(Stdio::null()).kill_on_drop(false);

        let child = cmd.spawn().map_err(|e| WatchError::SpawnFailed {
            reason: format!("{}: {e}", self.program.display()),
        })?;
        info!(
            pid = ?child.id(),
            host = %target.host,
            port = target.port,
            "Launched viewer"
        );
        Ok(SpawnedViewer::process(child))
    }
}
