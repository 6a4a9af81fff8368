//! Transport agent subprocess lifecycle
//!
//! Spawns the agent binary with piped stdio, owns the child through a
//! dedicated wait task, and supports graceful shutdown with a force-kill
//! fallback. Protocol traffic over the pipes is handled by
//! [`crate::client`]; this module only manages the process itself.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

use foretrack_core::{Error, Result};

/// A running transport agent process.
///
/// The child is owned by a background wait task so its exit status is
/// always reaped, even if this struct is dropped first.
pub struct AgentProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
    exit_code: Arc<Mutex<Option<i32>>>,
}

impl AgentProcess {
    /// Spawn the agent binary with piped stdio.
    ///
    /// Returns the process handle plus the stdin and stdout pipes so the
    /// caller can attach the protocol writer and reader. Stderr is drained
    /// by a background task that forwards lines to the log.
    pub fn spawn(command: &str, args: &[String]) -> Result<(Self, ChildStdin, ChildStdout)> {
        which::which(command)
            .map_err(|_| Error::agent_spawn(format!("'{}' not found in PATH", command)))?;

        info!("Spawning transport agent: {} {}", command, args.join(" "));

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::agent_spawn(e.to_string()))?;

        let pid = child.id();
        debug!("Agent process started with pid {:?}", pid);

        let stdin = child.stdin.take().expect("stdin was configured");
        let stdout = child.stdout.take().expect("stdout was configured");
        let stderr = child.stderr.take().expect("stderr was configured");

        tokio::spawn(Self::stderr_reader(stderr));

        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let exit_code = Arc::new(Mutex::new(None));
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
            Arc::clone(&exit_code),
        ));

        let process = Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
            exit_code,
        };
        Ok((process, stdin, stdout))
    }

    async fn stderr_reader(stderr: ChildStderr) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("Agent stderr: {}", line);
        }
    }

    /// Owns the child: reaps the exit status, or kills on request.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
        exit_code: Arc<Mutex<Option<i32>>>,
    ) {
        let code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => {
                    info!("Agent process exited with status {:?}", status.code());
                    status.code()
                }
                Err(e) => {
                    error!("Failed to wait for agent process: {}", e);
                    None
                }
            },
            _ = kill_rx => {
                debug!("Kill requested, terminating agent process");
                if let Err(e) = child.start_kill() {
                    error!("Failed to kill agent process: {}", e);
                }
                child.wait().await.ok().and_then(|s| s.code())
            }
        };

        *exit_code.lock().unwrap_or_else(|e| e.into_inner()) = code;
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// Exit code of the agent, once it has exited. `None` while running or
    /// when the process was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for the agent to finish on its own, then force-kill.
    ///
    /// The caller is expected to have closed the agent's stdin first; a
    /// well-behaved agent exits on EOF within the grace period.
    pub async fn shutdown(&mut self, timeout: Duration) {
        if self.has_exited() {
            debug!("Agent process already exited");
            return;
        }

        // Register for the notification before re-checking, so an exit
        // between the check and the await is not missed.
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return;
        }

        if tokio::time::timeout(timeout, notified).await.is_ok() {
            debug!("Agent process exited gracefully");
            return;
        }

        warn!("Agent process did not exit within {:?}, killing", timeout);
        self.force_kill();
    }

    fn force_kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

impl std::fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentProcess")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            debug!("AgentProcess dropped while running, killing pid {:?}", self.pid);
            self.force_kill();
        }
    }
}
