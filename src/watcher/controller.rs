// src/watcher/controller.rs

//! Owns the child process: spawn, stdin, termination and exit status.
//!
//! The `tokio::process::Child` itself lives in a reaper task that awaits its
//! exit and serves force-kill requests. The exit code is published once over a
//! `watch` channel; everything that asks "has it exited?" reads that channel.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::errors::{Result, WatcherError};
use crate::watcher::lifecycle::{HookId, HostLifecycle, ShutdownHook};

/// Output pipes handed to the reader tasks after a successful spawn.
pub(crate) struct SpawnedPipes {
    pub(crate) stdout: ChildStdout,
    pub(crate) stderr: ChildStderr,
}

struct Running {
    pid: Option<u32>,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    kill_tx: mpsc::UnboundedSender<()>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl Running {
    fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    fn request_kill(&self) {
        // Fails only when the reaper is gone, i.e. the child already exited.
        let _ = self.kill_tx.send(());
    }
}

pub(crate) struct ProcessController {
    command: Vec<String>,
    lifecycle: Arc<dyn HostLifecycle>,
    cleanup_timeout: Duration,
    start_lock: Mutex<()>,
    running: OnceLock<Running>,
    hook: Mutex<Option<HookId>>,
}

impl ProcessController {
    pub(crate) fn new(
        command: Vec<String>,
        lifecycle: Arc<dyn HostLifecycle>,
        cleanup_timeout: Duration,
    ) -> Self {
        Self {
            command,
            lifecycle,
            cleanup_timeout,
            start_lock: Mutex::new(()),
            running: OnceLock::new(),
            hook: Mutex::new(None),
        }
    }

    pub(crate) fn command(&self) -> &[String] {
        &self.command
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: Arc<dyn HostLifecycle>) {
        self.lifecycle = lifecycle;
    }

    pub(crate) fn set_cleanup_timeout(&mut self, timeout: Duration) {
        self.cleanup_timeout = timeout;
    }

    /// Spawn the child with inherited environment and working directory,
    /// start its reaper and register the shutdown hook.
    pub(crate) fn start(&self) -> Result<SpawnedPipes> {
        let _guard = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.running.get().is_some() {
            return Err(WatcherError::AlreadyStarted);
        }

        let command_line = self.command.join(" ");
        let launch_error = |source: io::Error| WatcherError::LaunchError {
            command: command_line.clone(),
            source,
        };

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(launch_error(io::Error::other(
                "no Tokio runtime available to drive the process",
            )));
        }

        let (program, args) = self.command.split_first().ok_or_else(|| {
            launch_error(io::Error::new(io::ErrorKind::InvalidInput, "empty command"))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(launch_error)?;
        let pid = child.id();

        let (stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    return Err(launch_error(io::Error::other(
                        "child standard streams were not captured",
                    )));
                }
            };

        info!(?pid, command = %command_line, "spawned child process");

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        spawn_reaper(child, kill_rx, exit_tx, pid);

        let running = Running {
            pid,
            stdin: Arc::new(tokio::sync::Mutex::new(Some(stdin))),
            kill_tx,
            exit_rx,
        };

        let hook_id = self.lifecycle.register(self.cleanup_hook(&running));
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook_id);

        if self.running.set(running).is_err() {
            // Unreachable while `start_lock` is held.
            return Err(WatcherError::AlreadyStarted);
        }

        Ok(SpawnedPipes { stdout, stderr })
    }

    pub(crate) fn is_started(&self) -> bool {
        self.running.get().is_some()
    }

    /// True iff a child was started and has not exited yet.
    pub(crate) fn is_active(&self) -> bool {
        self.running.get().is_some_and(|r| !r.has_exited())
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.running.get().and_then(|r| r.pid)
    }

    pub(crate) fn exit_code(&self) -> Option<i32> {
        self.running.get().and_then(|r| *r.exit_rx.borrow())
    }

    /// Request graceful termination (SIGTERM on unix).
    pub(crate) fn terminate(&self) -> Result<()> {
        let running = self.running()?;
        if running.has_exited() {
            debug!(pid = ?running.pid, "terminate requested but process already exited");
            return Ok(());
        }

        info!(pid = ?running.pid, "terminate requested");

        #[cfg(unix)]
        if let Some(pid) = running.pid {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => return Ok(()),
                Err(e) => {
                    warn!(pid, error = %e, "failed to send SIGTERM; force-killing instead");
                }
            }
        }

        running.request_kill();
        Ok(())
    }

    /// Force-kill the child.
    pub(crate) fn kill(&self) -> Result<()> {
        let running = self.running()?;
        if !running.has_exited() {
            info!(pid = ?running.pid, "force-kill requested");
            running.request_kill();
        }
        Ok(())
    }

    pub(crate) async fn send(&self, text: &str) -> Result<()> {
        let running = self.running()?;
        let mut stdin = running.stdin.lock().await;
        let writer = stdin.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "stdin of child process is closed")
        })?;

        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    pub(crate) async fn close_stdin(&self) -> Result<()> {
        let running = self.running()?;
        close_stdin(&running.stdin).await;
        Ok(())
    }

    pub(crate) async fn wait_for_exit(&self) -> Result<i32> {
        let mut exit_rx = self.running()?.exit_rx.clone();
        wait_for_exit(&mut exit_rx).await
    }

    pub(crate) fn exit_receiver(&self) -> Option<watch::Receiver<Option<i32>>> {
        self.running.get().map(|r| r.exit_rx.clone())
    }

    /// Drop the shutdown hook after a normal exit.
    pub(crate) fn release_shutdown_hook(&self) {
        let id = self.hook.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(id) = id {
            if self.lifecycle.deregister(id) {
                debug!(pid = ?self.pid(), "shutdown hook de-registered");
            }
        }
    }

    fn running(&self) -> Result<&Running> {
        self.running.get().ok_or(WatcherError::NotRunning)
    }

    fn cleanup_hook(&self, running: &Running) -> ShutdownHook {
        let stdin = Arc::clone(&running.stdin);
        let kill_tx = running.kill_tx.clone();
        let mut exit_rx = running.exit_rx.clone();
        let pid = running.pid;
        let timeout = self.cleanup_timeout;

        Box::new(move || {
            Box::pin(async move {
                info!(?pid, "host shutting down; killing child process");
                // Kill first: a write blocked on a full pipe holds the stdin
                // lock until the child is gone.
                let _ = kill_tx.send(());

                let reaped = async {
                    close_stdin(&stdin).await;
                    wait_for_exit(&mut exit_rx).await
                };
                match tokio::time::timeout(timeout, reaped).await {
                    Ok(Ok(code)) => debug!(?pid, exit_code = code, "child reaped during shutdown"),
                    Ok(Err(e)) => warn!(?pid, error = %e, "could not confirm child exit"),
                    Err(_) => warn!(?pid, ?timeout, "child not reaped before shutdown timeout"),
                }
            })
        })
    }
}

async fn close_stdin(stdin: &tokio::sync::Mutex<Option<ChildStdin>>) {
    if let Some(mut writer) = stdin.lock().await.take() {
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "error while closing child stdin");
        }
        debug!("child stdin closed");
    }
}

pub(crate) async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<i32>>) -> Result<i32> {
    let code = exit_rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| anyhow!("process reaper stopped without reporting an exit status"))?;
    Ok((*code).unwrap_or(-1))
}

fn spawn_reaper(
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
    exit_tx: watch::Sender<Option<i32>>,
    pid: Option<u32>,
) {
    tokio::spawn(async move {
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(()) = kill_rx.recv() => {
                    if let Err(e) = child.start_kill() {
                        warn!(?pid, error = %e, "failed to kill child process");
                    }
                }
            }
        };

        let code = match status {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                warn!(?pid, error = %e, "failed to wait for child process");
                -1
            }
        };

        info!(?pid, exit_code = code, "child process exited");
        exit_tx.send_replace(Some(code));
    });
}

/// Exit code as reported to listeners: the process's own code, `128 + signal`
/// for a signal-terminated child on unix, `-1` otherwise.
pub(crate) fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn exit_codes_follow_shell_conventions() {
        assert_eq!(exit_code_of(ExitStatus::from_raw(3 << 8)), 3);
        // Raw wait status 9 = killed by SIGKILL.
        assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 137);
    }
}
