// src/watcher/mod.rs

//! Run a child process, observe its output line by line and wait for
//! specific lines.
//!
//! - `controller` owns the child: spawn, stdin, termination, exit status.
//! - `reader` drains stdout / stderr in background Tokio tasks.
//! - [`listeners`] holds output and exit callbacks.
//! - `trigger` holds pending `wait_for_line*` requests.
//! - [`lifecycle`] abstracts the host shutdown hook.
//! - [`terminal`] has escape-sequence stripping and pty wrapping helpers.
//!
//! [`ProcessWatcher`] composes all of the above and is the only type callers
//! need. It is meant to be shared (`Arc<ProcessWatcher>`) between the task
//! feeding stdin, tasks waiting for lines and whoever tears it down.

mod controller;
pub mod lifecycle;
pub mod listeners;
mod reader;
pub mod terminal;
mod trigger;

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::{Result, WatcherError};
use crate::types::Stream;

use self::controller::ProcessController;
use self::trigger::TriggerRegistry;

pub use self::lifecycle::{HookId, HostLifecycle, ShutdownHook, SignalLifecycle};
pub use self::listeners::{ExitListener, OutputListener};
pub use self::terminal::{strip_escape_sequences, with_pty};

use self::listeners::ListenerRegistry;

/// Default bound for the shutdown hook's wait on the killed child.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Library-level knobs for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherOptions {
    /// How long the shutdown hook waits for a force-killed child to be reaped.
    pub cleanup_timeout: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }
}

/// State shared between the facade and the reader tasks.
pub(crate) struct Shared {
    pub(crate) controller: ProcessController,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) stdout_triggers: TriggerRegistry,
    pub(crate) stderr_triggers: TriggerRegistry,
    /// Count of reader tasks that have finished.
    pub(crate) readers_done: watch::Sender<usize>,
}

impl Shared {
    pub(crate) fn triggers(&self, stream: Stream) -> &TriggerRegistry {
        match stream {
            Stream::Stdout => &self.stdout_triggers,
            Stream::Stderr => &self.stderr_triggers,
        }
    }
}

/// Supervises one child process.
///
/// Listeners may be registered before or after [`start`](Self::start); a
/// listener only sees lines read after its registration.
pub struct ProcessWatcher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProcessWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWatcher")
            .field("command", &self.shared.controller.command())
            .field("pid", &self.pid())
            .field("active", &self.is_active())
            .finish()
    }
}

impl ProcessWatcher {
    /// `command[0]` is the program, the remaining elements its arguments.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = command.into_iter().map(Into::into).collect();
        let controller = ProcessController::new(
            command,
            SignalLifecycle::global(),
            DEFAULT_CLEANUP_TIMEOUT,
        );

        Self {
            shared: Arc::new(Shared {
                controller,
                listeners: ListenerRegistry::default(),
                stdout_triggers: TriggerRegistry::new(Stream::Stdout),
                stderr_triggers: TriggerRegistry::new(Stream::Stderr),
                readers_done: watch::Sender::new(0),
            }),
        }
    }

    /// Use `lifecycle` instead of the process-wide [`SignalLifecycle`].
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn HostLifecycle>) -> Self {
        if let Some(controller) = self.controller_mut() {
            controller.set_lifecycle(lifecycle);
        }
        self
    }

    pub fn with_options(mut self, options: WatcherOptions) -> Self {
        if let Some(controller) = self.controller_mut() {
            controller.set_cleanup_timeout(options.cleanup_timeout);
        }
        self
    }

    /// Spawn the child and its two reader tasks, and register the shutdown
    /// hook. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let pipes = self.shared.controller.start()?;
        let exit_rx = self
            .shared
            .controller
            .exit_receiver()
            .ok_or(WatcherError::NotRunning)?;

        // stderr is the designated finalizer.
        let (stdout_role, stderr_role) = reader::roles();
        reader::spawn_reader(
            Stream::Stdout,
            pipes.stdout,
            Arc::clone(&self.shared),
            exit_rx.clone(),
            stdout_role,
        );
        reader::spawn_reader(
            Stream::Stderr,
            pipes.stderr,
            Arc::clone(&self.shared),
            exit_rx,
            stderr_role,
        );
        Ok(())
    }

    pub fn add_stdout_listener(&self, listener: impl OutputListener + 'static) {
        self.shared
            .listeners
            .add_output(Stream::Stdout, Arc::new(listener));
    }

    pub fn add_stderr_listener(&self, listener: impl OutputListener + 'static) {
        self.shared
            .listeners
            .add_output(Stream::Stderr, Arc::new(listener));
    }

    /// Register one listener for both streams.
    pub fn add_universal_listener(&self, listener: impl OutputListener + 'static) {
        let listener: Arc<dyn OutputListener> = Arc::new(listener);
        self.shared
            .listeners
            .add_output(Stream::Stdout, Arc::clone(&listener));
        self.shared.listeners.add_output(Stream::Stderr, listener);
    }

    /// Register a callback for the exit code. Runs once, after both streams
    /// have been delivered to the output listeners.
    pub fn add_exit_listener(&self, listener: impl ExitListener + 'static) {
        self.shared.listeners.add_exit(Arc::new(listener));
    }

    /// Write `text` to the child's stdin and flush.
    pub async fn send(&self, text: &str) -> Result<()> {
        self.shared.controller.send(text).await
    }

    pub async fn send_line(&self, text: &str) -> Result<()> {
        self.send(&format!("{text}\n")).await
    }

    /// Ask the child to terminate (SIGTERM on unix).
    pub fn terminate(&self) -> Result<()> {
        self.shared.controller.terminate()
    }

    /// Force-kill the child.
    pub fn kill(&self) -> Result<()> {
        self.shared.controller.kill()
    }

    pub async fn close_stdin(&self) -> Result<()> {
        self.shared.controller.close_stdin().await
    }

    /// Close stdin and wait until the child exits on its own.
    pub async fn close_stdin_and_wait_for_process(&self) -> Result<i32> {
        self.close_stdin().await?;
        self.wait_for_process().await
    }

    /// Close stdin, give the child `timeout` to exit, then force-kill it.
    ///
    /// The timeout also covers closing stdin, which waits for any `send`
    /// still in flight.
    pub async fn close_stdin_and_terminate(&self, timeout: Duration) -> Result<()> {
        let graceful = async {
            self.close_stdin().await?;
            self.wait_for_process().await
        };

        match tokio::time::timeout(timeout, graceful).await {
            Ok(res) => res.map(|_| ()),
            Err(_) => {
                debug!(pid = ?self.pid(), ?timeout, "no exit within grace period");
                self.kill()
            }
        }
    }

    /// Wait for the OS-level exit and return the exit code.
    pub async fn wait_for_process(&self) -> Result<i32> {
        self.shared.controller.wait_for_exit().await
    }

    /// Wait until both reader tasks are done: streams drained, exit
    /// listeners called. Returns immediately if the watcher never started.
    pub async fn join(&self) -> Result<()> {
        if !self.shared.controller.is_started() {
            return Ok(());
        }

        let mut done = self.shared.readers_done.subscribe();
        done.wait_for(|finished| *finished >= reader::READER_COUNT)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    /// True iff the child was started and has not exited yet.
    pub fn is_active(&self) -> bool {
        self.shared.controller.is_active()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.controller.pid()
    }

    /// The exit code, once the child has exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.shared.controller.exit_code()
    }

    /// Number of `wait_for_line*` calls currently registered on `stream`.
    pub fn pending_triggers(&self, stream: Stream) -> usize {
        self.shared.triggers(stream).len()
    }

    /// Wait until a line on `stream` fully matches `pattern`.
    ///
    /// - `AlreadyTerminated` if the process is not running at call time.
    /// - `NoMatch` if the process exits before a matching line appears.
    ///
    /// Dropping the returned future abandons the wait; wrap it in
    /// `tokio::time::timeout` to bound it.
    ///
    /// The pattern is re-anchored from its source text, so only inline flags
    /// (`(?i)ready`) apply. Options set through `RegexBuilder` are dropped.
    pub async fn wait_for_line(&self, pattern: &Regex, stream: Stream) -> Result<()> {
        self.wait_for_anchored(trigger::anchored(pattern)?, stream).await
    }

    pub async fn wait_for_line_stdout(&self, pattern: &Regex) -> Result<()> {
        self.wait_for_line(pattern, Stream::Stdout).await
    }

    pub async fn wait_for_line_stderr(&self, pattern: &Regex) -> Result<()> {
        self.wait_for_line(pattern, Stream::Stderr).await
    }

    /// Wait until stdout prints exactly `line`.
    pub async fn wait_for_exact_line_stdout(&self, line: &str) -> Result<()> {
        self.wait_for_anchored(trigger::literal(line)?, Stream::Stdout)
            .await
    }

    /// Wait until stderr prints exactly `line`.
    pub async fn wait_for_exact_line_stderr(&self, line: &str) -> Result<()> {
        self.wait_for_anchored(trigger::literal(line)?, Stream::Stderr)
            .await
    }

    async fn wait_for_anchored(&self, pattern: Regex, stream: Stream) -> Result<()> {
        if !self.shared.controller.is_started() {
            return Err(WatcherError::NotRunning);
        }

        let source = pattern.as_str().to_string();
        let controller = &self.shared.controller;
        let mut pending = self
            .shared
            .triggers(stream)
            .register(pattern, || controller.is_active())?;

        if pending.matched().await {
            debug!(%stream, pattern = %source, "wait satisfied");
            Ok(())
        } else {
            Err(WatcherError::NoMatch(source))
        }
    }

    /// Only available before `start()`: the readers hold clones afterwards.
    fn controller_mut(&mut self) -> Option<&mut ProcessController> {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => Some(&mut shared.controller),
            None => {
                warn!("watcher already started; configuration change ignored");
                None
            }
        }
    }
}
