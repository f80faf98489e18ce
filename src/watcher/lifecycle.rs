// src/watcher/lifecycle.rs

//! Host lifecycle abstraction used for shutdown cleanup.
//!
//! A started watcher registers a hook that closes the child's stdin,
//! force-kills it and waits (bounded) for it to be reaped. The hook is
//! de-registered once the child has exited on its own.
//!
//! - [`SignalLifecycle`] runs hooks when the host receives Ctrl-C (or SIGTERM
//!   on unix) and then exits the host process.
//! - Tests provide their own `HostLifecycle` that never terminates the test
//!   process (see `procwatch-test-utils`).

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cleanup run when the host shuts down abnormally.
pub type ShutdownHook = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Identifies a registered hook for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId(pub u64);

/// Trait abstracting the host's termination-hook facility.
pub trait HostLifecycle: Send + Sync + Debug {
    fn register(&self, hook: ShutdownHook) -> HookId;

    /// Returns `false` if the hook was unknown or already ran.
    fn deregister(&self, id: HookId) -> bool;
}

/// Exit status used after hooks ran in response to a signal.
const SIGNAL_EXIT_CODE: i32 = 130;

type HookMap = Arc<Mutex<BTreeMap<HookId, ShutdownHook>>>;

/// Production lifecycle: hooks run on Ctrl-C / SIGTERM.
///
/// The listener task lives on the runtime that registered a hook. When that
/// runtime goes away the next registration installs a fresh listener.
pub struct SignalLifecycle {
    hooks: HookMap,
    next_id: AtomicU64,
    exit_code: Option<i32>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for SignalLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered = self.hooks.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("SignalLifecycle")
            .field("registered", &registered)
            .field("listening", &self.is_listening())
            .finish()
    }
}

impl Default for SignalLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalLifecycle {
    pub fn new() -> Self {
        Self {
            hooks: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
            exit_code: Some(SIGNAL_EXIT_CODE),
            listener: Mutex::new(None),
        }
    }

    /// Whether the host process exits after the hooks ran on a signal.
    /// Defaults to `true`.
    pub fn exit_after_hooks(mut self, exit: bool) -> Self {
        self.exit_code = exit.then_some(SIGNAL_EXIT_CODE);
        self
    }

    /// True while a signal listener task is alive.
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// The process-wide instance used by watchers that were not given an
    /// explicit lifecycle. Signals are process-wide, so one listener is
    /// shared by all of them.
    pub fn global() -> Arc<SignalLifecycle> {
        static GLOBAL: OnceLock<Arc<SignalLifecycle>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SignalLifecycle::new())))
    }

    /// Run (and remove) every registered hook.
    ///
    /// Host applications with their own shutdown path can call this instead
    /// of relying on the signal listener.
    pub async fn run_hooks(&self) {
        run_all(&self.hooks).await;
    }

    fn ensure_listener(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no Tokio runtime; shutdown hooks will only run via run_hooks()");
            return;
        };

        // Installed here rather than in the task, so a signal arriving right
        // after registration is not missed.
        let signals = match TerminationSignals::install() {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "failed to listen for termination signals");
                return;
            }
        };

        let hooks = Arc::clone(&self.hooks);
        let exit_code = self.exit_code;
        *listener = Some(handle.spawn(async move {
            if let Err(e) = signals.recv().await {
                warn!(error = %e, "failed to listen for termination signals");
                return;
            }
            info!("termination signal received; cleaning up child processes");
            run_all(&hooks).await;
            if let Some(code) = exit_code {
                std::process::exit(code);
            }
        }));
        debug!("shutdown signal listener installed");
    }
}

impl HostLifecycle for SignalLifecycle {
    fn register(&self, hook: ShutdownHook) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, hook);
        self.ensure_listener();
        id
    }

    fn deregister(&self, id: HookId) -> bool {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

async fn run_all(hooks: &HookMap) {
    let drained: Vec<ShutdownHook> = {
        let mut guard = hooks.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *guard).into_values().collect()
    };

    debug!(count = drained.len(), "running shutdown hooks");
    for hook in drained {
        hook().await;
    }
}

#[cfg(unix)]
struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) -> std::io::Result<()> {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
        Ok(())
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await
    }
}
