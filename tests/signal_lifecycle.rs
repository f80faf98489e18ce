// tests/signal_lifecycle.rs
//
// Raises real signals at this test binary, so it holds a single test.

#![cfg(unix)]

use std::sync::Arc;

use nix::sys::signal::{Signal, raise};
use procwatch::{HostLifecycle, ProcessWatcher, SignalLifecycle};
use procwatch_test_utils::{init_tracing, with_timeout};
use tokio::runtime::{Builder, Runtime};
use tokio::time::{Duration, sleep};

fn runtime() -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn sleeper(lifecycle: &Arc<SignalLifecycle>) -> ProcessWatcher {
    let host: Arc<dyn HostLifecycle> = lifecycle.clone();
    ProcessWatcher::new(["sleep", "30"]).with_lifecycle(host)
}

/// A SIGTERM after the first runtime is gone still reaches the hooks,
/// through a listener reinstalled on the second runtime.
#[test]
fn sigterm_runs_hooks_registered_on_a_later_runtime() {
    init_tracing();

    let lifecycle = Arc::new(SignalLifecycle::new().exit_after_hooks(false));

    {
        let first = runtime();
        first.block_on(async {
            let watcher = sleeper(&lifecycle);
            watcher.start().unwrap();
            watcher.kill().unwrap();
            with_timeout(watcher.join()).await.unwrap();
        });
    }
    assert!(!lifecycle.is_listening());

    let second = runtime();
    second.block_on(async {
        let watcher = sleeper(&lifecycle);
        watcher.start().unwrap();
        assert!(lifecycle.is_listening());

        raise(Signal::SIGTERM).unwrap();

        // The hook force-kills the child.
        let code = with_timeout(watcher.wait_for_process()).await.unwrap();
        assert_eq!(code, 128 + 9);
        with_timeout(watcher.join()).await.unwrap();

        // The listener finishes after one round of hooks.
        with_timeout(async {
            while lifecycle.is_listening() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    });
}
