// tests/watcher_triggers.rs

use std::error::Error;
use std::sync::Arc;

use procwatch::errors::WatcherError;
use procwatch::{ProcessWatcher, Stream};
use procwatch_test_utils::{FakeLifecycle, init_tracing, with_timeout};
use regex::Regex;
use tokio::time::{Duration, sleep, timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn sh(script: &str) -> Arc<ProcessWatcher> {
    Arc::new(
        ProcessWatcher::new(["sh", "-c", script]).with_lifecycle(Arc::new(FakeLifecycle::new())),
    )
}

/// Block until `n` waits are registered on `stream`, so that the scripts
/// below (which hold their output until they read a line) cannot race them.
async fn registered(watcher: &ProcessWatcher, stream: Stream, n: usize) {
    with_timeout(async {
        while watcher.pending_triggers(stream) < n {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

#[tokio::test]
async fn waiting_before_start_is_not_running() -> TestResult {
    init_tracing();

    let watcher = sh("echo ready");
    let res = watcher.wait_for_exact_line_stdout("ready").await;
    assert!(
        matches!(res, Err(WatcherError::NotRunning)),
        "expected NotRunning, got {:?}",
        res
    );
    Ok(())
}

/// A process prints "ready" and keeps running: the wait returns while it is
/// still alive. After terminate, new waits fail with AlreadyTerminated.
#[cfg(unix)]
#[tokio::test]
async fn ready_line_releases_wait_before_termination() -> TestResult {
    init_tracing();

    let watcher = sh("echo starting; read _go; echo ready; exec sleep 30");
    watcher.start()?;

    let waiter = {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move { watcher.wait_for_exact_line_stdout("ready").await })
    };
    registered(&watcher, Stream::Stdout, 1).await;
    watcher.send_line("go").await?;

    with_timeout(waiter).await??;
    assert!(
        watcher.is_active(),
        "process should still be running after 'ready'"
    );

    watcher.terminate()?;
    let code = with_timeout(watcher.wait_for_process()).await?;
    assert_eq!(code, 128 + 15, "SIGTERM exit should be reported as 143");

    let res = watcher.wait_for_exact_line_stdout("anything").await;
    assert!(
        matches!(res, Err(WatcherError::AlreadyTerminated)),
        "expected AlreadyTerminated, got {:?}",
        res
    );

    with_timeout(watcher.join()).await?;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn pending_wait_fails_with_no_match_when_process_exits() -> TestResult {
    init_tracing();

    // Blocks on stdin until we close it.
    let watcher = sh("echo nope; read _line; echo still-nope");
    watcher.start()?;

    let waiter = {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move { watcher.wait_for_exact_line_stdout("never").await })
    };
    registered(&watcher, Stream::Stdout, 1).await;
    watcher.close_stdin().await?;

    let res = with_timeout(waiter).await?;
    assert!(
        matches!(res, Err(WatcherError::NoMatch(_))),
        "expected NoMatch, got {:?}",
        res
    );
    assert_eq!(watcher.pending_triggers(Stream::Stdout), 0);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn wait_after_exit_fails_without_blocking() -> TestResult {
    init_tracing();

    let watcher = sh("exit 0");
    watcher.start()?;
    with_timeout(watcher.wait_for_process()).await?;

    let res = with_timeout(watcher.wait_for_line_stderr(&Regex::new(".*")?)).await;
    assert!(
        matches!(res, Err(WatcherError::AlreadyTerminated)),
        "expected AlreadyTerminated, got {:?}",
        res
    );
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn regex_waits_require_a_whole_line_match() -> TestResult {
    init_tracing();

    let watcher = sh("read _go; echo 'listening on port 8080'; echo 'port 8080'; exec sleep 30");
    watcher.start()?;

    let seen_first = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let seen_first = Arc::clone(&seen_first);
        watcher.add_stdout_listener(move |line: &str, _: Stream| {
            seen_first.lock().unwrap().push(line.to_string());
        });
    }

    let waiter = {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move { watcher.wait_for_line_stdout(&Regex::new(r"port \d+")?).await })
    };
    registered(&watcher, Stream::Stdout, 1).await;
    watcher.send_line("go").await?;

    with_timeout(waiter).await??;

    // The substring match on the first line must not have released the wait;
    // by the time it returns, both lines were seen.
    assert_eq!(
        *seen_first.lock().unwrap(),
        vec!["listening on port 8080".to_string(), "port 8080".to_string()]
    );

    watcher.kill()?;
    with_timeout(watcher.join()).await?;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn stderr_waits_only_see_stderr() -> TestResult {
    init_tracing();

    let watcher = sh("read _go; echo warn; echo error >&2; echo warn >&2; exec sleep 30");
    watcher.start()?;

    let waiter = {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move { watcher.wait_for_exact_line_stderr("warn").await })
    };
    registered(&watcher, Stream::Stderr, 1).await;
    watcher.send_line("go").await?;

    with_timeout(waiter).await??;
    watcher.kill()?;
    with_timeout(watcher.join()).await?;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn several_waiters_on_the_same_line_all_return() -> TestResult {
    init_tracing();

    let watcher = sh("read _go; echo ready; exec sleep 30");
    watcher.start()?;

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let watcher = Arc::clone(&watcher);
        waiters.push(tokio::spawn(async move {
            watcher.wait_for_exact_line_stdout("ready").await
        }));
    }
    registered(&watcher, Stream::Stdout, 3).await;
    watcher.send_line("go").await?;

    for waiter in waiters {
        with_timeout(waiter).await??;
    }
    assert_eq!(watcher.pending_triggers(Stream::Stdout), 0);

    watcher.kill()?;
    with_timeout(watcher.join()).await?;
    Ok(())
}

/// Dropping a wait future (here via `timeout`) removes its trigger.
#[cfg(unix)]
#[tokio::test]
async fn abandoned_wait_unregisters_its_trigger() -> TestResult {
    init_tracing();

    let watcher = sh("exec sleep 30");
    watcher.start()?;

    let res = timeout(
        Duration::from_millis(100),
        watcher.wait_for_exact_line_stdout("never"),
    )
    .await;
    assert!(res.is_err(), "wait should have timed out");
    assert_eq!(watcher.pending_triggers(Stream::Stdout), 0);

    watcher.kill()?;
    assert_eq!(with_timeout(watcher.wait_for_process()).await?, 128 + 9);
    Ok(())
}
