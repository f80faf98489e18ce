// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod logging;
pub mod types;
pub mod watcher;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_or_default, parse_duration};
use crate::errors::WatcherError;

pub use crate::types::Stream;
pub use crate::watcher::{
    ExitListener, HookId, HostLifecycle, OutputListener, ProcessWatcher, ShutdownHook,
    SignalLifecycle, WatcherOptions, strip_escape_sequences, with_pty,
};

/// Effective settings for one CLI run: config file values with CLI flags
/// applied on top.
#[derive(Debug, Clone)]
struct RunSettings {
    command: Vec<String>,
    strip_escapes: bool,
    terminate_timeout: Duration,
    wait: Option<(Regex, Stream)>,
}

impl RunSettings {
    fn resolve(cfg: &ConfigFile, args: &CliArgs) -> Result<Self> {
        let pty = args.pty || cfg.watcher.pty;
        let command = if pty {
            with_pty(&args.command.join(" "))
        } else {
            args.command.clone()
        };

        let terminate_timeout = match &args.terminate_timeout {
            Some(s) => parse_duration(s)
                .map_err(|e| anyhow::anyhow!("--terminate-timeout: {e}"))?,
            None => cfg.watcher.terminate_timeout,
        };

        let wait = match &args.wait_for {
            Some(pattern) => {
                let re = Regex::new(pattern)
                    .with_context(|| format!("--wait-for {pattern:?} is not a valid regex"))?;
                let stream = args
                    .wait_stream
                    .or(cfg.wait.as_ref().map(|w| w.stream))
                    .unwrap_or_default();
                Some((re, stream))
            }
            None => cfg.wait.as_ref().map(|w| {
                (w.pattern.clone(), args.wait_stream.unwrap_or(w.stream))
            }),
        };

        Ok(Self {
            command,
            strip_escapes: args.strip_escapes || cfg.watcher.strip_escape_sequences,
            terminate_timeout,
            wait,
        })
    }
}

/// High-level entry point used by `main.rs`.
///
/// Runs the command, echoes its output, forwards our stdin to it and returns
/// its exit code once both output streams are drained.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_or_default(args.config.as_deref().map(Path::new))?;
    let settings = RunSettings::resolve(&cfg, &args)?;
    debug!(?settings, "resolved run settings");

    let watcher = Arc::new(
        ProcessWatcher::new(settings.command.clone()).with_options(cfg.watcher_options()),
    );

    let strip = settings.strip_escapes;
    watcher.add_stdout_listener(move |line: &str, _: Stream| {
        println!("{}", render_line(line, strip));
    });
    watcher.add_stderr_listener(move |line: &str, _: Stream| {
        eprintln!("{}", render_line(line, strip));
    });
    watcher.add_exit_listener(|code: i32| {
        eprintln!();
        eprintln!("Process exited with code {code}.");
    });

    watcher.start()?;
    info!(pid = ?watcher.pid(), "command started");

    if let Some((pattern, stream)) = settings.wait.clone() {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move {
            match watcher.wait_for_line(&pattern, stream).await {
                Ok(()) => info!(%stream, pattern = %pattern, "awaited line appeared"),
                Err(WatcherError::NoMatch(p)) => {
                    warn!(%stream, pattern = %p, "process exited before awaited line appeared")
                }
                Err(e) => warn!(%stream, error = %e, "waiting for line failed"),
            }
        });
    }

    let forwarder = tokio::spawn(forward_stdin(
        Arc::clone(&watcher),
        settings.terminate_timeout,
    ));

    let code = watcher.wait_for_process().await?;
    watcher.join().await?;
    forwarder.abort();

    Ok(code)
}

fn render_line(line: &str, strip: bool) -> std::borrow::Cow<'_, str> {
    if strip {
        strip_escape_sequences(line).into()
    } else {
        line.into()
    }
}

/// Forward our stdin to the child line by line; on EOF close the child's
/// stdin and give it `terminate_timeout` to exit.
async fn forward_stdin(watcher: Arc<ProcessWatcher>, terminate_timeout: Duration) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("forwarding line to child stdin");
                if let Err(e) = watcher.send_line(&line).await {
                    warn!(error = %e, "could not forward stdin; stopping");
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "reading stdin failed");
                break;
            }
        }
    }

    debug!("stdin closed; closing child stdin");
    if let Err(e) = watcher.close_stdin_and_terminate(terminate_timeout).await {
        warn!(error = %e, "closing child stdin failed");
    }
}
