// src/watcher/reader.rs

//! Background tasks that drain the child's stdout / stderr.
//!
//! Every line is first handed to the stream's output listeners, then checked
//! against the stream's pending triggers. After end-of-stream each task waits
//! for the process to exit. Exactly one task carries the [`Finalizer`] role
//! and, once its peer is done too, releases all remaining triggers and calls
//! the exit listeners.

use std::borrow::Cow;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::types::Stream;
use crate::watcher::Shared;
use crate::watcher::controller::wait_for_exit;

/// Readers per watcher: one for stdout, one for stderr.
pub(crate) const READER_COUNT: usize = 2;

/// Marks a reader as finished when dropped, including by a panic.
struct FinishedGuard(Arc<Shared>);

impl Drop for FinishedGuard {
    fn drop(&mut self) {
        self.0.readers_done.send_modify(|finished| *finished += 1);
    }
}

/// What a reader does once its stream ended and the process exited.
pub(crate) enum ReaderRole {
    /// Signal the finalizer that this stream is fully delivered.
    Peer(oneshot::Sender<()>),
    Finalizer(Finalizer),
}

pub(crate) struct Finalizer {
    peer_done: oneshot::Receiver<()>,
}

impl Finalizer {
    async fn finish(self, shared: &Shared, exit_code: i32) {
        // Err means the peer task died (e.g. a panicking listener); its
        // stream delivers nothing more either way.
        if self.peer_done.await.is_err() {
            warn!("peer reader ended abnormally");
        }

        shared.stdout_triggers.release_all();
        shared.stderr_triggers.release_all();
        shared.controller.release_shutdown_hook();

        debug!(exit_code, "invoking exit listeners");
        shared.listeners.dispatch_exit(exit_code);
    }
}

/// Create the role pair: the peer signal for one reader, the finalizer for
/// the other.
pub(crate) fn roles() -> (ReaderRole, ReaderRole) {
    let (tx, rx) = oneshot::channel();
    (
        ReaderRole::Peer(tx),
        ReaderRole::Finalizer(Finalizer { peer_done: rx }),
    )
}

pub(crate) fn spawn_reader<R>(
    stream: Stream,
    source: R,
    shared: Arc<Shared>,
    mut exit_rx: watch::Receiver<Option<i32>>,
    role: ReaderRole,
)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let _finished = FinishedGuard(Arc::clone(&shared));
        let lines = drain_lines(stream, source, &shared).await;
        debug!(%stream, lines, "stream ended; waiting for process exit");

        let exit_code = match wait_for_exit(&mut exit_rx).await {
            Ok(code) => code,
            Err(e) => {
                warn!(%stream, error = %e, "exit status unavailable");
                -1
            }
        };

        match role {
            ReaderRole::Peer(done) => {
                let _ = done.send(());
            }
            ReaderRole::Finalizer(finalizer) => finalizer.finish(&shared, exit_code).await,
        }
        debug!(%stream, "reader finished");
    });
}

/// Read until end-of-stream, dispatching every line. Returns the line count.
///
/// Read errors end the stream; they are logged, not propagated.
async fn drain_lines<R>(stream: Stream, source: R, shared: &Shared) -> u64
where
    R: AsyncRead + Unpin,
{
    let triggers = shared.triggers(stream);
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                debug!(%stream, "{}", line);

                shared.listeners.dispatch_line(stream, &line);
                triggers.fire_matching(&line);
                count += 1;
            }
            Err(e) => {
                warn!(%stream, error = %e, "read failed; treating as end of stream");
                break;
            }
        }
    }

    count
}

/// Strip the line terminator (`\n` or `\r\n`) and decode as UTF-8, replacing
/// invalid sequences.
fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end])
}
