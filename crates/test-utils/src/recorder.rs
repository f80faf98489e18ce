use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use procwatch::{ProcessWatcher, Stream};

/// One observed output line, stamped with a logical clock tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLine {
    pub tick: u64,
    pub stream: Stream,
    pub line: String,
}

/// Records output lines and exit notifications of a watcher against a
/// shared logical clock, so tests can compare "last line delivered" with
/// "exit listener ran".
#[derive(Debug, Default)]
pub struct OutputRecorder {
    clock: AtomicU64,
    lines: Mutex<Vec<RecordedLine>>,
    exits: Mutex<Vec<(u64, i32)>>,
}

impl OutputRecorder {
    /// Create a recorder and register it on both streams and as exit listener.
    pub fn attach(watcher: &ProcessWatcher) -> Arc<Self> {
        let recorder = Arc::new(Self::default());

        let r = Arc::clone(&recorder);
        watcher.add_universal_listener(move |line: &str, stream: Stream| r.record_line(line, stream));

        let r = Arc::clone(&recorder);
        watcher.add_exit_listener(move |code: i32| r.record_exit(code));

        recorder
    }

    pub fn record_line(&self, line: &str, stream: Stream) {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        self.lines.lock().unwrap().push(RecordedLine {
            tick,
            stream,
            line: line.to_string(),
        });
    }

    pub fn record_exit(&self, code: i32) {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        self.exits.lock().unwrap().push((tick, code));
    }

    pub fn lines(&self) -> Vec<RecordedLine> {
        self.lines.lock().unwrap().clone()
    }

    /// Lines of one stream, in delivery order.
    pub fn lines_of(&self, stream: Stream) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.line.clone())
            .collect()
    }

    /// `(tick, exit_code)` for every exit notification received.
    pub fn exits(&self) -> Vec<(u64, i32)> {
        self.exits.lock().unwrap().clone()
    }

    pub fn last_line_tick(&self) -> Option<u64> {
        self.lines.lock().unwrap().iter().map(|l| l.tick).max()
    }
}
