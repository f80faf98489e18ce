// src/watcher/listeners.rs

//! Output and exit callbacks, and the registry that holds them.
//!
//! Registration order is dispatch order. Duplicates are allowed: a listener
//! registered twice is called twice per line.

use std::sync::{Arc, PoisonError, RwLock};

use crate::types::Stream;

/// Receives every line the child writes on a stream.
///
/// Called synchronously on the reader task of that stream; a slow listener
/// delays the next line of the same stream.
pub trait OutputListener: Send + Sync {
    fn on_line(&self, line: &str, stream: Stream);
}

impl<F> OutputListener for F
where
    F: Fn(&str, Stream) + Send + Sync,
{
    fn on_line(&self, line: &str, stream: Stream) {
        self(line, stream)
    }
}

/// Receives the child's exit code, once, after both streams are drained.
pub trait ExitListener: Send + Sync {
    fn on_exit(&self, exit_code: i32);
}

impl<F> ExitListener for F
where
    F: Fn(i32) + Send + Sync,
{
    fn on_exit(&self, exit_code: i32) {
        self(exit_code)
    }
}

type OutputList = RwLock<Vec<Arc<dyn OutputListener>>>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    stdout: OutputList,
    stderr: OutputList,
    exit: RwLock<Vec<Arc<dyn ExitListener>>>,
}

impl ListenerRegistry {
    pub(crate) fn add_output(&self, stream: Stream, listener: Arc<dyn OutputListener>) {
        self.list(stream)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub(crate) fn add_exit(&self, listener: Arc<dyn ExitListener>) {
        self.exit
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Deliver one line to every listener of `stream`.
    ///
    /// Iterates a snapshot so listeners may register further listeners from
    /// inside a callback; those see the next line.
    pub(crate) fn dispatch_line(&self, stream: Stream, line: &str) {
        let snapshot = self
            .list(stream)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in snapshot {
            listener.on_line(line, stream);
        }
    }

    pub(crate) fn dispatch_exit(&self, exit_code: i32) {
        let snapshot = self
            .exit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in snapshot {
            listener.on_exit(exit_code);
        }
    }

    fn list(&self, stream: Stream) -> &OutputList {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn dispatches_in_registration_order_including_duplicates() {
        let registry = ListenerRegistry::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first: Arc<dyn OutputListener> = {
            let seen = Arc::clone(&seen);
            Arc::new(move |line: &str, _: Stream| seen.lock().unwrap().push(format!("1:{line}")))
        };
        let second: Arc<dyn OutputListener> = {
            let seen = Arc::clone(&seen);
            Arc::new(move |line: &str, _: Stream| seen.lock().unwrap().push(format!("2:{line}")))
        };

        registry.add_output(Stream::Stdout, Arc::clone(&first));
        registry.add_output(Stream::Stdout, second);
        registry.add_output(Stream::Stdout, first);

        registry.dispatch_line(Stream::Stdout, "x");
        registry.dispatch_line(Stream::Stderr, "ignored");

        assert_eq!(*seen.lock().unwrap(), vec!["1:x", "2:x", "1:x"]);
    }

    #[test]
    fn listener_added_during_dispatch_sees_next_line_only() {
        let registry = Arc::new(ListenerRegistry::default());
        let late_lines = Arc::new(Mutex::new(Vec::new()));

        let registering: Arc<dyn OutputListener> = {
            let registry = Arc::downgrade(&registry);
            let late_lines = Arc::clone(&late_lines);
            Arc::new(move |line: &str, stream: Stream| {
                if line != "first" {
                    return;
                }
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                let late_lines = Arc::clone(&late_lines);
                registry.add_output(
                    stream,
                    Arc::new(move |l: &str, _: Stream| late_lines.lock().unwrap().push(l.to_string())),
                );
            })
        };
        registry.add_output(Stream::Stderr, registering);

        registry.dispatch_line(Stream::Stderr, "first");
        registry.dispatch_line(Stream::Stderr, "second");

        assert_eq!(*late_lines.lock().unwrap(), vec!["second".to_string()]);
    }

    #[test]
    fn exit_listeners_receive_code() {
        let registry = ListenerRegistry::default();
        let codes = Arc::new(Mutex::new(Vec::new()));
        {
            let codes = Arc::clone(&codes);
            registry.add_exit(Arc::new(move |code: i32| codes.lock().unwrap().push(code)));
        }

        registry.dispatch_exit(3);

        assert_eq!(*codes.lock().unwrap(), vec![3]);
    }
}
