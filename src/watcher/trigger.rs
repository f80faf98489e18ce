// src/watcher/trigger.rs

//! Pending "wait until a line matches" requests for one stream.
//!
//! Each request owns the receiving half of a oneshot channel; the registry
//! keeps the sending half. A reader task sends `true` when a line fully
//! matches, the finalizer sends `false` once the process has exited. The
//! waiter, not the reader, removes the entry again (see [`PendingTrigger`]).

use std::sync::{Mutex, MutexGuard, PoisonError};

use regex::Regex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{Result, WatcherError};
use crate::types::Stream;

struct TriggerLine {
    id: u64,
    pattern: Regex,
    /// Taken on release; a fired trigger stays listed until its waiter
    /// unregisters it.
    signal: Option<oneshot::Sender<bool>>,
}

#[derive(Default)]
struct TriggerSet {
    next_id: u64,
    pending: Vec<TriggerLine>,
}

pub(crate) struct TriggerRegistry {
    stream: Stream,
    inner: Mutex<TriggerSet>,
}

impl TriggerRegistry {
    pub(crate) fn new(stream: Stream) -> Self {
        Self {
            stream,
            inner: Mutex::new(TriggerSet::default()),
        }
    }

    /// Register a trigger, provided `is_active` still holds.
    ///
    /// `is_active` is evaluated under the collection lock. The finalizer
    /// releases triggers under the same lock only after exit has been
    /// published, so a trigger registered here is always released later.
    pub(crate) fn register(
        &self,
        pattern: Regex,
        is_active: impl FnOnce() -> bool,
    ) -> Result<PendingTrigger<'_>> {
        let mut set = self.lock();
        if !is_active() {
            return Err(WatcherError::AlreadyTerminated);
        }

        let (tx, rx) = oneshot::channel();
        let id = set.next_id;
        set.next_id += 1;

        debug!(stream = %self.stream, pattern = %pattern, id, "trigger registered");
        set.pending.push(TriggerLine {
            id,
            pattern,
            signal: Some(tx),
        });

        Ok(PendingTrigger {
            registry: self,
            id,
            signal: rx,
        })
    }

    /// Release every trigger whose pattern matches `line`. Returns how many fired.
    pub(crate) fn fire_matching(&self, line: &str) -> usize {
        let mut set = self.lock();
        let mut fired = 0;

        for trigger in set.pending.iter_mut() {
            if trigger.signal.is_none() || !trigger.pattern.is_match(line) {
                continue;
            }
            if let Some(signal) = trigger.signal.take() {
                // A dropped receiver means the waiter went away; its guard
                // removes the entry.
                let _ = signal.send(true);
                fired += 1;
            }
        }

        if fired > 0 {
            debug!(stream = %self.stream, fired, "line released triggers");
        }
        fired
    }

    /// Release every still-pending trigger with "no match".
    pub(crate) fn release_all(&self) -> usize {
        let mut set = self.lock();
        let mut released = 0;

        for trigger in set.pending.iter_mut() {
            if let Some(signal) = trigger.signal.take() {
                let _ = signal.send(false);
                released += 1;
            }
        }

        if released > 0 {
            debug!(stream = %self.stream, released, "released pending triggers on exit");
        }
        released
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().pending.len()
    }

    fn unregister(&self, id: u64) {
        self.lock().pending.retain(|t| t.id != id);
    }

    fn lock(&self) -> MutexGuard<'_, TriggerSet> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered trigger owned by the waiting caller.
///
/// Dropping it (after the wait resolved, or because the wait future was
/// dropped) removes the trigger from its collection.
pub(crate) struct PendingTrigger<'a> {
    registry: &'a TriggerRegistry,
    id: u64,
    signal: oneshot::Receiver<bool>,
}

impl PendingTrigger<'_> {
    /// Wait for release. `true` means a line matched.
    pub(crate) async fn matched(&mut self) -> bool {
        // A sender dropped without sending only happens when the whole
        // watcher is torn down; report it as no match.
        (&mut self.signal).await.unwrap_or(false)
    }
}

impl Drop for PendingTrigger<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Compile a pattern so that it only matches a whole line.
///
/// Rebuilt from `pattern.as_str()`: inline flags such as `(?i)` are kept,
/// options set through `RegexBuilder` are not.
pub(crate) fn anchored(pattern: &Regex) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})$", pattern.as_str()))?)
}

/// Compile a pattern matching exactly `line`.
pub(crate) fn literal(line: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^{}$", regex::escape(line)))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(s: &str) -> Regex {
        anchored(&Regex::new(s).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn matching_line_releases_with_true() {
        let registry = TriggerRegistry::new(Stream::Stdout);
        let mut pending = registry.register(re("rea.y"), || true).unwrap();

        assert_eq!(registry.fire_matching("not ready"), 0);
        assert_eq!(registry.fire_matching("ready"), 1);
        assert!(pending.matched().await);

        // Still listed until the waiter drops its guard.
        assert_eq!(registry.len(), 1);
        drop(pending);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn release_all_reports_no_match() {
        let registry = TriggerRegistry::new(Stream::Stderr);
        let mut a = registry.register(re("a"), || true).unwrap();
        let mut b = registry.register(re("b"), || true).unwrap();

        assert_eq!(registry.fire_matching("b"), 1);
        assert_eq!(registry.release_all(), 1);

        assert!(!a.matched().await);
        assert!(b.matched().await);
    }

    #[test]
    fn registration_refused_when_inactive() {
        let registry = TriggerRegistry::new(Stream::Stdout);
        let result = registry.register(re("x"), || false);
        assert!(matches!(result, Err(WatcherError::AlreadyTerminated)));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn fired_trigger_does_not_fire_twice() {
        let registry = TriggerRegistry::new(Stream::Stdout);
        let _pending = registry.register(re("x"), || true).unwrap();
        assert_eq!(registry.fire_matching("x"), 1);
        assert_eq!(registry.fire_matching("x"), 0);
        assert_eq!(registry.release_all(), 0);
    }

    #[test]
    fn anchoring_requires_whole_line() {
        let alternation = re("a|ab");
        assert!(alternation.is_match("ab"));
        assert!(!re("ready").is_match("already ready"));

        let exact = literal("1+1 = 2?").unwrap();
        assert!(exact.is_match("1+1 = 2?"));
        assert!(!exact.is_match("11 = 2"));
    }

    #[test]
    fn only_inline_flags_survive_anchoring() {
        assert!(re("(?i)ready").is_match("READY"));

        let built = regex::RegexBuilder::new("ready")
            .case_insensitive(true)
            .build()
            .unwrap();
        assert!(built.is_match("READY"));
        assert!(!anchored(&built).unwrap().is_match("READY"));
    }
}
