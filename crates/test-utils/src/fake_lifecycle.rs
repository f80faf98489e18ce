use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use procwatch::{HookId, HostLifecycle, ShutdownHook};

/// A host lifecycle that never terminates the test process:
/// - records how many hooks were registered / de-registered
/// - runs the currently registered hooks only when `fire_all` is called.
#[derive(Default)]
pub struct FakeLifecycle {
    hooks: Mutex<BTreeMap<HookId, ShutdownHook>>,
    next_id: AtomicU64,
    registered: AtomicU64,
    deregistered: AtomicU64,
}

impl std::fmt::Debug for FakeLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeLifecycle")
            .field("pending", &self.pending())
            .field("registered", &self.registered())
            .field("deregistered", &self.deregistered())
            .finish()
    }
}

impl FakeLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks currently registered (neither run nor de-registered).
    pub fn pending(&self) -> usize {
        self.hooks.lock().unwrap().len()
    }

    pub fn registered(&self) -> u64 {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn deregistered(&self) -> u64 {
        self.deregistered.load(Ordering::SeqCst)
    }

    /// Simulate abnormal host termination: run every registered hook.
    pub async fn fire_all(&self) -> usize {
        let hooks: Vec<ShutdownHook> = {
            let mut guard = self.hooks.lock().unwrap();
            std::mem::take(&mut *guard).into_values().collect()
        };
        let count = hooks.len();
        for hook in hooks {
            hook().await;
        }
        count
    }
}

impl HostLifecycle for FakeLifecycle {
    fn register(&self, hook: ShutdownHook) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.hooks.lock().unwrap().insert(id, hook);
        self.registered.fetch_add(1, Ordering::SeqCst);
        id
    }

    fn deregister(&self, id: HookId) -> bool {
        let removed = self.hooks.lock().unwrap().remove(&id).is_some();
        if removed {
            self.deregistered.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }
}
