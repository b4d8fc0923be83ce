use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Disposal state shared by a session and every task it spawned.
///
/// Writes made through `while_live` never interleave with `dispose`: once
/// `dispose` has returned, nothing issued through this lifecycle reaches the
/// channel any more, whatever thread the writer runs on.
#[derive(Debug, Default)]
pub struct Lifecycle {
    disposed: Mutex<bool>,
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.disposed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_disposed(&self) -> bool {
        *self.lock()
    }

    /// Run `f` unless disposed, holding off `dispose` until it returns.
    pub fn while_live<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let disposed = self.lock();
        if *disposed {
            return None;
        }
        Some(f())
    }

    /// Mark as disposed and run `teardown` before any pending live work
    /// can resume. Returns false when already disposed.
    pub fn dispose(&self, teardown: impl FnOnce()) -> bool {
        let mut disposed = self.lock();
        if *disposed {
            return false;
        }
        *disposed = true;
        teardown();
        true
    }
}
