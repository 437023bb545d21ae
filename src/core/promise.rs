//! One-shot promise/future pair used by reader requests.
//!
//! The worker owns the `Promise` and fulfills it exactly once. The consumer
//! holds a `Future` and polls it from the player tick (`try_get`) or blocks
//! on it (`wait`). Futures are shared: every clone observes the same value.
//!
//! A promise dropped without being fulfilled resolves its future with
//! `T::default()`, so a consumer never waits on a broken request.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Shared<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn set(&self, value: T) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(value);
            self.ready.notify_all();
        }
    }
}

/// Create a connected promise/future pair.
pub fn channel<T: Default>() -> (Promise<T>, Future<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        Future { shared },
    )
}

/// Write side.
pub struct Promise<T: Default> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Default> Promise<T> {
    pub fn fulfill(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            shared.set(value);
        }
    }
}

impl<T: Default> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.set(T::default());
        }
    }
}

impl<T: Default> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("pending", &self.shared.is_some())
            .finish()
    }
}

/// Read side, cheap to clone.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ready = self
            .shared
            .slot
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false);
        f.debug_struct("Future").field("ready", &ready).finish()
    }
}

impl<T: Clone + Default> Future<T> {
    /// Already-resolved future.
    pub fn ready(value: T) -> Self {
        let (promise, future) = channel();
        promise.fulfill(value);
        future
    }

    pub fn is_ready(&self) -> bool {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Non-blocking poll.
    pub fn try_get(&self) -> Option<T> {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Block until resolved.
    pub fn wait(&self) -> T {
        let slot = self.shared.slot.lock().unwrap_or_else(|e| e.into_inner());
        let slot = self
            .shared
            .ready
            .wait_while(slot, |v| v.is_none())
            .unwrap_or_else(|e| e.into_inner());
        slot.clone().unwrap_or_default()
    }

    /// Block until resolved or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let slot = self.shared.slot.lock().unwrap_or_else(|e| e.into_inner());
        let (slot, _) = self
            .shared
            .ready
            .wait_timeout_while(slot, timeout, |v| v.is_none())
            .unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }
}
