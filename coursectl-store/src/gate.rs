//! Exactly-once initialization shared by concurrent callers.
//!
//! Fast path reads an atomic flag without locking. Slow path takes the
//! init lock, re-checks the flag, and only then runs the initializer. A
//! failed initializer leaves the flag unset, so the next caller retries.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub struct InitGate<T> {
    ready: AtomicBool,
    init_lock: Mutex<()>,
    value: RwLock<Option<T>>,
}

impl<T: Clone> InitGate<T> {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            value: RwLock::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Return the initialized value, running `init` first if nobody has.
    ///
    /// At most one `init` runs at a time; callers queued on the lock see the
    /// winner's value instead of running their own.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.is_ready() {
            if let Some(value) = self.value.read().await.clone() {
                return Ok(value);
            }
        }

        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            if let Some(value) = self.value.read().await.clone() {
                debug!("Initialized by a concurrent caller");
                return Ok(value);
            }
        }

        let value = init().await?;
        *self.value.write().await = Some(value.clone());
        self.ready.store(true, Ordering::Release);
        Ok(value)
    }

    /// Remove the value and clear the flag. Waits for an in-flight
    /// initialization to finish first.
    pub async fn take(&self) -> Option<T> {
        let _guard = self.init_lock.lock().await;
        self.ready.store(false, Ordering::Release);
        self.value.write().await.take()
    }
}

impl<T: Clone> Default for InitGate<T> {
    fn default() -> Self {
        Self::new()
    }
}
