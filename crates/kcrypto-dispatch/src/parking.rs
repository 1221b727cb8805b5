//! Thread parking for the dispatcher and callback workers.
//!
//! A thread with nothing to do calls `park()`. Producers (submit,
//! unblock, completion) call `wake_one()` / `wake_all()`. A wake that
//! arrives while nobody is parked is remembered, so the next `park()`
//! returns at once instead of sleeping through it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub struct Parking {
    /// wake pending
    pending: Mutex<bool>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl Parking {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    /// Park until woken or `timeout` elapses.
    ///
    /// Returns `true` if woken by a signal. Callers re-check for work
    /// either way.
    pub fn park(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock();
        if *pending {
            *pending = false;
            return true;
        }

        self.parked.fetch_add(1, Ordering::SeqCst);
        match timeout {
            Some(t) => {
                self.condvar.wait_for(&mut pending, t);
            }
            None => self.condvar.wait(&mut pending),
        }
        self.parked.fetch_sub(1, Ordering::SeqCst);

        let woken = *pending;
        *pending = false;
        woken
    }

    pub fn wake_one(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.condvar.notify_one();
    }

    pub fn wake_all(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.condvar.notify_all();
    }

    #[cfg(test)]
    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}

impl Default for Parking {
    fn default() -> Self {
        Self::new()
    }
}
