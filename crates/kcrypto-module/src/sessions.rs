//! Driver-local session bookkeeping shared by the default drivers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use kcrypto_core::{OpError, SessionInit};
use parking_lot::Mutex;

use crate::engine::Engine;

#[derive(Debug, Default)]
pub(crate) struct SessionSet {
    next: AtomicU32,
    open: Mutex<BTreeSet<u32>>,
}

impl SessionSet {
    /// Validate `chain` against `engine` and hand out a fresh local id.
    pub fn open<E: Engine>(&self, engine: &E, chain: &[SessionInit]) -> Result<u32, OpError> {
        if chain.is_empty() {
            return Err(OpError::InvalidArgument);
        }
        if let Some(init) = chain.iter().find(|init| !engine.supports(init.alg)) {
            tracing::debug!(alg = ?init.alg, "session refused");
            return Err(OpError::NotSupported);
        }
        let mut open = self.open.lock();
        // skip ids still in use after wrap-around
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if open.insert(id) {
                return Ok(id);
            }
        }
    }

    pub fn close(&self, local: u32) -> Result<(), OpError> {
        if self.open.lock().remove(&local) {
            Ok(())
        } else {
            Err(OpError::InvalidArgument)
        }
    }

    pub fn contains(&self, local: u32) -> bool {
        self.open.lock().contains(&local)
    }

    pub fn len(&self) -> usize {
        self.open.lock().len()
    }
}
