//! Framework counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub ops: AtomicU64,
    pub op_errors: AtomicU64,
    pub kops: AtomicU64,
    pub kop_errors: AtomicU64,
    pub dispatch_passes: AtomicU64,
    pub callbacks: AtomicU64,
    pub immediate: AtomicU64,
    pub sym_blocks: AtomicU64,
    pub asym_blocks: AtomicU64,
    pub unblocks: AtomicU64,
    pub migrations: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Stats {
    pub fn snapshot(&self) -> FrameworkStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FrameworkStats {
            ops: get(&self.ops),
            op_errors: get(&self.op_errors),
            kops: get(&self.kops),
            kop_errors: get(&self.kop_errors),
            dispatch_passes: get(&self.dispatch_passes),
            callbacks: get(&self.callbacks),
            immediate: get(&self.immediate),
            sym_blocks: get(&self.sym_blocks),
            asym_blocks: get(&self.asym_blocks),
            unblocks: get(&self.unblocks),
            migrations: get(&self.migrations),
        }
    }
}

/// Point-in-time copy of the framework counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkStats {
    /// Symmetric ops accepted by `submit`
    pub ops: u64,
    /// Symmetric ops completed with an error (including `Again`)
    pub op_errors: u64,
    /// Key ops accepted by `submit_key`
    pub kops: u64,
    pub kop_errors: u64,
    /// Dispatch passes run
    pub dispatch_passes: u64,
    /// Callbacks delivered (worker and immediate)
    pub callbacks: u64,
    /// Of which delivered on the completing context
    pub immediate: u64,
    pub sym_blocks: u64,
    pub asym_blocks: u64,
    pub unblocks: u64,
    /// Sessions migrated away from an unregistered driver
    pub migrations: u64,
}
