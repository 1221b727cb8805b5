//! Return queues and callback delivery.
//!
//! Drivers finish requests from whatever context they run on; `done()`
//! lands here. Unless the client asked for immediate delivery, the
//! request goes onto a lock-free return queue and a callback worker runs
//! the client callback later, so slow client code never holds up a
//! driver's completion path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use kcrypto_core::request::op_flags;
use kcrypto_core::{CompletionSink, CryptoOp, DriverId, KeyOp};
use tracing::{error, trace};

use crate::parking::Parking;
use crate::stats::{bump, Stats};
use crate::table::DriverTable;

pub(crate) struct ReturnQueues {
    sym: SegQueue<CryptoOp>,
    asym: SegQueue<KeyOp>,
    /// Requests sitting in either queue.
    depth: AtomicUsize,
    /// Accepted requests whose callback has not run yet.
    inflight: AtomicUsize,
    max_depth: usize,
    parking: Parking,
    table: Arc<DriverTable>,
    stats: Arc<Stats>,
}

impl ReturnQueues {
    pub fn new(max_depth: usize, table: Arc<DriverTable>, stats: Arc<Stats>) -> Self {
        Self {
            sym: SegQueue::new(),
            asym: SegQueue::new(),
            depth: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            max_depth,
            parking: Parking::new(),
            table,
            stats,
        }
    }

    /// A request was accepted; its callback is now owed.
    #[inline]
    pub fn track(&self) {
        self.inflight.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Room left for more completions.
    #[inline]
    pub fn request_allowed(&self) -> bool {
        self.depth() < self.max_depth
    }

    fn immediate(&self, flags: u32, driver: Option<DriverId>) -> bool {
        if flags & op_flags::CALLBACK_IMMEDIATE != 0 {
            return true;
        }
        flags & op_flags::CALLBACK_IF_SYNC != 0 && driver.is_some_and(|id| self.table.is_sync(id))
    }

    fn delivered(&self) {
        bump(&self.stats.callbacks);
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Deliver at most one symmetric and one asymmetric completion.
    fn run_batch(&self) -> usize {
        let mut n = 0;
        if let Some(mut op) = self.sym.pop() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            op.set_on_return_queue(false);
            run_guarded(move || op.deliver());
            self.delivered();
            n += 1;
        }
        if let Some(mut kop) = self.asym.pop() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            kop.set_on_return_queue(false);
            run_guarded(move || kop.deliver());
            self.delivered();
            n += 1;
        }
        n
    }

    /// Drain the return queues on the calling thread.
    pub fn run_callbacks(&self) -> usize {
        let mut total = 0;
        loop {
            let n = self.run_batch();
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    /// Callback worker body. Exits once `stop` is set and the queues are empty.
    pub fn worker_loop(&self, stop: &AtomicBool, idle: Duration) {
        loop {
            if self.run_batch() > 0 {
                continue;
            }
            if stop.load(Ordering::Acquire) {
                break;
            }
            self.parking.park(Some(idle));
        }
    }

    pub fn wake_all(&self) {
        self.parking.wake_all();
    }
}

/// Client callbacks may panic; a worker must survive that.
fn run_guarded<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("completion callback panicked");
    }
}

impl CompletionSink for ReturnQueues {
    fn complete_op(&self, mut op: CryptoOp) {
        if op.result().is_err() {
            bump(&self.stats.op_errors);
        }
        if self.immediate(op.flags(), Some(op.session().driver)) {
            bump(&self.stats.immediate);
            op.deliver();
            self.delivered();
            return;
        }
        trace!(session = %op.session(), "op queued for callback");
        op.set_on_return_queue(true);
        // counted before it is visible to a worker
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.sym.push(op);
        self.parking.wake_one();
    }

    fn complete_key_op(&self, mut kop: KeyOp) {
        if kop.result().is_err() {
            bump(&self.stats.kop_errors);
        }
        if self.immediate(kop.flags(), kop.driver()) {
            bump(&self.stats.immediate);
            kop.deliver();
            self.delivered();
            return;
        }
        kop.set_on_return_queue(true);
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.asym.push(kop);
        self.parking.wake_one();
    }
}
