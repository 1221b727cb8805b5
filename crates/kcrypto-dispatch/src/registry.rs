//! The framework state shared by clients, drivers and framework threads.
//!
//! `Registry` is what a driver registers with and what a client opens
//! sessions and submits requests against. It owns the driver table, the
//! submit queues and the return queues. It spawns nothing itself:
//! [`Framework`](crate::Framework) runs the dispatcher and callback
//! workers over it, and tests drive it by hand with
//! [`dispatch_pass`](Registry::dispatch_pass) and
//! [`run_callbacks`](Registry::run_callbacks).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kcrypto_core::driver::queue_kind;
use kcrypto_core::{
    CompletionSink, CryptoDesc, CryptoDriver, CryptoError, CryptoOp, DriverHost, DriverId,
    KeyAlgorithm, KeyOp, OpError, Result, SessionId,
};
use tracing::{debug, info};

use crate::config::FrameworkConfig;
use crate::parking::Parking;
use crate::queue::SubmitQueue;
use crate::ret::ReturnQueues;
use crate::stats::{bump, FrameworkStats, Stats};
use crate::table::{DriverInfo, DriverTable};

pub struct Registry {
    pub(crate) config: FrameworkConfig,
    pub(crate) table: Arc<DriverTable>,
    pub(crate) symq: SubmitQueue<CryptoOp>,
    pub(crate) asymq: SubmitQueue<KeyOp>,
    pub(crate) ret: Arc<ReturnQueues>,
    pub(crate) stats: Arc<Stats>,
    exiting: AtomicBool,
    /// Dispatcher wakeup.
    pub(crate) dispatch_wake: Parking,
}

impl Registry {
    pub fn new(config: FrameworkConfig) -> Arc<Self> {
        let table = Arc::new(DriverTable::new(config.initial_drivers));
        let stats = Arc::new(Stats::default());
        let ret = Arc::new(ReturnQueues::new(
            config.return_queue_max,
            Arc::clone(&table),
            Arc::clone(&stats),
        ));
        Arc::new(Self {
            config,
            table,
            symq: SubmitQueue::new(),
            asymq: SubmitQueue::new(),
            ret,
            stats,
            exiting: AtomicBool::new(false),
            dispatch_wake: Parking::new(),
        })
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    #[inline]
    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    pub(crate) fn begin_shutdown(&self) {
        self.exiting.store(true, Ordering::Release);
    }

    pub(crate) fn sink(&self) -> Arc<dyn CompletionSink> {
        Arc::clone(&self.ret) as Arc<dyn CompletionSink>
    }

    /// Wake the dispatcher.
    #[inline]
    pub(crate) fn kick(&self) {
        self.dispatch_wake.wake_one();
    }

    // ── driver registration ──

    /// Claim a driver slot. `flags` are `driver_flags` bits.
    pub fn register_driver(&self, flags: u32) -> Result<DriverId> {
        if self.is_exiting() {
            return Err(CryptoError::ShuttingDown);
        }
        let id = self.table.allocate(flags);
        info!(driver = %id, flags, "driver registered");
        Ok(id)
    }

    /// Announce support for a symmetric algorithm. The first call on a
    /// slot installs `driver` as the slot's entry points.
    pub fn register_algorithm(
        &self,
        id: DriverId,
        alg: u32,
        max_len: u32,
        flags: u32,
        driver: &Arc<dyn CryptoDriver>,
    ) -> Result<()> {
        self.table.register_algorithm(id, alg, max_len, flags, driver)
    }

    pub fn register_key_algorithm(
        &self,
        id: DriverId,
        alg: u32,
        flags: u32,
        driver: &Arc<dyn CryptoDriver>,
    ) -> Result<()> {
        self.table.register_key_algorithm(id, alg, flags, driver)
    }

    pub fn unregister_algorithm(&self, id: DriverId, alg: u32) -> Result<()> {
        self.table.unregister_algorithm(id, alg)?;
        // queued work for this driver may now need migrating
        self.kick();
        Ok(())
    }

    pub fn unregister_all(&self, id: DriverId) -> Result<()> {
        self.table.unregister_all(id)?;
        info!(driver = %id, "driver unregistered");
        self.kick();
        Ok(())
    }

    /// Clear block flags for the queues in `which` and retry queued work.
    pub fn unblock(&self, id: DriverId, which: u32) -> Result<()> {
        let cleared = self.table.unblock(id, which)?;
        bump(&self.stats.unblocks);
        if cleared != 0 {
            debug!(driver = %id, which = cleared, "driver unblocked");
        }
        self.kick();
        Ok(())
    }

    // ── introspection ──

    /// Union of key operations usable drivers support, as
    /// `KeyAlgorithm::feature_bit` bits.
    pub fn key_features(&self) -> Result<u32> {
        if !self.config.user_asym {
            return Err(CryptoError::PermissionDenied);
        }
        let mut features = 0;
        for slot in self.table.snapshot() {
            let cap = slot.cap.lock();
            if !cap.usable() || cap.key_driver.is_none() {
                continue;
            }
            if cap.is_software() && !self.config.allow_soft {
                continue;
            }
            for alg in KeyAlgorithm::ALL {
                if cap.supports_key(alg) {
                    features |= alg.feature_bit();
                }
            }
        }
        Ok(features)
    }

    pub fn driver_info(&self, id: DriverId) -> Option<DriverInfo> {
        self.table.info(id)
    }

    pub fn stats(&self) -> FrameworkStats {
        self.stats.snapshot()
    }

    /// Requests accepted whose callback has not run yet.
    pub fn inflight(&self) -> usize {
        self.ret.inflight()
    }

    /// `(symmetric, asymmetric)` submit queue lengths.
    pub fn queued(&self) -> (usize, usize) {
        (self.symq.len(), self.asymq.len())
    }

    // ── request allocation ──

    /// Whether the return queues have room for more completions.
    pub fn request_allowed(&self) -> bool {
        self.ret.request_allowed()
    }

    /// Allocate a symmetric op, refusing while the return queues are
    /// saturated.
    pub fn new_op<F>(
        &self,
        session: SessionId,
        descs: Vec<CryptoDesc>,
        buf: Vec<u8>,
        callback: F,
    ) -> Result<CryptoOp>
    where
        F: FnOnce(CryptoOp) + Send + 'static,
    {
        if !self.request_allowed() {
            return Err(CryptoError::Busy);
        }
        Ok(CryptoOp::new(session, descs, buf, callback))
    }

    pub fn new_key_op<F>(&self, alg: KeyAlgorithm, inputs: Vec<Vec<u8>>, callback: F) -> Result<KeyOp>
    where
        F: FnOnce(KeyOp) + Send + 'static,
    {
        if !self.request_allowed() {
            return Err(CryptoError::Busy);
        }
        KeyOp::new(alg, inputs, callback)
    }

    /// Run pending callbacks on the calling thread.
    pub fn run_callbacks(&self) -> usize {
        self.ret.run_callbacks()
    }

    /// Fail everything still queued with `Busy`. Shutdown only.
    pub(crate) fn fail_queued(&self) -> usize {
        let ops = self.symq.drain();
        let kops = self.asymq.drain();
        let n = ops.len() + kops.len();
        for op in ops {
            op.done(Err(OpError::Busy));
        }
        for kop in kops {
            kop.done(Err(OpError::Busy));
        }
        n
    }
}

impl DriverHost for Registry {
    fn unblock(&self, driver: DriverId, which: u32) -> Result<()> {
        Registry::unblock(self, driver, which & queue_kind::ALL)
    }
}
