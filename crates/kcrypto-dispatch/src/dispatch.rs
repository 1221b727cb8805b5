//! Submission and dispatch.
//!
//! `submit` either hands a request straight to its driver (no framework
//! lock held across the call) or leaves it on the submit queue for the
//! dispatcher. A driver answering `Busy` gets the request back at the
//! head of the queue and is marked blocked until it calls `unblock`; the
//! client never sees the retry.
//!
//! Requests whose driver has been unregistered are migrated: a symmetric
//! op gets a fresh session on a still-registered driver and is bounced
//! back with `OpError::Again`, a key op is simply re-homed. An op naming a
//! session its live driver does not hold fails with
//! `OpError::InvalidArgument`.

use std::sync::Arc;

use kcrypto_core::driver::queue_kind;
use kcrypto_core::request::hint;
use kcrypto_core::{
    CryptoDriver, CryptoError, CryptoOp, Dispatch, DriverId, KeyAlgorithm, KeyOp, OpError,
    Result, SessionId, SessionInit,
};
use tracing::{debug, info, trace, warn};

use crate::queue::{Routed, SubmitQueue, Taken};
use crate::registry::Registry;
use crate::session::HwPreference;
use crate::stats::bump;

/// Where a request goes next. Routing yields `None` while the driver is
/// blocked.
pub(crate) enum Target {
    Live { driver: Arc<dyn CryptoDriver>, unblock_gen: u64 },
    /// Driver unregistered, or never chosen.
    Gone,
    /// Driver live, but the session is not open on it.
    Stale,
}

impl Registry {
    fn route_op(&self, sid: SessionId) -> Option<Target> {
        let Some(slot) = self.table.get(sid.driver) else {
            return Some(Target::Gone);
        };
        let cap = slot.cap.lock();
        match &cap.driver {
            Some(_) if cap.usable() && !cap.sessions.contains(&sid.local) => Some(Target::Stale),
            Some(driver) if cap.usable() => {
                if cap.sym_blocked {
                    None
                } else {
                    Some(Target::Live {
                        driver: Arc::clone(driver),
                        unblock_gen: cap.sym_unblock_gen,
                    })
                }
            }
            _ => Some(Target::Gone),
        }
    }

    fn route_key_op(&self, driver: Option<DriverId>, alg: KeyAlgorithm) -> Option<Target> {
        let Some(slot) = driver.and_then(|id| self.table.get(id)) else {
            return Some(Target::Gone);
        };
        let cap = slot.cap.lock();
        match &cap.key_driver {
            Some(kdriver) if cap.usable() && cap.supports_key(alg) => {
                if cap.asym_blocked {
                    None
                } else {
                    Some(Target::Live {
                        driver: Arc::clone(kdriver),
                        unblock_gen: cap.asym_unblock_gen,
                    })
                }
            }
            _ => Some(Target::Gone),
        }
    }

    /// First usable driver for `alg`, hardware before software.
    fn select_key_driver(&self, alg: KeyAlgorithm) -> Option<DriverId> {
        let mut soft = None;
        for slot in self.table.snapshot() {
            let cap = slot.cap.lock();
            if !cap.usable() || cap.key_driver.is_none() || !cap.supports_key(alg) {
                continue;
            }
            if !cap.is_software() {
                return Some(slot.id);
            }
            if self.config.allow_soft && soft.is_none() {
                soft = Some(slot.id);
            }
        }
        soft
    }

    /// Settle a driver's answer. Returns `false` when it was `Busy`.
    fn settle<T: Routed>(
        &self,
        queue: &SubmitQueue<T>,
        which: u32,
        id: DriverId,
        unblock_gen: u64,
        outcome: Dispatch<T>,
    ) -> bool {
        match outcome {
            Dispatch::Accepted => true,
            Dispatch::Busy(item) => {
                queue.push_front(item);
                if self.table.block(id, which, unblock_gen) {
                    let counter = if which == queue_kind::ASYMMETRIC {
                        &self.stats.asym_blocks
                    } else {
                        &self.stats.sym_blocks
                    };
                    bump(counter);
                    debug!(driver = %id, which, "driver blocked");
                } else {
                    // unblocked while we were calling it
                    self.kick();
                }
                false
            }
        }
    }

    fn invoke_op(&self, op: CryptoOp, driver: &Arc<dyn CryptoDriver>, gen: u64, hints: u32) -> bool {
        let id = op.session().driver;
        trace!(session = %op.session(), hints, "process");
        let outcome = driver.process(op, hints);
        self.settle(&self.symq, queue_kind::SYMMETRIC, id, gen, outcome)
    }

    fn invoke_key_op(&self, kop: KeyOp, id: DriverId, driver: &Arc<dyn CryptoDriver>, gen: u64, hints: u32) -> bool {
        trace!(driver = %id, alg = ?kop.alg(), hints, "process_key");
        let outcome = driver.process_key(kop, hints);
        self.settle(&self.asymq, queue_kind::ASYMMETRIC, id, gen, outcome)
    }

    /// Submit a symmetric op.
    ///
    /// Once this returns `Ok` the op's callback runs exactly once, with
    /// the driver's result, `OpError::Again` after a migration,
    /// `OpError::NoDevice` if no driver can take over its session, or
    /// `OpError::InvalidArgument` if the session was already closed. On
    /// `Err` the op is dropped without a callback.
    pub fn submit(&self, mut op: CryptoOp) -> Result<()> {
        if self.is_exiting() {
            return Err(CryptoError::Busy);
        }
        if !op.has_callback() {
            warn!(session = %op.session(), "op submitted without a callback");
            return Err(CryptoError::InvalidArgument("op has no callback"));
        }
        op.attach(self.sink());
        self.ret.track();
        bump(&self.stats.ops);

        if op.is_batch() {
            self.symq.push_back(op);
            self.kick();
            return Ok(());
        }

        let sid = op.session();
        match self.route_op(sid) {
            Some(Target::Live { driver, unblock_gen }) if !self.symq.has_pending_for(sid.driver) => {
                if !self.invoke_op(op, &driver, unblock_gen, 0) {
                    trace!(session = %sid, "driver busy, op requeued");
                }
            }
            Some(Target::Stale) => self.reject_stale(op),
            // blocked, gone, or behind earlier work for the same driver
            _ => {
                self.symq.push_back(op);
                self.kick();
            }
        }
        Ok(())
    }

    /// Submit a key op. Same guarantees as [`submit`](Self::submit).
    pub fn submit_key(&self, mut kop: KeyOp) -> Result<()> {
        if self.is_exiting() {
            return Err(CryptoError::Busy);
        }
        if !kop.has_callback() {
            warn!(alg = ?kop.alg(), "key op submitted without a callback");
            return Err(CryptoError::InvalidArgument("key op has no callback"));
        }
        kop.attach(self.sink());
        self.ret.track();
        bump(&self.stats.kops);

        let id = match kop.driver() {
            Some(id) => id,
            None => match self.select_key_driver(kop.alg()) {
                Some(id) => {
                    kop.set_driver(Some(id));
                    id
                }
                None => {
                    debug!(alg = ?kop.alg(), "no driver for key op");
                    kop.done(Err(OpError::NoDevice));
                    return Ok(());
                }
            },
        };

        if kop.is_batch() {
            self.asymq.push_back(kop);
            self.kick();
            return Ok(());
        }

        match self.route_key_op(Some(id), kop.alg()) {
            Some(Target::Live { driver, unblock_gen }) if !self.asymq.has_pending_for(id) => {
                self.invoke_key_op(kop, id, &driver, unblock_gen, 0);
            }
            _ => {
                self.asymq.push_back(kop);
                self.kick();
            }
        }
        Ok(())
    }

    /// Retry queued work once. Returns how many requests left the queues.
    pub fn dispatch_pass(&self) -> usize {
        bump(&self.stats.dispatch_passes);
        self.sym_pass() + self.asym_pass()
    }

    fn sym_pass(&self) -> usize {
        let mut moved = 0;
        for _ in 0..self.symq.len() {
            let Some(Taken { item: op, route, more }) =
                self.symq.take_first(|op| self.route_op(op.session()))
            else {
                break;
            };
            match route {
                Target::Live { driver, unblock_gen } => {
                    let hints = if more { hint::MORE } else { 0 };
                    if !self.invoke_op(op, &driver, unblock_gen, hints) {
                        break;
                    }
                }
                Target::Gone => self.migrate_op(op),
                Target::Stale => self.reject_stale(op),
            }
            moved += 1;
        }
        moved
    }

    fn asym_pass(&self) -> usize {
        let mut moved = 0;
        for _ in 0..self.asymq.len() {
            let Some(Taken { item: kop, route, more }) =
                self.asymq.take_first(|kop| self.route_key_op(kop.driver(), kop.alg()))
            else {
                break;
            };
            match (route, kop.driver()) {
                (Target::Live { driver, unblock_gen }, Some(id)) => {
                    let hints = if more { hint::MORE } else { 0 };
                    if !self.invoke_key_op(kop, id, &driver, unblock_gen, hints) {
                        break;
                    }
                }
                _ => self.migrate_key_op(kop),
            }
            moved += 1;
        }
        moved
    }

    fn reject_stale(&self, op: CryptoOp) {
        debug!(session = %op.session(), "op on a session that is not open");
        op.done(Err(OpError::InvalidArgument));
    }

    /// Move an orphaned session to a live driver and bounce the op.
    fn migrate_op(&self, mut op: CryptoOp) {
        let old = op.session();
        bump(&self.stats.migrations);
        if let Err(e) = self.close_session(old) {
            debug!(session = %old, error = %e, "closing migrated session");
        }

        let chain: Vec<SessionInit> = op
            .descs()
            .iter()
            .map(|d| SessionInit::new(d.alg, d.key.clone().unwrap_or_default()))
            .collect();

        match self.open_session(&chain, HwPreference::Any) {
            Ok(sid) => {
                info!(from = %old, to = %sid, "session migrated");
                op.set_session(sid);
                op.done(Err(OpError::Again));
            }
            Err(e) => {
                warn!(session = %old, error = %e, "session migration failed");
                let status = match e {
                    CryptoError::Driver(err) => err,
                    CryptoError::Busy | CryptoError::ShuttingDown => OpError::Busy,
                    _ => OpError::NoDevice,
                };
                op.done(Err(status));
            }
        }
    }

    fn migrate_key_op(&self, mut kop: KeyOp) {
        if kop.driver().is_some() {
            bump(&self.stats.migrations);
        }
        let Some(id) = self.select_key_driver(kop.alg()) else {
            warn!(alg = ?kop.alg(), "no driver left for key op");
            kop.done(Err(OpError::NoDevice));
            return;
        };
        debug!(driver = %id, alg = ?kop.alg(), "key op re-homed");
        kop.set_driver(Some(id));
        match self.route_key_op(Some(id), kop.alg()) {
            Some(Target::Live { driver, unblock_gen }) => {
                self.invoke_key_op(kop, id, &driver, unblock_gen, 0);
            }
            None => self.asymq.push_back(kop),
            Some(_) => kop.done(Err(OpError::NoDevice)),
        }
    }
}
