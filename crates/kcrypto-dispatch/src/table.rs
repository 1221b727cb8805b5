//! Driver capability table.
//!
//! One slot per registered driver. The table's outer `RwLock` guards only
//! the slot vector (allocation and doubling); every read or write of a
//! slot's capabilities, sessions or block flags takes that slot's own
//! mutex. Lock order is outer → slot, and no slot lock is ever held
//! across a call into a driver.
//!
//! Slot lifecycle:
//!
//! ```text
//!   free ──register_driver──▶ allocated ──register_*──▶ live
//!     ▲                                                  │ unregister (last alg)
//!     │                         sessions == 0            ▼
//!     └───────────────────────────────────────── cleanup-pending
//! ```
//!
//! A live slot unregistered with no open sessions goes straight back to
//! free. A cleanup-pending slot refuses new sessions but stays
//! addressable until its last session closes.

use std::collections::BTreeSet;
use std::sync::Arc;

use kcrypto_core::alg::{alg_flags, ALGORITHM_MAX, KEY_ALGORITHM_MAX};
use kcrypto_core::driver::{driver_flags, queue_kind};
use kcrypto_core::{Algorithm, CryptoDriver, CryptoError, DriverId, KeyAlgorithm, Result};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

const NUM_ALGS: usize = ALGORITHM_MAX as usize + 1;
const NUM_KEY_ALGS: usize = KEY_ALGORITHM_MAX as usize + 1;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AlgCap {
    pub flags: u32,
    pub max_len: u32,
}

/// Mutable state of one slot.
pub(crate) struct DriverCap {
    pub allocated: bool,
    pub flags: u32,
    pub algs: [AlgCap; NUM_ALGS],
    pub key_algs: [u32; NUM_KEY_ALGS],
    /// Installed by the first `register_algorithm`.
    pub driver: Option<Arc<dyn CryptoDriver>>,
    /// Installed by the first `register_key_algorithm`.
    pub key_driver: Option<Arc<dyn CryptoDriver>>,
    /// Open driver-local session ids.
    pub sessions: BTreeSet<u32>,
    pub cleanup: bool,
    pub sym_blocked: bool,
    pub asym_blocked: bool,
    /// Bumped on every unblock, so a `Busy` that raced an unblock is not
    /// turned into a block nobody will ever lift.
    pub sym_unblock_gen: u64,
    pub asym_unblock_gen: u64,
}

impl DriverCap {
    fn empty() -> Self {
        Self {
            allocated: false,
            flags: 0,
            algs: [AlgCap::default(); NUM_ALGS],
            key_algs: [0; NUM_KEY_ALGS],
            driver: None,
            key_driver: None,
            sessions: BTreeSet::new(),
            cleanup: false,
            sym_blocked: false,
            asym_blocked: false,
            sym_unblock_gen: 0,
            asym_unblock_gen: 0,
        }
    }

    fn reset(&mut self) {
        *self = Self::empty();
    }

    /// Reusable by `register_driver`.
    fn is_free(&self) -> bool {
        !self.allocated && !self.cleanup && self.sessions.is_empty()
    }

    #[inline]
    pub fn supports(&self, alg: Algorithm) -> bool {
        self.algs[alg.id() as usize].flags & alg_flags::SUPPORTED != 0
    }

    #[inline]
    pub fn supports_key(&self, alg: KeyAlgorithm) -> bool {
        self.key_algs[alg.id() as usize] & alg_flags::SUPPORTED != 0
    }

    fn has_any_alg(&self) -> bool {
        self.algs.iter().any(|a| a.flags & alg_flags::SUPPORTED != 0)
            || self.key_algs.iter().any(|f| f & alg_flags::SUPPORTED != 0)
    }

    /// Accepts new sessions / key ops.
    #[inline]
    pub fn usable(&self) -> bool {
        self.allocated && !self.cleanup
    }

    #[inline]
    pub fn is_hardware(&self) -> bool {
        self.flags & driver_flags::HARDWARE != 0
    }

    #[inline]
    pub fn is_software(&self) -> bool {
        self.flags & driver_flags::SOFTWARE != 0
    }

    #[inline]
    pub fn is_sync(&self) -> bool {
        self.flags & driver_flags::SYNC != 0
    }

    /// Free a cleanup-pending slot once its last session is gone.
    pub fn reclaim_if_drained(&mut self, id: DriverId) -> bool {
        if self.cleanup && self.sessions.is_empty() {
            info!(driver = %id, "driver slot reclaimed after last session");
            self.reset();
            return true;
        }
        false
    }

    /// Unregistration finished: free the slot, or leave it inert until
    /// the last session closes.
    fn retire(&mut self, id: DriverId) {
        if self.sessions.is_empty() {
            info!(driver = %id, "driver slot reclaimed");
            self.reset();
        } else {
            info!(driver = %id, sessions = self.sessions.len(), "driver unregistered, cleanup pending");
            self.allocated = false;
            self.cleanup = true;
            self.driver = None;
            self.key_driver = None;
        }
    }
}

pub(crate) struct DriverSlot {
    pub id: DriverId,
    pub cap: Mutex<DriverCap>,
}

impl DriverSlot {
    fn new(id: DriverId) -> Self {
        Self { id, cap: Mutex::new(DriverCap::empty()) }
    }
}

/// Diagnostic snapshot of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub id: DriverId,
    pub flags: u32,
    pub algorithms: Vec<Algorithm>,
    pub key_algorithms: Vec<KeyAlgorithm>,
    pub sessions: usize,
    pub cleanup_pending: bool,
    pub sym_blocked: bool,
    pub asym_blocked: bool,
}

pub(crate) struct DriverTable {
    slots: RwLock<Vec<Arc<DriverSlot>>>,
}

impl DriverTable {
    pub fn new(initial: usize) -> Self {
        let slots = (0..initial.max(1))
            .map(|i| Arc::new(DriverSlot::new(DriverId::new(i as u32))))
            .collect();
        Self { slots: RwLock::new(slots) }
    }

    /// Current slot count.
    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    pub fn get(&self, id: DriverId) -> Option<Arc<DriverSlot>> {
        self.slots.read().get(id.as_usize()).cloned()
    }

    /// All slots in registration (index) order.
    pub fn snapshot(&self) -> Vec<Arc<DriverSlot>> {
        self.slots.read().clone()
    }

    /// Claim the lowest free slot, doubling the table when none is free.
    pub fn allocate(&self, flags: u32) -> DriverId {
        let mut slots = self.slots.write();

        for slot in slots.iter() {
            let mut cap = slot.cap.lock();
            if cap.is_free() {
                cap.allocated = true;
                cap.flags = flags;
                return slot.id;
            }
        }

        let old = slots.len();
        let new_len = (old * 2).max(1);
        for i in old..new_len {
            slots.push(Arc::new(DriverSlot::new(DriverId::new(i as u32))));
        }
        debug!(from = old, to = new_len, "driver table grown");

        let slot = &slots[old];
        let mut cap = slot.cap.lock();
        cap.allocated = true;
        cap.flags = flags;
        slot.id
    }

    fn live_slot(&self, id: DriverId) -> Result<Arc<DriverSlot>> {
        self.get(id).ok_or(CryptoError::NoSuchDriver(id.as_u32()))
    }

    pub fn register_algorithm(
        &self,
        id: DriverId,
        alg: u32,
        max_len: u32,
        flags: u32,
        driver: &Arc<dyn CryptoDriver>,
    ) -> Result<()> {
        let alg = Algorithm::try_from(alg)?;
        let slot = self.live_slot(id)?;
        let mut cap = slot.cap.lock();
        if cap.cleanup {
            return Err(CryptoError::InvalidArgument("driver is being unregistered"));
        }
        if !cap.allocated {
            return Err(CryptoError::NoSuchDriver(id.as_u32()));
        }
        cap.algs[alg.id() as usize] = AlgCap { flags: flags | alg_flags::SUPPORTED, max_len };
        if cap.driver.is_none() {
            cap.driver = Some(Arc::clone(driver));
        }
        debug!(driver = %id, ?alg, max_len, "algorithm registered");
        Ok(())
    }

    pub fn register_key_algorithm(
        &self,
        id: DriverId,
        alg: u32,
        flags: u32,
        driver: &Arc<dyn CryptoDriver>,
    ) -> Result<()> {
        let alg = KeyAlgorithm::try_from(alg)?;
        let slot = self.live_slot(id)?;
        let mut cap = slot.cap.lock();
        if cap.cleanup {
            return Err(CryptoError::InvalidArgument("driver is being unregistered"));
        }
        if !cap.allocated {
            return Err(CryptoError::NoSuchDriver(id.as_u32()));
        }
        cap.key_algs[alg.id() as usize] = flags | alg_flags::SUPPORTED;
        if cap.key_driver.is_none() {
            cap.key_driver = Some(Arc::clone(driver));
        }
        debug!(driver = %id, ?alg, "key algorithm registered");
        Ok(())
    }

    pub fn unregister_algorithm(&self, id: DriverId, alg: u32) -> Result<()> {
        let alg = Algorithm::try_from(alg)?;
        let slot = self.live_slot(id)?;
        let mut cap = slot.cap.lock();
        if !cap.allocated || !cap.supports(alg) {
            return Err(CryptoError::InvalidArgument("algorithm not registered"));
        }
        cap.algs[alg.id() as usize] = AlgCap::default();
        debug!(driver = %id, ?alg, "algorithm unregistered");
        if !cap.has_any_alg() {
            cap.retire(id);
        }
        Ok(())
    }

    pub fn unregister_all(&self, id: DriverId) -> Result<()> {
        let slot = self.live_slot(id)?;
        let mut cap = slot.cap.lock();
        if !cap.allocated {
            return Err(CryptoError::NoSuchDriver(id.as_u32()));
        }
        cap.algs = [AlgCap::default(); NUM_ALGS];
        cap.key_algs = [0; NUM_KEY_ALGS];
        cap.retire(id);
        Ok(())
    }

    /// Clear block flags in `which`. Returns the flags that were set.
    pub fn unblock(&self, id: DriverId, which: u32) -> Result<u32> {
        let slot = self.live_slot(id)?;
        let mut cap = slot.cap.lock();
        if !cap.allocated && !cap.cleanup {
            return Err(CryptoError::NoSuchDriver(id.as_u32()));
        }
        let mut cleared = 0;
        if which & queue_kind::SYMMETRIC != 0 {
            if cap.sym_blocked {
                cleared |= queue_kind::SYMMETRIC;
            }
            cap.sym_blocked = false;
            cap.sym_unblock_gen += 1;
        }
        if which & queue_kind::ASYMMETRIC != 0 {
            if cap.asym_blocked {
                cleared |= queue_kind::ASYMMETRIC;
            }
            cap.asym_blocked = false;
            cap.asym_unblock_gen += 1;
        }
        Ok(cleared)
    }

    /// Mark a driver blocked after it returned `Busy`, unless an unblock
    /// arrived since `seen_gen` was read. Returns whether it is now blocked.
    pub fn block(&self, id: DriverId, which: u32, seen_gen: u64) -> bool {
        let Some(slot) = self.get(id) else {
            return false;
        };
        let mut cap = slot.cap.lock();
        if which & queue_kind::ASYMMETRIC != 0 {
            if cap.asym_unblock_gen != seen_gen {
                return false;
            }
            cap.asym_blocked = true;
        } else {
            if cap.sym_unblock_gen != seen_gen {
                return false;
            }
            cap.sym_blocked = true;
        }
        true
    }

    pub fn is_sync(&self, id: DriverId) -> bool {
        self.get(id).map(|s| s.cap.lock().is_sync()).unwrap_or(false)
    }

    pub fn info(&self, id: DriverId) -> Option<DriverInfo> {
        let slot = self.get(id)?;
        let cap = slot.cap.lock();
        if !cap.allocated && !cap.cleanup {
            return None;
        }
        Some(DriverInfo {
            id,
            flags: cap.flags,
            algorithms: Algorithm::ALL.into_iter().filter(|a| cap.supports(*a)).collect(),
            key_algorithms: KeyAlgorithm::ALL
                .into_iter()
                .filter(|a| cap.supports_key(*a))
                .collect(),
            sessions: cap.sessions.len(),
            cleanup_pending: cap.cleanup,
            sym_blocked: cap.sym_blocked,
            asym_blocked: cap.asym_blocked,
        })
    }

    /// Drop every driver reference. Teardown only.
    pub fn clear(&self) {
        for slot in self.slots.read().iter() {
            slot.cap.lock().reset();
        }
    }
}
