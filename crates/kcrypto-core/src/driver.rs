//! Driver contract.
//!
//! A `CryptoDriver` is what a hardware accelerator or a software
//! implementation registers with the framework. The framework calls it;
//! it calls back through `CryptoOp::done` and, when it recovers from
//! resource exhaustion, through `DriverHost::unblock`.
//!
//! # Implementors
//!
//! - `NullDriver` (kcrypto-module): synchronous software driver, completes
//!   inside `process`.
//! - `PooledDriver` (kcrypto-module): asynchronous driver with a fixed
//!   number of hardware contexts, completes from worker threads.

use crate::error::{OpError, Result};
use crate::id::DriverId;
use crate::request::{CryptoOp, KeyOp, SessionInit};

/// Driver capability flags, given at `register_driver`.
pub mod driver_flags {
    /// Hardware accelerator.
    pub const HARDWARE: u32 = 1 << 0;
    /// Software fallback implementation.
    pub const SOFTWARE: u32 = 1 << 1;
    /// Always completes inside `process` (never defers).
    pub const SYNC: u32 = 1 << 2;
}

/// Which submit queue a block/unblock refers to.
pub mod queue_kind {
    /// Symmetric op queue.
    pub const SYMMETRIC: u32 = 1 << 0;
    /// Asymmetric (key op) queue.
    pub const ASYMMETRIC: u32 = 1 << 1;
    pub const ALL: u32 = SYMMETRIC | ASYMMETRIC;
}

/// Outcome of handing a request to a driver.
#[derive(Debug)]
pub enum Dispatch<T> {
    /// The driver owns the request now and will call `done` exactly once.
    /// Covers both "queued internally" and "will call back".
    Accepted,
    /// Transient resource exhaustion. The request is handed back; the
    /// framework marks the driver blocked and retries after `unblock`.
    Busy(T),
}

impl<T> Dispatch<T> {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Dispatch::Accepted)
    }
}

/// A crypto driver.
///
/// **Contract:**
/// - `process` / `process_key` are invoked without any framework-wide
///   lock held. They must not call back synchronously into the
///   framework's submit path.
/// - Every `Accepted` request is eventually finished with `done`, from
///   any thread, even after the driver returned `Busy` for a later one.
/// - Errors that are not transient are reported by finishing the
///   request with an `Err` result, not by returning `Busy`.
pub trait CryptoDriver: Send + Sync {
    /// Validate that the driver can serve `chain` and allocate a
    /// driver-local session id.
    fn new_session(&self, chain: &[SessionInit]) -> std::result::Result<u32, OpError>;

    /// Release a driver-local session.
    fn free_session(&self, local: u32) -> std::result::Result<(), OpError>;

    /// Process a symmetric op. `hints` carries `request::hint` bits.
    fn process(&self, op: CryptoOp, hints: u32) -> Dispatch<CryptoOp>;

    /// Process a key op. Drivers without asymmetric support keep the
    /// default, which fails the request.
    fn process_key(&self, kop: KeyOp, _hints: u32) -> Dispatch<KeyOp> {
        kop.done(Err(OpError::NotSupported));
        Dispatch::Accepted
    }

    /// Short name for logs.
    fn name(&self) -> &str {
        "crypto"
    }
}

/// The framework as seen by a driver.
pub trait DriverHost: Send + Sync {
    /// The driver has resources again: clear its block flags for the
    /// queues in `which` (`queue_kind` bits) and retry queued work.
    fn unblock(&self, driver: DriverId, which: u32) -> Result<()>;
}
