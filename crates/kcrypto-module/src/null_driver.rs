//! `NullDriver`: synchronous software driver.
//!
//! Runs its engine inside `process` and completes before returning, so
//! it registers with `SOFTWARE | SYNC` and never answers `Busy`.

use kcrypto_core::driver::driver_flags;
use kcrypto_core::{CryptoDriver, CryptoOp, Dispatch, KeyOp, OpError, SessionInit};

use crate::engine::{Engine, NullEngine};
use crate::sessions::SessionSet;

/// Flags to pass to `register_driver`.
pub const FLAGS: u32 = driver_flags::SOFTWARE | driver_flags::SYNC;

pub struct NullDriver<E: Engine = NullEngine> {
    engine: E,
    sessions: SessionSet,
}

impl NullDriver<NullEngine> {
    pub fn new() -> Self {
        Self::with_engine(NullEngine)
    }
}

impl Default for NullDriver<NullEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> NullDriver<E> {
    pub fn with_engine(engine: E) -> Self {
        Self { engine, sessions: SessionSet::default() }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Open driver-local sessions.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }
}

impl<E: Engine> CryptoDriver for NullDriver<E> {
    fn new_session(&self, chain: &[SessionInit]) -> Result<u32, OpError> {
        self.sessions.open(&self.engine, chain)
    }

    fn free_session(&self, local: u32) -> Result<(), OpError> {
        self.sessions.close(local)
    }

    fn process(&self, mut op: CryptoOp, _hints: u32) -> Dispatch<CryptoOp> {
        let result = if self.sessions.contains(op.session().local) {
            self.engine.transform(&mut op)
        } else {
            Err(OpError::InvalidArgument)
        };
        op.done(result);
        Dispatch::Accepted
    }

    fn process_key(&self, mut kop: KeyOp, _hints: u32) -> Dispatch<KeyOp> {
        let result = self.engine.key_transform(&mut kop);
        kop.done(result);
        Dispatch::Accepted
    }

    fn name(&self) -> &str {
        "null"
    }
}
