//! Session manager.
//!
//! A session binds a client to the first driver, in registration order,
//! that supports every algorithm of the requested chain. The driver is
//! asked to allocate its local id outside the slot lock; the slot is then
//! re-checked, since the driver may have been unregistered meanwhile.

use std::sync::Arc;

use kcrypto_core::{CryptoDriver, CryptoError, OpError, Result, SessionId, SessionInit};
use tracing::{debug, error};

use crate::registry::Registry;
use crate::table::DriverCap;

/// Which kind of driver a session may land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HwPreference {
    /// Only drivers not flagged `SOFTWARE`.
    Hardware,
    /// Only `SOFTWARE` drivers.
    Software,
    /// Either; software drivers only if the allow-software policy is on.
    #[default]
    Any,
}

impl Registry {
    fn session_candidate(&self, cap: &DriverCap, chain: &[SessionInit], pref: HwPreference) -> bool {
        if !cap.usable() || cap.driver.is_none() {
            return false;
        }
        let kind_ok = match pref {
            HwPreference::Hardware => !cap.is_software(),
            HwPreference::Software => cap.is_software(),
            HwPreference::Any => !cap.is_software() || self.config.allow_soft,
        };
        kind_ok && chain.iter().all(|init| cap.supports(init.alg))
    }

    /// Open a session on the first driver able to serve `chain`.
    ///
    /// A driver that matches but refuses in `new_session` fails the open;
    /// later drivers are not tried.
    pub fn open_session(&self, chain: &[SessionInit], pref: HwPreference) -> Result<SessionId> {
        if self.is_exiting() {
            return Err(CryptoError::Busy);
        }
        if chain.is_empty() {
            return Err(CryptoError::InvalidArgument("empty algorithm chain"));
        }

        for slot in self.table.snapshot() {
            let driver: Arc<dyn CryptoDriver> = {
                let cap = slot.cap.lock();
                if !self.session_candidate(&cap, chain, pref) {
                    continue;
                }
                match &cap.driver {
                    Some(d) => Arc::clone(d),
                    None => continue,
                }
            };

            let local = driver.new_session(chain)?;

            let mut cap = slot.cap.lock();
            let same = cap.usable()
                && cap.driver.as_ref().is_some_and(|d| Arc::ptr_eq(d, &driver));
            if same {
                if !cap.sessions.insert(local) {
                    error!(driver = %slot.id, local, "driver reused a live session id");
                    return Err(CryptoError::Driver(OpError::InvalidArgument));
                }
                let sid = SessionId::new(slot.id, local);
                debug!(session = %sid, driver = %slot.id, "session opened");
                return Ok(sid);
            }
            drop(cap);

            // unregistered while new_session ran
            if let Err(e) = driver.free_session(local) {
                debug!(driver = %slot.id, local, error = %e, "free after lost race failed");
            }
        }

        Err(CryptoError::NoSuitableDriver)
    }

    /// Close a session. Reclaims the driver slot if it was waiting for
    /// its last session.
    pub fn close_session(&self, sid: SessionId) -> Result<()> {
        let slot = self
            .table
            .get(sid.driver)
            .ok_or(CryptoError::NoSuchSession(sid.as_u64()))?;

        let driver = {
            let mut cap = slot.cap.lock();
            if !cap.sessions.remove(&sid.local) {
                return Err(CryptoError::NoSuchSession(sid.as_u64()));
            }
            let driver = cap.driver.clone();
            cap.reclaim_if_drained(sid.driver);
            driver
        };
        debug!(session = %sid, "session closed");

        match driver {
            Some(d) => d.free_session(sid.local).map_err(CryptoError::Driver),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameworkConfig;
    use kcrypto_core::driver::driver_flags;
    use kcrypto_core::{Algorithm, CryptoOp, Dispatch, DriverId};
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counting {
        next: AtomicU32,
        freed: Mutex<BTreeSet<u32>>,
    }

    impl CryptoDriver for Counting {
        fn new_session(&self, _: &[SessionInit]) -> std::result::Result<u32, OpError> {
            Ok(self.next.fetch_add(1, Ordering::Relaxed))
        }
        fn free_session(&self, local: u32) -> std::result::Result<(), OpError> {
            self.freed.lock().insert(local);
            Ok(())
        }
        fn process(&self, op: CryptoOp, _: u32) -> Dispatch<CryptoOp> {
            op.done(Ok(()));
            Dispatch::Accepted
        }
    }

    struct Refusing;

    impl CryptoDriver for Refusing {
        fn new_session(&self, _: &[SessionInit]) -> std::result::Result<u32, OpError> {
            Err(OpError::NoMemory)
        }
        fn free_session(&self, _: u32) -> std::result::Result<(), OpError> {
            Ok(())
        }
        fn process(&self, op: CryptoOp, _: u32) -> Dispatch<CryptoOp> {
            op.done(Ok(()));
            Dispatch::Accepted
        }
    }

    fn add(reg: &Registry, flags: u32, drv: Arc<dyn CryptoDriver>, algs: &[Algorithm]) -> DriverId {
        let id = reg.register_driver(flags).unwrap();
        for alg in algs {
            reg.register_algorithm(id, alg.id(), 0, 0, &drv).unwrap();
        }
        id
    }

    fn chain(algs: &[Algorithm]) -> Vec<SessionInit> {
        algs.iter().map(|a| SessionInit::new(*a, vec![0u8; 16])).collect()
    }

    #[test]
    fn test_open_requires_every_alg() {
        let reg = Registry::new(FrameworkConfig::new());
        let a = add(&reg, driver_flags::HARDWARE, Arc::new(Counting::default()), &[Algorithm::AesCbc]);
        let b = add(
            &reg,
            driver_flags::HARDWARE,
            Arc::new(Counting::default()),
            &[Algorithm::AesCbc, Algorithm::Sha1Hmac],
        );
        let s1 = reg.open_session(&chain(&[Algorithm::AesCbc]), HwPreference::Any).unwrap();
        let s2 = reg
            .open_session(&chain(&[Algorithm::AesCbc, Algorithm::Sha1Hmac]), HwPreference::Any)
            .unwrap();
        assert_eq!(s1.driver, a);
        assert_eq!(s2.driver, b);
        assert!(matches!(
            reg.open_session(&chain(&[Algorithm::Gzip]), HwPreference::Any),
            Err(CryptoError::NoSuitableDriver)
        ));
    }

    #[test]
    fn test_local_ids_unique_and_counted() {
        let reg = Registry::new(FrameworkConfig::new());
        let id = add(&reg, 0, Arc::new(Counting::default()), &[Algorithm::DesCbc]);
        let sids: Vec<_> = (0..5)
            .map(|_| reg.open_session(&chain(&[Algorithm::DesCbc]), HwPreference::Any).unwrap())
            .collect();
        let locals: BTreeSet<u32> = sids.iter().map(|s| s.local).collect();
        assert_eq!(locals.len(), 5);
        assert_eq!(reg.driver_info(id).unwrap().sessions, 5);

        reg.close_session(sids[0]).unwrap();
        assert_eq!(reg.driver_info(id).unwrap().sessions, 4);
        assert!(matches!(reg.close_session(sids[0]), Err(CryptoError::NoSuchSession(_))));
    }

    #[test]
    fn test_software_policy() {
        let reg = Registry::new(FrameworkConfig::new().allow_soft(false));
        add(&reg, driver_flags::SOFTWARE, Arc::new(Counting::default()), &[Algorithm::NullCbc]);
        let c = chain(&[Algorithm::NullCbc]);
        assert!(matches!(
            reg.open_session(&c, HwPreference::Any),
            Err(CryptoError::NoSuitableDriver)
        ));
        assert!(reg.open_session(&c, HwPreference::Software).is_ok());
        assert!(reg.open_session(&c, HwPreference::Hardware).is_err());
    }

    #[test]
    fn test_driver_refusal_is_reported() {
        let reg = Registry::new(FrameworkConfig::new());
        add(&reg, 0, Arc::new(Refusing), &[Algorithm::AesCbc]);
        add(&reg, 0, Arc::new(Counting::default()), &[Algorithm::AesCbc]);
        assert!(matches!(
            reg.open_session(&chain(&[Algorithm::AesCbc]), HwPreference::Any),
            Err(CryptoError::Driver(OpError::NoMemory))
        ));
    }

    #[test]
    fn test_close_frees_driver_session() {
        let reg = Registry::new(FrameworkConfig::new());
        let drv = Arc::new(Counting::default());
        add(&reg, 0, drv.clone(), &[Algorithm::AesCbc]);
        let sid = reg.open_session(&chain(&[Algorithm::AesCbc]), HwPreference::Any).unwrap();
        reg.close_session(sid).unwrap();
        assert!(drv.freed.lock().contains(&sid.local));
    }

    #[test]
    fn test_empty_chain_rejected() {
        let reg = Registry::new(FrameworkConfig::new());
        assert!(matches!(
            reg.open_session(&[], HwPreference::Any),
            Err(CryptoError::InvalidArgument(_))
        ));
    }
}
