//! Shared fixtures: a scriptable driver and a callback recorder.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use kcrypto_core::{
    Algorithm, CryptoDesc, CryptoDriver, CryptoOp, Dispatch, DriverId, KeyAlgorithm, KeyOp,
    OpError, OpResult, SessionId, SessionInit,
};
use kcrypto_dispatch::{FrameworkConfig, HwPreference, Registry};
use parking_lot::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Driver that records every `process` call and answers as scripted.
#[derive(Default)]
pub struct MockDriver {
    /// `(tag, hints)` per call, `Busy` answers included.
    pub calls: Mutex<Vec<(u8, u32)>>,
    pub key_calls: Mutex<Vec<KeyAlgorithm>>,
    /// Answer `Busy` to this many upcoming calls.
    busy: AtomicUsize,
    /// Keep accepted ops instead of completing them.
    hold: AtomicBool,
    held: Mutex<Vec<CryptoOp>>,
    next: AtomicU32,
    pub sessions: Mutex<BTreeSet<u32>>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn busy_for(&self, n: usize) {
        self.busy.store(n, Ordering::SeqCst);
    }

    pub fn hold(&self, on: bool) {
        self.hold.store(on, Ordering::SeqCst);
    }

    /// Complete every held op.
    pub fn release(&self) -> usize {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        let n = held.len();
        for op in held {
            op.done(Ok(()));
        }
        n
    }

    pub fn tags(&self) -> Vec<u8> {
        self.calls.lock().iter().map(|(t, _)| *t).collect()
    }

    fn take_busy(&self) -> bool {
        self.busy
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl CryptoDriver for MockDriver {
    fn new_session(&self, _chain: &[SessionInit]) -> Result<u32, OpError> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().insert(id);
        Ok(id)
    }

    fn free_session(&self, local: u32) -> Result<(), OpError> {
        if self.sessions.lock().remove(&local) {
            Ok(())
        } else {
            Err(OpError::InvalidArgument)
        }
    }

    fn process(&self, op: CryptoOp, hints: u32) -> Dispatch<CryptoOp> {
        self.calls.lock().push((tag_of(&op), hints));
        if self.take_busy() {
            return Dispatch::Busy(op);
        }
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().push(op);
        } else {
            op.done(Ok(()));
        }
        Dispatch::Accepted
    }

    fn process_key(&self, kop: KeyOp, _hints: u32) -> Dispatch<KeyOp> {
        self.key_calls.lock().push(kop.alg());
        if self.take_busy() {
            return Dispatch::Busy(kop);
        }
        kop.done(Ok(()));
        Dispatch::Accepted
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn tag_of(op: &CryptoOp) -> u8 {
    op.buf.first().copied().unwrap_or(0)
}

/// One delivered callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub tag: u8,
    pub result: OpResult,
    pub session: SessionId,
}

/// Records callbacks in delivery order.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Delivered>>>);

impl Recorder {
    pub fn callback(&self) -> impl FnOnce(CryptoOp) + Send + 'static {
        let log = Arc::clone(&self.0);
        move |op: CryptoOp| {
            log.lock().push(Delivered {
                tag: tag_of(&op),
                result: op.result(),
                session: op.session(),
            })
        }
    }

    pub fn all(&self) -> Vec<Delivered> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

pub fn registry() -> Arc<Registry> {
    init_tracing();
    Registry::new(FrameworkConfig::new())
}

/// Register `drv` under `flags` for every algorithm in `algs`.
pub fn add_driver(reg: &Registry, flags: u32, drv: Arc<dyn CryptoDriver>, algs: &[Algorithm]) -> DriverId {
    let id = reg.register_driver(flags).unwrap();
    for alg in algs {
        reg.register_algorithm(id, alg.id(), 0, 0, &drv).unwrap();
    }
    id
}

pub fn add_key_driver(
    reg: &Registry,
    flags: u32,
    drv: Arc<dyn CryptoDriver>,
    algs: &[KeyAlgorithm],
) -> DriverId {
    let id = reg.register_driver(flags).unwrap();
    for alg in algs {
        reg.register_key_algorithm(id, alg.id(), 0, &drv).unwrap();
    }
    id
}

pub fn open(reg: &Registry, alg: Algorithm, pref: HwPreference) -> SessionId {
    reg.open_session(&[SessionInit::new(alg, vec![0u8; 16])], pref).unwrap()
}

/// A one-descriptor op whose first buffer byte is `tag`.
pub fn op(sid: SessionId, alg: Algorithm, tag: u8, rec: &Recorder) -> CryptoOp {
    CryptoOp::new(
        sid,
        vec![CryptoDesc::cipher(alg, 0, 16, true)],
        vec![tag; 16],
        rec.callback(),
    )
}
