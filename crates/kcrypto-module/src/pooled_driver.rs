//! `PooledDriver`: asynchronous driver with a fixed number of contexts.
//!
//! Models an accelerator: a request needs one of a fixed set of
//! hardware contexts, held from `process` until completion. `process`
//! takes a free context, queues the request and returns; worker threads
//! run the engine and complete requests from their own context. With no
//! context free, `process` hands the request back as `Busy`, remembers
//! which queue was refused, and the next completion calls
//! `DriverHost::unblock` for it.
//!
//! No dynamic scaling. Workers exit once shut down and the ring is empty.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_queue::{ArrayQueue, SegQueue};
use kcrypto_core::driver::{driver_flags, queue_kind};
use kcrypto_core::env::{env_get, env_get_ms};
use kcrypto_core::{
    CryptoDriver, CryptoError, CryptoOp, Dispatch, DriverHost, DriverId, KeyOp, OpError,
    SessionInit,
};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::engine::{Engine, NullEngine};
use crate::sessions::SessionSet;

/// Flags to pass to `register_driver`.
pub const FLAGS: u32 = driver_flags::HARDWARE;

/// Library defaults.
pub mod defaults {
    pub const WORKERS: usize = 2;
    pub const MAX_WORKERS: usize = 32;
    /// Requests the "hardware" holds at once.
    pub const CONTEXTS: usize = 16;
    /// Simulated per-request latency.
    pub const LATENCY_MS: u64 = 0;
}

/// Pool configuration, builder style.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub contexts: usize,
    pub latency: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Environment variables (all optional):
    /// - `KCRYPTO_POOL_WORKERS`
    /// - `KCRYPTO_POOL_CONTEXTS`
    /// - `KCRYPTO_POOL_LATENCY_MS`
    pub fn from_env() -> Self {
        Self {
            workers: env_get("KCRYPTO_POOL_WORKERS", defaults::WORKERS),
            contexts: env_get("KCRYPTO_POOL_CONTEXTS", defaults::CONTEXTS),
            latency: env_get_ms("KCRYPTO_POOL_LATENCY_MS", defaults::LATENCY_MS),
        }
    }

    pub fn new() -> Self {
        Self {
            workers: defaults::WORKERS,
            contexts: defaults::CONTEXTS,
            latency: Duration::from_millis(defaults::LATENCY_MS),
        }
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn contexts(mut self, n: usize) -> Self {
        self.contexts = n;
        self
    }

    pub fn latency(mut self, d: Duration) -> Self {
        self.latency = d;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.workers == 0 || self.workers > defaults::MAX_WORKERS {
            return Err("workers must be between 1 and 32");
        }
        if self.contexts == 0 {
            return Err("contexts must be at least 1");
        }
        Ok(())
    }
}

enum Work {
    Sym(CryptoOp),
    Asym(KeyOp),
}

/// Shared state between `process` callers and workers.
struct PoolInner<E> {
    id: DriverId,
    host: Arc<dyn DriverHost>,
    engine: E,
    sessions: SessionSet,
    /// Free hardware context numbers.
    free: ArrayQueue<usize>,
    /// Requests holding a context, waiting for a worker.
    ring: SegQueue<(usize, Work)>,
    /// `queue_kind` bits refused since the last completion.
    needwakeup: AtomicU32,
    /// Requests a worker is running right now.
    active: AtomicUsize,
    shutdown: AtomicBool,
    latency: Duration,
}

pub struct PooledDriver<E: Engine = NullEngine> {
    inner: Arc<PoolInner<E>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl PooledDriver<NullEngine> {
    pub fn new(id: DriverId, host: Arc<dyn DriverHost>, config: PoolConfig) -> Result<Self, CryptoError> {
        Self::with_engine(id, host, config, NullEngine)
    }
}

impl<E: Engine> PooledDriver<E> {
    /// Spawn the workers. `id` must be the handle `register_driver`
    /// returned for this driver.
    pub fn with_engine(
        id: DriverId,
        host: Arc<dyn DriverHost>,
        config: PoolConfig,
        engine: E,
    ) -> Result<Self, CryptoError> {
        config.validate().map_err(CryptoError::InvalidArgument)?;
        let inner = Arc::new(PoolInner {
            id,
            host,
            engine,
            sessions: SessionSet::default(),
            free: ArrayQueue::new(config.contexts),
            ring: SegQueue::new(),
            needwakeup: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            latency: config.latency,
        });

        for ctx in 0..config.contexts {
            // capacity is exactly `contexts`
            let _ = inner.free.push(ctx);
        }

        let driver = PooledDriver { inner, handles: Mutex::new(Vec::with_capacity(config.workers)) };
        for n in 0..config.workers {
            let inner = Arc::clone(&driver.inner);
            let handle = thread::Builder::new()
                .name(format!("kcrypto-hw{}-{}", id, n))
                .spawn(move || worker_loop(inner))?;
            driver.handles.lock().push(handle);
        }
        debug!(driver = %id, workers = config.workers, contexts = config.contexts, "pooled driver started");
        Ok(driver)
    }

    pub fn id(&self) -> DriverId {
        self.inner.id
    }

    /// Requests queued on the ring, not yet picked up.
    pub fn queued(&self) -> usize {
        self.inner.ring.len()
    }

    /// Hardware contexts not held by any request.
    pub fn free_contexts(&self) -> usize {
        self.inner.free.len()
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Stop accepting work, let the workers drain the ring, join them.
    /// Must not be called from a completion callback.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!(driver = %self.inner.id, "pooled driver worker panicked");
            }
        }
        // pushed by a `process` that raced the flag
        while let Some((ctx, work)) = self.inner.ring.pop() {
            match work {
                Work::Sym(op) => op.done(Err(OpError::NoDevice)),
                Work::Asym(kop) => kop.done(Err(OpError::NoDevice)),
            }
            let _ = self.inner.free.push(ctx);
        }
    }

    /// Claim a hardware context for a request on queue `which`.
    fn acquire(&self, which: u32) -> Option<usize> {
        if let Some(ctx) = self.inner.free.pop() {
            return Some(ctx);
        }
        self.inner.needwakeup.fetch_or(which, Ordering::AcqRel);
        // a context released before the flag was set is not followed by an unblock
        let ctx = self.inner.free.pop();
        if ctx.is_none() {
            trace!(driver = %self.inner.id, which, "all contexts busy");
        }
        ctx
    }
}

impl<E: Engine> CryptoDriver for PooledDriver<E> {
    fn new_session(&self, chain: &[SessionInit]) -> Result<u32, OpError> {
        self.inner.sessions.open(&self.inner.engine, chain)
    }

    fn free_session(&self, local: u32) -> Result<(), OpError> {
        self.inner.sessions.close(local)
    }

    fn process(&self, op: CryptoOp, _hints: u32) -> Dispatch<CryptoOp> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            op.done(Err(OpError::NoDevice));
            return Dispatch::Accepted;
        }
        match self.acquire(queue_kind::SYMMETRIC) {
            Some(ctx) => {
                self.inner.ring.push((ctx, Work::Sym(op)));
                Dispatch::Accepted
            }
            None => Dispatch::Busy(op),
        }
    }

    fn process_key(&self, kop: KeyOp, _hints: u32) -> Dispatch<KeyOp> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            kop.done(Err(OpError::NoDevice));
            return Dispatch::Accepted;
        }
        match self.acquire(queue_kind::ASYMMETRIC) {
            Some(ctx) => {
                self.inner.ring.push((ctx, Work::Asym(kop)));
                Dispatch::Accepted
            }
            None => Dispatch::Busy(kop),
        }
    }

    fn name(&self) -> &str {
        "pooled"
    }
}

impl<E: Engine> Drop for PooledDriver<E> {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        // Workers exit after draining the ring. Not joined here: the last
        // reference may be dropped on a thread that must not block.
    }
}

/// Worker thread main loop.
fn worker_loop<E: Engine>(inner: Arc<PoolInner<E>>) {
    loop {
        match inner.ring.pop() {
            Some((ctx, work)) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                if !inner.latency.is_zero() {
                    thread::sleep(inner.latency);
                }
                execute(&inner, work);
                inner.active.fetch_sub(1, Ordering::Relaxed);
                if inner.free.push(ctx).is_err() {
                    error!(driver = %inner.id, ctx, "hardware context released twice");
                }

                let which = inner.needwakeup.swap(0, Ordering::AcqRel);
                if which != 0 {
                    if let Err(e) = inner.host.unblock(inner.id, which) {
                        debug!(driver = %inner.id, error = %e, "unblock refused");
                    }
                }
            }
            None => {
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                thread::park_timeout(Duration::from_millis(1));
            }
        }
    }
}

fn execute<E: Engine>(inner: &PoolInner<E>, work: Work) {
    match work {
        Work::Sym(mut op) => {
            let result = if inner.sessions.contains(op.session().local) {
                inner.engine.transform(&mut op)
            } else {
                Err(OpError::InvalidArgument)
            };
            op.done(result);
        }
        Work::Asym(mut kop) => {
            let result = inner.engine.key_transform(&mut kop);
            kop.done(result);
        }
    }
}
