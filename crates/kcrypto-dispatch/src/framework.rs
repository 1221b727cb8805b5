//! `Framework`: a running registry plus its threads.
//!
//! ```text
//!   clients ──submit──▶ Registry ──process──▶ drivers
//!                         ▲   │                  │
//!          kcrypto-dispatch   │                done()
//!          (dispatch_pass)    ▼                  │
//!                        ReturnQueues ◀──────────┘
//!                             │
//!                       kcrypto-ret-N (callbacks)
//! ```
//!
//! Created once per process. Dereferences to [`Registry`], so the whole
//! client and driver API is available on it directly.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use kcrypto_core::{CryptoError, DriverHost, Result};
use tracing::{debug, error, info, warn};

use crate::config::FrameworkConfig;
use crate::registry::Registry;

pub struct Framework {
    registry: Arc<Registry>,
    dispatch_stop: Arc<AtomicBool>,
    worker_stop: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Framework {
    /// Start the framework.
    ///
    /// 1. Validates the configuration
    /// 2. Builds the registry (driver table, queues)
    /// 3. Spawns the dispatcher thread
    /// 4. Spawns the callback workers
    pub fn start(config: FrameworkConfig) -> Result<Self> {
        config.validate().map_err(CryptoError::InvalidArgument)?;
        let workers = config.callback_workers;
        let registry = Registry::new(config);

        let mut fw = Self {
            registry,
            dispatch_stop: Arc::new(AtomicBool::new(false)),
            worker_stop: Arc::new(AtomicBool::new(false)),
            dispatcher: None,
            workers: Vec::with_capacity(workers),
        };

        let reg = Arc::clone(&fw.registry);
        let stop = Arc::clone(&fw.dispatch_stop);
        fw.dispatcher = Some(
            thread::Builder::new()
                .name("kcrypto-dispatch".into())
                .spawn(move || dispatcher_loop(&reg, &stop))?,
        );

        for i in 0..workers {
            let reg = Arc::clone(&fw.registry);
            let stop = Arc::clone(&fw.worker_stop);
            let handle = thread::Builder::new()
                .name(format!("kcrypto-ret-{}", i))
                .spawn(move || reg.ret.worker_loop(&stop, reg.config.callback_idle))?;
            fw.workers.push(handle);
        }

        info!(callback_workers = workers, "crypto framework started");
        Ok(fw)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle drivers keep for `unblock`.
    pub fn host(&self) -> Arc<dyn DriverHost> {
        Arc::clone(&self.registry) as Arc<dyn DriverHost>
    }

    /// Drain and tear down.
    ///
    /// 1. Refuses new submissions and session opens (`Busy`)
    /// 2. Waits up to `shutdown_timeout` for accepted requests to call back
    /// 3. Fails whatever is still queued with `Busy`
    /// 4. Stops the dispatcher, then the callback workers (they drain first)
    /// 5. Drops every driver reference
    ///
    /// Returns `true` if nothing was left outstanding. Idempotent.
    pub fn shutdown(&mut self) -> bool {
        if self.dispatcher.is_none() && self.workers.is_empty() {
            return self.registry.inflight() == 0;
        }

        self.registry.begin_shutdown();
        info!(inflight = self.registry.inflight(), "crypto framework shutting down");

        let deadline = Instant::now() + self.registry.config.shutdown_timeout;
        while self.registry.inflight() > 0 && Instant::now() < deadline {
            self.registry.kick();
            thread::sleep(Duration::from_millis(1));
        }

        let failed = self.registry.fail_queued();
        if failed > 0 {
            warn!(failed, "queued requests failed at shutdown");
        }

        self.dispatch_stop.store(true, Ordering::Release);
        self.registry.kick();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }

        self.worker_stop.store(true, Ordering::Release);
        self.registry.ret.wake_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("callback worker panicked");
            }
        }

        let left = self.registry.inflight();
        if left > 0 {
            warn!(left, "requests still held by drivers at shutdown");
        }
        self.registry.table.clear();
        info!("crypto framework stopped");
        left == 0
    }
}

impl Deref for Framework {
    type Target = Registry;

    fn deref(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for Framework {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dispatcher thread body: retry queued work whenever kicked, and at
/// least every `dispatch_interval`.
fn dispatcher_loop(reg: &Registry, stop: &AtomicBool) {
    debug!("dispatcher running");
    while !stop.load(Ordering::Acquire) {
        if reg.dispatch_pass() == 0 {
            reg.dispatch_wake.park(Some(reg.config.dispatch_interval));
        }
    }
    debug!("dispatcher stopped");
}
