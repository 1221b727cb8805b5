//! Framework configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use kcrypto_dispatch::config::FrameworkConfig;
//!
//! // Defaults with env overrides
//! let config = FrameworkConfig::from_env();
//!
//! // Or customize programmatically
//! let config = FrameworkConfig::new()
//!     .callback_workers(2)
//!     .return_queue_max(1024);
//! ```

use std::time::Duration;

use kcrypto_core::env::{env_get, env_get_bool, env_get_ms};

/// Library defaults.
pub mod defaults {
    /// Return-queue depth at which new request allocation is refused.
    pub const RETURN_QUEUE_MAX: usize = 256;
    /// Callback worker threads.
    pub const CALLBACK_WORKERS: usize = 1;
    /// Upper bound on callback workers.
    pub const MAX_CALLBACK_WORKERS: usize = 16;
    /// Dispatcher wakes at least this often even without a submit.
    pub const DISPATCH_INTERVAL_MS: u64 = 10;
    /// Callback worker park timeout.
    pub const CALLBACK_IDLE_MS: u64 = 100;
    /// Driver table slots allocated up front (doubles on demand).
    pub const INITIAL_DRIVERS: usize = 8;
    /// Software drivers may serve requests without an explicit preference.
    pub const ALLOW_SOFT: bool = true;
    /// User-initiated asymmetric requests are allowed.
    pub const USER_ASYM: bool = true;
    /// Upper bound on waiting for outstanding requests at shutdown.
    pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
}

/// Framework configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct FrameworkConfig {
    /// Return-queue depth limit (backpressure on request allocation)
    pub return_queue_max: usize,
    /// Number of callback worker threads
    pub callback_workers: usize,
    /// Periodic dispatch fallback interval
    pub dispatch_interval: Duration,
    /// Callback worker park timeout
    pub callback_idle: Duration,
    /// Initial driver table size
    pub initial_drivers: usize,
    /// Software drivers usable without explicit preference
    pub allow_soft: bool,
    /// User asymmetric crypto allowed
    pub user_asym: bool,
    /// Drain bound at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl FrameworkConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `KCRYPTO_RETURN_QUEUE_MAX` - Return-queue depth limit
    /// - `KCRYPTO_CALLBACK_WORKERS` - Callback worker threads
    /// - `KCRYPTO_DISPATCH_INTERVAL_MS` - Periodic dispatch fallback
    /// - `KCRYPTO_CALLBACK_IDLE_MS` - Callback worker park timeout
    /// - `KCRYPTO_INITIAL_DRIVERS` - Initial driver table size
    /// - `KCRYPTO_ALLOW_SOFT` - Software drivers allowed (0/1)
    /// - `KCRYPTO_USER_ASYM` - User asymmetric crypto allowed (0/1)
    /// - `KCRYPTO_SHUTDOWN_TIMEOUT_MS` - Drain bound at shutdown
    pub fn from_env() -> Self {
        Self {
            return_queue_max: env_get("KCRYPTO_RETURN_QUEUE_MAX", defaults::RETURN_QUEUE_MAX),
            callback_workers: env_get("KCRYPTO_CALLBACK_WORKERS", defaults::CALLBACK_WORKERS)
                .min(defaults::MAX_CALLBACK_WORKERS),
            dispatch_interval: env_get_ms(
                "KCRYPTO_DISPATCH_INTERVAL_MS",
                defaults::DISPATCH_INTERVAL_MS,
            ),
            callback_idle: env_get_ms("KCRYPTO_CALLBACK_IDLE_MS", defaults::CALLBACK_IDLE_MS),
            initial_drivers: env_get("KCRYPTO_INITIAL_DRIVERS", defaults::INITIAL_DRIVERS),
            allow_soft: env_get_bool("KCRYPTO_ALLOW_SOFT", defaults::ALLOW_SOFT),
            user_asym: env_get_bool("KCRYPTO_USER_ASYM", defaults::USER_ASYM),
            shutdown_timeout: env_get_ms(
                "KCRYPTO_SHUTDOWN_TIMEOUT_MS",
                defaults::SHUTDOWN_TIMEOUT_MS,
            ),
        }
    }

    /// Library defaults, no environment lookup.
    /// Useful for tests.
    pub fn new() -> Self {
        Self {
            return_queue_max: defaults::RETURN_QUEUE_MAX,
            callback_workers: defaults::CALLBACK_WORKERS,
            dispatch_interval: Duration::from_millis(defaults::DISPATCH_INTERVAL_MS),
            callback_idle: Duration::from_millis(defaults::CALLBACK_IDLE_MS),
            initial_drivers: defaults::INITIAL_DRIVERS,
            allow_soft: defaults::ALLOW_SOFT,
            user_asym: defaults::USER_ASYM,
            shutdown_timeout: Duration::from_millis(defaults::SHUTDOWN_TIMEOUT_MS),
        }
    }

    pub fn return_queue_max(mut self, n: usize) -> Self {
        self.return_queue_max = n;
        self
    }

    pub fn callback_workers(mut self, n: usize) -> Self {
        self.callback_workers = n.min(defaults::MAX_CALLBACK_WORKERS);
        self
    }

    pub fn dispatch_interval(mut self, d: Duration) -> Self {
        self.dispatch_interval = d;
        self
    }

    pub fn callback_idle(mut self, d: Duration) -> Self {
        self.callback_idle = d;
        self
    }

    pub fn initial_drivers(mut self, n: usize) -> Self {
        self.initial_drivers = n;
        self
    }

    pub fn allow_soft(mut self, allow: bool) -> Self {
        self.allow_soft = allow;
        self
    }

    pub fn user_asym(mut self, allow: bool) -> Self {
        self.user_asym = allow;
        self
    }

    pub fn shutdown_timeout(mut self, d: Duration) -> Self {
        self.shutdown_timeout = d;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.callback_workers == 0 {
            return Err("callback_workers must be at least 1");
        }
        if self.callback_workers > defaults::MAX_CALLBACK_WORKERS {
            return Err("callback_workers exceeds maximum");
        }
        if self.return_queue_max == 0 {
            return Err("return_queue_max must be at least 1");
        }
        if self.dispatch_interval.is_zero() {
            return Err("dispatch_interval must be non-zero");
        }
        if self.callback_idle.is_zero() {
            return Err("callback_idle must be non-zero");
        }
        Ok(())
    }
}
