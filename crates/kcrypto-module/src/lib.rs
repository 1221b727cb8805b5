//! # kcrypto-module: Default drivers
//!
//! Reference implementations of the `CryptoDriver` contract. Each one
//! schedules work its own way and delegates the transform itself to an
//! [`Engine`].
//!
//! | Driver         | Flags                 | Completes on        | `Busy`             |
//! |----------------|-----------------------|---------------------|--------------------|
//! | `NullDriver`   | `SOFTWARE \| SYNC`    | the caller, inline  | never              |
//! | `PooledDriver` | `HARDWARE`            | its worker threads  | no free context    |
//!
//! ```rust,ignore
//! let id = fw.register_driver(pooled_driver::FLAGS)?;
//! let drv: Arc<dyn CryptoDriver> =
//!     Arc::new(PooledDriver::new(id, fw.host(), PoolConfig::from_env())?);
//! for alg in NullEngine.algorithms() {
//!     fw.register_algorithm(id, alg.id(), 0, 0, &drv)?;
//! }
//! ```

pub mod engine;
pub mod null_driver;
pub mod pooled_driver;
mod sessions;

pub use engine::{Engine, NullEngine};
pub use null_driver::NullDriver;
pub use pooled_driver::{PoolConfig, PooledDriver};
