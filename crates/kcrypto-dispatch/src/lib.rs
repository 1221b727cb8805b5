//! # kcrypto-dispatch: crypto request dispatch framework
//!
//! Brokers symmetric and asymmetric crypto requests between clients and
//! any number of registered drivers.
//!
//! ```text
//! register_driver ─▶ DriverTable ◀─ open_session / close_session
//!                        │
//! submit ─▶ direct process() ─┬─ Accepted ─▶ driver ─ done() ─▶ ReturnQueues ─▶ callback
//!              │              └─ Busy ─▶ SubmitQueue (head), driver blocked
//!              └─ queued ─▶ dispatch_pass (on kick, unblock, or interval)
//! ```
//!
//! | Piece            | Module      |
//! |------------------|-------------|
//! | capability table | `table`     |
//! | session manager  | `session`   |
//! | submit / dispatch / migration | `dispatch`, `queue` |
//! | completion path  | `ret`       |
//! | threads, teardown | `framework` |
//!
//! ```rust,ignore
//! let fw = Framework::start(FrameworkConfig::from_env())?;
//! let id = fw.register_driver(driver_flags::SOFTWARE | driver_flags::SYNC)?;
//! let drv: Arc<dyn CryptoDriver> = Arc::new(NullDriver::new());
//! fw.register_algorithm(id, Algorithm::NullCbc.id(), 0, 0, &drv)?;
//!
//! let sid = fw.open_session(&[SessionInit::new(Algorithm::NullCbc, key)], HwPreference::Any)?;
//! let op = fw.new_op(sid, descs, buf, |op| println!("{:?}", op.result()))?;
//! fw.submit(op)?;
//! ```

pub mod config;
mod dispatch;
mod framework;
mod parking;
mod queue;
mod registry;
mod ret;
mod session;
mod stats;
mod table;

pub use config::FrameworkConfig;
pub use framework::Framework;
pub use registry::Registry;
pub use session::HwPreference;
pub use stats::FrameworkStats;
pub use table::DriverInfo;
