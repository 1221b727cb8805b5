//! # kcrypto-core: Types and trait seams for kcrypto
//!
//! This crate defines everything the crypto dispatch framework and its
//! drivers agree on, and nothing else. No threads, no queues, no
//! global state.
//!
//! ## Seams
//!
//! | Trait            | Implemented by                  | Called by          |
//! |------------------|---------------------------------|--------------------|
//! | `CryptoDriver`   | hardware / software drivers     | the dispatcher     |
//! | `DriverHost`     | the framework registry          | drivers (unblock)  |
//! | `CompletionSink` | the framework return queues     | `CryptoOp::done`   |
//!
//! A driver crate depends on this crate only, never on the dispatcher.

pub mod alg;
pub mod id;
pub mod request;
pub mod driver;
pub mod completion;
pub mod error;
pub mod env;

pub use alg::{Algorithm, KeyAlgorithm};
pub use completion::CompletionSink;
pub use driver::{CryptoDriver, Dispatch, DriverHost};
pub use error::{CryptoError, OpError, OpResult, Result};
pub use id::{DriverId, SessionId};
pub use request::{CryptoDesc, CryptoOp, KeyOp, SessionInit};
