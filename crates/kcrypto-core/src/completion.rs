//! Completion delivery abstraction.
//!
//! A `CompletionSink` receives finished requests from drivers and gets
//! their callbacks run. The framework's return queues implement it;
//! `CryptoOp::done` / `KeyOp::done` call it.

use crate::request::{CryptoOp, KeyOp};

/// Accepts completed requests.
///
/// **Contract:**
/// - Called from any thread, including driver interrupt-equivalent
///   contexts. Must never block on client code.
/// - Called exactly once per accepted request (enforced by `done(self)`).
pub trait CompletionSink: Send + Sync {
    /// A symmetric op finished.
    fn complete_op(&self, op: CryptoOp);

    /// A key op finished.
    fn complete_key_op(&self, kop: KeyOp);
}
