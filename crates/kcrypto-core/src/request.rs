//! Request types.
//!
//! A `CryptoOp` (symmetric) or `KeyOp` (asymmetric) is owned by exactly
//! one party at a time: the client, a framework queue, or a driver. It
//! moves between them by value, so an op can never sit in a queue and
//! inside a driver at once, and `done()` consumes it, so it completes
//! at most once.

use std::fmt;
use std::sync::Arc;

use crate::alg::{Algorithm, KeyAlgorithm};
use crate::completion::CompletionSink;
use crate::error::{CryptoError, OpResult};
use crate::id::{DriverId, SessionId};

/// Completion callback. Receives the finished request back.
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Request flags set by the client.
pub mod op_flags {
    /// Run the callback on whatever context completes the request.
    /// Only for trivial callbacks (waking a waiter).
    pub const CALLBACK_IMMEDIATE: u32 = 1 << 0;
    /// Run the callback immediately only if the owning driver is `SYNC`.
    pub const CALLBACK_IF_SYNC: u32 = 1 << 1;
    /// Batchable: always enqueue, let a dispatch pass pick it up.
    pub const BATCH: u32 = 1 << 2;
}

/// Hints passed to `CryptoDriver::process`.
pub mod hint {
    /// More batchable work for the same driver follows immediately.
    pub const MORE: u32 = 1 << 0;
}

// Lifecycle bits (framework-maintained).
const STATE_DONE: u8 = 1 << 0;
const STATE_ON_RETURN_QUEUE: u8 = 1 << 1;

/// One link of a session-open chain: which algorithm, with which key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionInit {
    pub alg: Algorithm,
    pub key: Vec<u8>,
    /// Truncated MAC length in bytes, 0 for the algorithm's full length.
    pub mac_len: usize,
}

impl SessionInit {
    pub fn new(alg: Algorithm, key: impl Into<Vec<u8>>) -> Self {
        Self { alg, key: key.into(), mac_len: 0 }
    }

    pub fn mac_len(mut self, len: usize) -> Self {
        self.mac_len = len;
        self
    }
}

impl fmt::Debug for SessionInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.debug_struct("SessionInit")
            .field("alg", &self.alg)
            .field("key_len", &self.key.len())
            .field("mac_len", &self.mac_len)
            .finish()
    }
}

/// One transform step applied to an op's buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoDesc {
    pub alg: Algorithm,
    /// Per-request rekey; `None` uses the session key.
    pub key: Option<Vec<u8>>,
    /// Explicit IV; `None` lets the driver generate or chain one.
    pub iv: Option<Vec<u8>>,
    /// Bytes to skip before the transform starts.
    pub skip: usize,
    /// Bytes to process.
    pub len: usize,
    /// Offset where a MAC result is written (MAC steps only).
    pub inject: usize,
    pub encrypt: bool,
}

impl CryptoDesc {
    pub fn cipher(alg: Algorithm, skip: usize, len: usize, encrypt: bool) -> Self {
        Self { alg, key: None, iv: None, skip, len, inject: 0, encrypt }
    }

    pub fn mac(alg: Algorithm, skip: usize, len: usize, inject: usize) -> Self {
        Self { alg, key: None, iv: None, skip, len, inject, encrypt: false }
    }

    pub fn with_iv(mut self, iv: impl Into<Vec<u8>>) -> Self {
        self.iv = Some(iv.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Byte range of the buffer this step covers, `None` if it overflows.
    pub fn range(&self) -> Option<std::ops::Range<usize>> {
        let end = self.skip.checked_add(self.len)?;
        Some(self.skip..end)
    }
}

impl fmt::Debug for CryptoDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoDesc")
            .field("alg", &self.alg)
            .field("rekey", &self.key.is_some())
            .field("iv", &self.iv.as_ref().map(Vec::len))
            .field("skip", &self.skip)
            .field("len", &self.len)
            .field("inject", &self.inject)
            .field("encrypt", &self.encrypt)
            .finish()
    }
}

/// A symmetric crypto request.
pub struct CryptoOp {
    session: SessionId,
    descs: Vec<CryptoDesc>,
    /// Data the descriptors operate on, transformed in place.
    pub buf: Vec<u8>,
    /// Separate MAC output buffer, if the caller wants one.
    pub mac: Option<Vec<u8>>,
    flags: u32,
    result: OpResult,
    state: u8,
    callback: Option<Callback<CryptoOp>>,
    sink: Option<Arc<dyn CompletionSink>>,
}

impl CryptoOp {
    pub fn new<F>(session: SessionId, descs: Vec<CryptoDesc>, buf: Vec<u8>, callback: F) -> Self
    where
        F: FnOnce(CryptoOp) + Send + 'static,
    {
        Self {
            session,
            descs,
            buf,
            mac: None,
            flags: 0,
            result: Ok(()),
            state: 0,
            callback: Some(Box::new(callback)),
            sink: None,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_mac(mut self, mac: Vec<u8>) -> Self {
        self.mac = Some(mac);
        self
    }

    #[inline]
    pub fn session(&self) -> SessionId {
        self.session
    }

    #[inline]
    pub fn descs(&self) -> &[CryptoDesc] {
        &self.descs
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn is_batch(&self) -> bool {
        self.flags & op_flags::BATCH != 0
    }

    #[inline]
    pub fn result(&self) -> OpResult {
        self.result
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state & STATE_DONE != 0
    }

    #[inline]
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Re-arm a finished op for resubmission (e.g. after `OpError::Again`).
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(CryptoOp) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Finish the request. Called by the driver exactly once, from any
    /// thread. Hands the op to the framework's completion path, or runs
    /// the callback inline when no framework is attached.
    pub fn done(mut self, result: OpResult) {
        self.result = result;
        self.state |= STATE_DONE;
        match self.sink.take() {
            Some(sink) => sink.complete_op(self),
            None => self.deliver(),
        }
    }

    /// Run the callback on the current thread.
    pub fn deliver(mut self) {
        if let Some(cb) = self.callback.take() {
            cb(self);
        }
    }

    // ── framework side ──

    /// Bind the op to a completion path and reset its completion state.
    pub fn attach(&mut self, sink: Arc<dyn CompletionSink>) {
        self.sink = Some(sink);
        self.state = 0;
        self.result = Ok(());
    }

    pub fn set_session(&mut self, session: SessionId) {
        self.session = session;
    }

    #[inline]
    pub fn on_return_queue(&self) -> bool {
        self.state & STATE_ON_RETURN_QUEUE != 0
    }

    pub fn set_on_return_queue(&mut self, on: bool) {
        if on {
            self.state |= STATE_ON_RETURN_QUEUE;
        } else {
            self.state &= !STATE_ON_RETURN_QUEUE;
        }
    }
}

impl fmt::Debug for CryptoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoOp")
            .field("session", &self.session)
            .field("descs", &self.descs)
            .field("buf_len", &self.buf.len())
            .field("flags", &self.flags)
            .field("result", &self.result)
            .field("done", &self.is_done())
            .finish()
    }
}

/// An asymmetric key-operation request.
///
/// Not session bound: the framework picks a driver that supports
/// `alg()` and records it on the request.
pub struct KeyOp {
    alg: KeyAlgorithm,
    /// Inputs first, then outputs.
    params: Vec<Vec<u8>>,
    inputs: usize,
    flags: u32,
    result: OpResult,
    state: u8,
    driver: Option<DriverId>,
    callback: Option<Callback<KeyOp>>,
    sink: Option<Arc<dyn CompletionSink>>,
}

impl KeyOp {
    /// Build a key op. `inputs` must match the operation's input count.
    pub fn new<F>(alg: KeyAlgorithm, inputs: Vec<Vec<u8>>, callback: F) -> Result<Self, CryptoError>
    where
        F: FnOnce(KeyOp) + Send + 'static,
    {
        let (nin, nout) = alg.param_counts();
        if inputs.len() != nin {
            return Err(CryptoError::InvalidArgument("wrong key op input count"));
        }
        let mut params = inputs;
        params.resize_with(nin + nout, Vec::new);
        Ok(Self {
            alg,
            params,
            inputs: nin,
            flags: 0,
            result: Ok(()),
            state: 0,
            driver: None,
            callback: Some(Box::new(callback)),
            sink: None,
        })
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn alg(&self) -> KeyAlgorithm {
        self.alg
    }

    pub fn inputs(&self) -> &[Vec<u8>] {
        &self.params[..self.inputs]
    }

    pub fn outputs(&self) -> &[Vec<u8>] {
        &self.params[self.inputs..]
    }

    pub fn outputs_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.params[self.inputs..]
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn is_batch(&self) -> bool {
        self.flags & op_flags::BATCH != 0
    }

    #[inline]
    pub fn result(&self) -> OpResult {
        self.result
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state & STATE_DONE != 0
    }

    #[inline]
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Driver the request was dispatched to, once chosen.
    #[inline]
    pub fn driver(&self) -> Option<DriverId> {
        self.driver
    }

    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(KeyOp) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Finish the request. See [`CryptoOp::done`].
    pub fn done(mut self, result: OpResult) {
        self.result = result;
        self.state |= STATE_DONE;
        match self.sink.take() {
            Some(sink) => sink.complete_key_op(self),
            None => self.deliver(),
        }
    }

    pub fn deliver(mut self) {
        if let Some(cb) = self.callback.take() {
            cb(self);
        }
    }

    // ── framework side ──

    pub fn attach(&mut self, sink: Arc<dyn CompletionSink>) {
        self.sink = Some(sink);
        self.state = 0;
        self.result = Ok(());
    }

    pub fn set_driver(&mut self, driver: Option<DriverId>) {
        self.driver = driver;
    }

    #[inline]
    pub fn on_return_queue(&self) -> bool {
        self.state & STATE_ON_RETURN_QUEUE != 0
    }

    pub fn set_on_return_queue(&mut self, on: bool) {
        if on {
            self.state |= STATE_ON_RETURN_QUEUE;
        } else {
            self.state &= !STATE_ON_RETURN_QUEUE;
        }
    }
}

impl fmt::Debug for KeyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOp")
            .field("alg", &self.alg)
            .field("inputs", &self.inputs)
            .field("outputs", &(self.params.len() - self.inputs))
            .field("flags", &self.flags)
            .field("driver", &self.driver)
            .field("result", &self.result)
            .field("done", &self.is_done())
            .finish()
    }
}
