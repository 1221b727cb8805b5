//! kcrypto error types.
//!
//! Two surfaces: `CryptoError` is returned synchronously by the
//! registration, session and submission APIs; `OpError` travels on a
//! completed request and is what the client's callback inspects.

use std::io;

use thiserror::Error;

/// Completion status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OpError {
    /// The session was migrated to another driver; resubmit the request.
    #[error("session migrated, resubmit required")]
    Again,
    /// Malformed request or parameters the driver rejects.
    #[error("invalid argument")]
    InvalidArgument,
    /// No registered driver can serve the request.
    #[error("no such device")]
    NoDevice,
    /// Driver ran out of memory or descriptors permanently for this request.
    #[error("out of memory")]
    NoMemory,
    /// Driver does not implement the requested operation.
    #[error("operation not supported")]
    NotSupported,
    /// Framework is shutting down.
    #[error("busy")]
    Busy,
    /// Driver-specific failure, errno-style code.
    #[error("driver error: errno {0}")]
    Driver(i32),
}

impl OpError {
    /// Positive errno for this status.
    pub fn errno(self) -> i32 {
        match self {
            OpError::Again => libc::EAGAIN,
            OpError::InvalidArgument => libc::EINVAL,
            OpError::NoDevice => libc::ENODEV,
            OpError::NoMemory => libc::ENOMEM,
            OpError::NotSupported => libc::EOPNOTSUPP,
            OpError::Busy => libc::EBUSY,
            OpError::Driver(e) => e,
        }
    }

    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EAGAIN => OpError::Again,
            libc::EINVAL => OpError::InvalidArgument,
            libc::ENODEV => OpError::NoDevice,
            libc::ENOMEM => OpError::NoMemory,
            libc::EOPNOTSUPP => OpError::NotSupported,
            libc::EBUSY => OpError::Busy,
            e => OpError::Driver(e),
        }
    }
}

/// Result carried by a completed request.
pub type OpResult = std::result::Result<(), OpError>;

/// Errors from the synchronous framework API.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Bad id, out-of-range algorithm, or malformed request.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Driver handle does not resolve to a registered slot.
    #[error("no such driver: {0}")]
    NoSuchDriver(u32),
    /// Session does not resolve to a live driver slot.
    #[error("no such session: {0:#018x}")]
    NoSuchSession(u64),
    /// No registered driver supports the requested algorithm chain.
    #[error("no suitable driver")]
    NoSuitableDriver,
    /// Policy forbids the request (e.g. user asymmetric crypto disabled).
    #[error("permission denied")]
    PermissionDenied,
    /// Return queues saturated or framework draining; try later.
    #[error("busy")]
    Busy,
    /// Framework has been torn down.
    #[error("framework shut down")]
    ShuttingDown,
    /// Driver rejected the call.
    #[error("driver: {0}")]
    Driver(#[from] OpError),
    /// Spawning a framework thread failed.
    #[error("thread spawn: {0}")]
    Spawn(#[from] io::Error),
}

impl CryptoError {
    /// Positive errno for this error.
    pub fn errno(&self) -> i32 {
        match self {
            CryptoError::InvalidArgument(_) => libc::EINVAL,
            CryptoError::NoSuchDriver(_) | CryptoError::NoSuchSession(_) => libc::ENOENT,
            CryptoError::NoSuitableDriver => libc::ENODEV,
            CryptoError::PermissionDenied => libc::EPERM,
            CryptoError::Busy | CryptoError::ShuttingDown => libc::EBUSY,
            CryptoError::Driver(e) => e.errno(),
            CryptoError::Spawn(e) => e.raw_os_error().unwrap_or(libc::EAGAIN),
        }
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;
