//! Driver and session identifiers

use core::fmt;

/// Handle of one driver capability slot.
///
/// Indexes the framework's driver table. A handle may be handed out
/// again after its slot is fully reclaimed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DriverId(u32);

impl DriverId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        DriverId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for DriverId {
    #[inline]
    fn from(id: u32) -> Self {
        DriverId(id)
    }
}

impl From<DriverId> for u32 {
    #[inline]
    fn from(id: DriverId) -> Self {
        id.0
    }
}

impl fmt::Debug for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverId({})", self.0)
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A session: the owning driver plus the id that driver assigned.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId {
    pub driver: DriverId,
    pub local: u32,
}

impl SessionId {
    #[inline]
    pub const fn new(driver: DriverId, local: u32) -> Self {
        SessionId { driver, local }
    }

    /// Packed form: driver handle in the upper 32 bits, local id in the lower.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        ((self.driver.0 as u64) << 32) | self.local as u64
    }

    #[inline]
    pub const fn from_u64(raw: u64) -> Self {
        SessionId {
            driver: DriverId((raw >> 32) as u32),
            local: raw as u32,
        }
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}:{})", self.driver.0, self.local)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.as_u64())
    }
}
