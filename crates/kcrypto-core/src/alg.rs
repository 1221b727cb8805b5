//! Algorithm identifiers.
//!
//! Symmetric algorithms and asymmetric key operations are numbered the
//! same way drivers and the user-facing device layer number them, so a
//! raw `u32` can cross any boundary and be range-checked on arrival.

use crate::error::CryptoError;

/// Lowest valid symmetric algorithm id.
pub const ALGORITHM_MIN: u32 = 1;
/// Highest valid symmetric algorithm id.
pub const ALGORITHM_MAX: u32 = 24;
/// Highest valid key algorithm id (ids start at 0).
pub const KEY_ALGORITHM_MAX: u32 = 10;

/// Symmetric transform algorithms (ciphers, hashes, MACs, compressors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Algorithm {
    DesCbc = 1,
    TripleDesCbc = 2,
    BlowfishCbc = 3,
    CastCbc = 4,
    SkipjackCbc = 5,
    Md5Hmac = 6,
    Sha1Hmac = 7,
    Ripemd160Hmac = 8,
    Md5Kpdk = 9,
    Sha1Kpdk = 10,
    AesCbc = 11,
    Arc4 = 12,
    Md5 = 13,
    Sha1 = 14,
    Sha2_256Hmac = 15,
    Sha2_384Hmac = 16,
    Sha2_512Hmac = 17,
    NullHmac = 18,
    NullCbc = 19,
    Deflate = 20,
    Md5Hmac96 = 21,
    Sha1Hmac96 = 22,
    Ripemd160Hmac96 = 23,
    Gzip = 24,
}

impl Algorithm {
    /// Every algorithm, in id order.
    pub const ALL: [Algorithm; 24] = [
        Algorithm::DesCbc,
        Algorithm::TripleDesCbc,
        Algorithm::BlowfishCbc,
        Algorithm::CastCbc,
        Algorithm::SkipjackCbc,
        Algorithm::Md5Hmac,
        Algorithm::Sha1Hmac,
        Algorithm::Ripemd160Hmac,
        Algorithm::Md5Kpdk,
        Algorithm::Sha1Kpdk,
        Algorithm::AesCbc,
        Algorithm::Arc4,
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha2_256Hmac,
        Algorithm::Sha2_384Hmac,
        Algorithm::Sha2_512Hmac,
        Algorithm::NullHmac,
        Algorithm::NullCbc,
        Algorithm::Deflate,
        Algorithm::Md5Hmac96,
        Algorithm::Sha1Hmac96,
        Algorithm::Ripemd160Hmac96,
        Algorithm::Gzip,
    ];

    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Whether the algorithm produces a digest rather than transforming data.
    pub fn is_mac(self) -> bool {
        matches!(
            self,
            Algorithm::Md5Hmac
                | Algorithm::Sha1Hmac
                | Algorithm::Ripemd160Hmac
                | Algorithm::Md5Kpdk
                | Algorithm::Sha1Kpdk
                | Algorithm::Md5
                | Algorithm::Sha1
                | Algorithm::Sha2_256Hmac
                | Algorithm::Sha2_384Hmac
                | Algorithm::Sha2_512Hmac
                | Algorithm::NullHmac
                | Algorithm::Md5Hmac96
                | Algorithm::Sha1Hmac96
                | Algorithm::Ripemd160Hmac96
        )
    }

    pub fn is_compression(self) -> bool {
        matches!(self, Algorithm::Deflate | Algorithm::Gzip)
    }

    /// Block size in bytes for block ciphers, 1 for stream/MAC/compression.
    pub fn block_len(self) -> usize {
        match self {
            Algorithm::DesCbc
            | Algorithm::TripleDesCbc
            | Algorithm::BlowfishCbc
            | Algorithm::CastCbc
            | Algorithm::SkipjackCbc => 8,
            Algorithm::AesCbc => 16,
            Algorithm::NullCbc => 4,
            _ => 1,
        }
    }
}

impl From<Algorithm> for u32 {
    fn from(alg: Algorithm) -> u32 {
        alg as u32
    }
}

impl TryFrom<u32> for Algorithm {
    type Error = CryptoError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        if !(ALGORITHM_MIN..=ALGORITHM_MAX).contains(&id) {
            return Err(CryptoError::InvalidArgument("algorithm id out of range"));
        }
        Ok(Algorithm::ALL[(id - ALGORITHM_MIN) as usize])
    }
}

/// Asymmetric key operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum KeyAlgorithm {
    ModExp = 0,
    ModExpCrt = 1,
    DsaSign = 2,
    DsaVerify = 3,
    DhComputeKey = 4,
    ModAdd = 5,
    ModAddInv = 6,
    ModSub = 7,
    ModMult = 8,
    ModMultInv = 9,
    Mod = 10,
}

impl KeyAlgorithm {
    pub const ALL: [KeyAlgorithm; 11] = [
        KeyAlgorithm::ModExp,
        KeyAlgorithm::ModExpCrt,
        KeyAlgorithm::DsaSign,
        KeyAlgorithm::DsaVerify,
        KeyAlgorithm::DhComputeKey,
        KeyAlgorithm::ModAdd,
        KeyAlgorithm::ModAddInv,
        KeyAlgorithm::ModSub,
        KeyAlgorithm::ModMult,
        KeyAlgorithm::ModMultInv,
        KeyAlgorithm::Mod,
    ];

    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Bit for this operation in a feature mask.
    #[inline]
    pub fn feature_bit(self) -> u32 {
        1 << self.id()
    }

    /// `(inputs, outputs)` big-number parameter counts.
    pub fn param_counts(self) -> (usize, usize) {
        match self {
            KeyAlgorithm::ModExp => (3, 1),
            KeyAlgorithm::ModExpCrt => (6, 1),
            KeyAlgorithm::DsaSign => (5, 2),
            KeyAlgorithm::DsaVerify => (7, 0),
            KeyAlgorithm::DhComputeKey => (3, 1),
            KeyAlgorithm::ModAdd => (3, 1),
            KeyAlgorithm::ModAddInv => (2, 1),
            KeyAlgorithm::ModSub => (3, 1),
            KeyAlgorithm::ModMult => (3, 1),
            KeyAlgorithm::ModMultInv => (2, 1),
            KeyAlgorithm::Mod => (2, 1),
        }
    }
}

impl From<KeyAlgorithm> for u32 {
    fn from(alg: KeyAlgorithm) -> u32 {
        alg as u32
    }
}

impl TryFrom<u32> for KeyAlgorithm {
    type Error = CryptoError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        KeyAlgorithm::ALL
            .get(id as usize)
            .copied()
            .ok_or(CryptoError::InvalidArgument("key algorithm id out of range"))
    }
}

/// Per-algorithm registration flags.
pub mod alg_flags {
    /// Set on every registered algorithm.
    pub const SUPPORTED: u32 = 1 << 0;
    /// Driver can feed its hardware RNG for this algorithm.
    pub const RNG_ENABLE: u32 = 1 << 1;
    /// DSA signatures include the SHA-1 step.
    pub const DSA_SHA: u32 = 1 << 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_roundtrip_covers_range() {
        for id in ALGORITHM_MIN..=ALGORITHM_MAX {
            let alg = Algorithm::try_from(id).unwrap();
            assert_eq!(alg.id(), id);
        }
    }

    #[test]
    fn test_algorithm_out_of_range() {
        assert!(Algorithm::try_from(0).is_err());
        assert!(Algorithm::try_from(ALGORITHM_MAX + 1).is_err());
    }

    #[test]
    fn test_key_algorithm_range() {
        assert_eq!(KeyAlgorithm::try_from(0).unwrap(), KeyAlgorithm::ModExp);
        assert_eq!(KeyAlgorithm::try_from(KEY_ALGORITHM_MAX).unwrap(), KeyAlgorithm::Mod);
        assert!(KeyAlgorithm::try_from(KEY_ALGORITHM_MAX + 1).is_err());
    }

    #[test]
    fn test_classification() {
        assert!(Algorithm::Sha1Hmac.is_mac());
        assert!(!Algorithm::AesCbc.is_mac());
        assert!(Algorithm::Deflate.is_compression());
        assert_eq!(Algorithm::AesCbc.block_len(), 16);
        assert_eq!(KeyAlgorithm::DsaSign.param_counts(), (5, 2));
        assert_eq!(KeyAlgorithm::DhComputeKey.feature_bit(), 1 << 4);
    }
}
