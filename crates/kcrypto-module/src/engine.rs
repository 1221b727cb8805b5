//! Transform engines.
//!
//! A driver decides *when* a request runs (inline, on a worker, after a
//! hardware context frees up); an `Engine` decides *what* running it
//! means. Swapping the engine changes the math without touching the
//! driver's scheduling.

use kcrypto_core::{Algorithm, CryptoOp, KeyAlgorithm, KeyOp, OpError, OpResult};

/// Performs the transforms of one driver.
pub trait Engine: Send + Sync + 'static {
    /// Symmetric algorithms this engine implements.
    fn algorithms(&self) -> &[Algorithm];

    /// Key operations this engine implements.
    fn key_algorithms(&self) -> &[KeyAlgorithm] {
        &[]
    }

    /// Apply every descriptor of `op` to its buffer.
    fn transform(&self, op: &mut CryptoOp) -> OpResult;

    /// Compute `kop`'s outputs from its inputs.
    fn key_transform(&self, _kop: &mut KeyOp) -> OpResult {
        Err(OpError::NotSupported)
    }

    fn supports(&self, alg: Algorithm) -> bool {
        self.algorithms().contains(&alg)
    }

    fn supports_key(&self, alg: KeyAlgorithm) -> bool {
        self.key_algorithms().contains(&alg)
    }
}

/// Digest length written by the null MAC.
pub const NULL_HMAC_LEN: usize = 12;

/// Null transforms and small-operand modular arithmetic.
///
/// - `NULL_CBC` leaves the data as is.
/// - `NULL_HMAC` writes an all-zero digest.
/// - Key ops work on big-endian operands of at most 8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEngine;

const NULL_ALGS: [Algorithm; 2] = [Algorithm::NullCbc, Algorithm::NullHmac];

const NULL_KEY_ALGS: [KeyAlgorithm; 6] = [
    KeyAlgorithm::ModExp,
    KeyAlgorithm::ModAdd,
    KeyAlgorithm::ModAddInv,
    KeyAlgorithm::ModSub,
    KeyAlgorithm::ModMult,
    KeyAlgorithm::Mod,
];

impl Engine for NullEngine {
    fn algorithms(&self) -> &[Algorithm] {
        &NULL_ALGS
    }

    fn key_algorithms(&self) -> &[KeyAlgorithm] {
        &NULL_KEY_ALGS
    }

    fn transform(&self, op: &mut CryptoOp) -> OpResult {
        let len = op.buf.len();
        let mut digest = None;
        for desc in op.descs() {
            match desc.range() {
                Some(r) if r.end <= len => {}
                _ => return Err(OpError::InvalidArgument),
            }
            match desc.alg {
                Algorithm::NullCbc => {}
                Algorithm::NullHmac => digest = Some(desc.inject),
                _ => return Err(OpError::NotSupported),
            }
        }

        if let Some(inject) = digest {
            match op.mac.as_mut() {
                Some(mac) => {
                    mac.clear();
                    mac.resize(NULL_HMAC_LEN, 0);
                }
                None => {
                    let end = inject.checked_add(NULL_HMAC_LEN).ok_or(OpError::InvalidArgument)?;
                    let out = op.buf.get_mut(inject..end).ok_or(OpError::InvalidArgument)?;
                    out.fill(0);
                }
            }
        }
        Ok(())
    }

    fn key_transform(&self, kop: &mut KeyOp) -> OpResult {
        let ins = kop
            .inputs()
            .iter()
            .map(|p| decode(p))
            .collect::<Result<Vec<u64>, OpError>>()?;
        let m = *ins.last().ok_or(OpError::InvalidArgument)?;
        if m == 0 {
            return Err(OpError::InvalidArgument);
        }
        let m = m as u128;

        let out = match kop.alg() {
            KeyAlgorithm::ModExp => mod_pow(ins[0] as u128, ins[1], m),
            KeyAlgorithm::ModAdd => (ins[0] as u128 + ins[1] as u128) % m,
            KeyAlgorithm::ModSub => (ins[0] as u128 % m + m - ins[1] as u128 % m) % m,
            KeyAlgorithm::ModMult => (ins[0] as u128 * ins[1] as u128) % m,
            KeyAlgorithm::ModAddInv => (m - ins[0] as u128 % m) % m,
            KeyAlgorithm::Mod => ins[0] as u128 % m,
            _ => return Err(OpError::NotSupported),
        };

        let slot = kop.outputs_mut().first_mut().ok_or(OpError::InvalidArgument)?;
        *slot = encode(out as u64);
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<u64, OpError> {
    if bytes.len() > 8 {
        return Err(OpError::InvalidArgument);
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

/// Minimal big-endian encoding (zero is one zero byte).
fn encode(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    bytes[first..].to_vec()
}

fn mod_pow(mut base: u128, mut exp: u64, m: u128) -> u128 {
    let mut acc = 1 % m;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc * base % m;
        }
        base = base * base % m;
        exp >>= 1;
    }
    acc
}
