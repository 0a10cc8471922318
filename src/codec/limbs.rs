//! Big-integer limb decomposition.
//!
//! The circuits do modular arithmetic on integers split into `limb_bits`-wide
//! chunks. Sources are unsigned big-endian byte strings; limb 0 is the least
//! significant chunk.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::{
    error::{CompileError, Result},
    utils::{bytes_to_biguint, decode_base64},
};

/// Split a big-endian unsigned integer into the minimal number of limbs.
///
/// Empty or all-zero input yields a single zero limb.
pub fn bytes_to_limbs(bytes: &[u8], limb_bits: usize) -> Vec<BigUint> {
    biguint_to_limbs(&bytes_to_biguint(bytes), limb_bits)
}

pub fn biguint_to_limbs(n: &BigUint, limb_bits: usize) -> Vec<BigUint> {
    assert!(limb_bits > 0, "limb width must be positive");
    if n.is_zero() {
        return vec![BigUint::zero()];
    }

    let num_limbs = (n.bits() as usize).div_ceil(limb_bits);
    let mask = (BigUint::one() << limb_bits) - BigUint::one();
    (0..num_limbs)
        .map(|i| (n >> (i * limb_bits)) & &mask)
        .collect()
}

/// Like [`bytes_to_limbs`] but zero-extended to exactly `n_limbs` limbs, the
/// layout of circuits with a fixed limb count.
pub fn bytes_to_limbs_fixed(bytes: &[u8], limb_bits: usize, n_limbs: usize) -> Result<Vec<BigUint>> {
    let mut limbs = bytes_to_limbs(bytes, limb_bits);
    if limbs.len() > n_limbs {
        return Err(CompileError::Oversize {
            what: format!("{}-bit value", bytes_to_biguint(bytes).bits()),
            len: bytes.len(),
            max: n_limbs * limb_bits / 8,
        });
    }
    limbs.resize(n_limbs, BigUint::zero());
    Ok(limbs)
}

/// Decode a base64url big-integer (JWK style) and split it into limbs.
pub fn base64url_to_limbs(b64: &str, limb_bits: usize) -> Result<Vec<BigUint>> {
    Ok(bytes_to_limbs(&decode_base64(b64)?, limb_bits))
}

/// Inverse of [`bytes_to_limbs`]: `sum(limb[i] * 2^(i * limb_bits))`.
pub fn limbs_to_biguint(limbs: &[BigUint], limb_bits: usize) -> BigUint {
    limbs
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, limb| (acc << limb_bits) + limb)
}

/// Split a SHA-256 digest into its first 31 bytes (big-endian) and its last
/// byte. This is the two-limb format of the digest adapter between the
/// hashing circuit and the signature circuit, independent of `limb_bits`.
pub fn digest_to_limbs(digest: &[u8; 32]) -> (BigUint, u8) {
    (BigUint::from_bytes_be(&digest[..31]), digest[31])
}
