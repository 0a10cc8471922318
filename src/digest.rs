//! SHA-256 padding and digest representations.
//!
//! The padded message is handed to the circuit as explicit witness data, so
//! the padding here has to be byte-identical to what the circuit's hashing
//! component expects.

use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::{
    codec::digest_to_limbs,
    error::{CompileError, Result},
    utils::encode_base64url,
};

/// Append `0x80`, zeros until `(len + 4) * 8 ≡ 0 (mod 512)`, then the
/// original bit length as 4 big-endian bytes.
pub fn sha256_pad(prepad: &[u8]) -> Result<Vec<u8>> {
    let bit_len = u32::try_from(prepad.len() as u64 * 8).map_err(|_| CompileError::Oversize {
        what: "message to hash".into(),
        len: prepad.len(),
        max: (u32::MAX / 8) as usize,
    })?;

    let mut padded = Vec::with_capacity(prepad.len() + 72);
    padded.extend_from_slice(prepad);
    padded.push(0x80);
    while (padded.len() + 4) % 64 != 0 {
        padded.push(0);
    }
    padded.extend_from_slice(&bit_len.to_be_bytes());
    Ok(padded)
}

/// Zero-extend a padded message to `target_len` bytes.
pub fn zero_extend(mut padded: Vec<u8>, target_len: usize) -> Result<Vec<u8>> {
    if padded.len() > target_len {
        return Err(CompileError::MessageTooLarge {
            len: padded.len(),
            max: target_len,
            required: padded.len().div_ceil(64) * 64,
        });
    }
    padded.resize(target_len, 0);
    Ok(padded)
}

/// Zero bytes the circuit's base64 decoder emits for the `=` padding of a
/// header of `header_len` base64 characters.
pub fn header_decode_padding(header_len: usize) -> Result<Vec<u8>> {
    match header_len % 4 {
        0 => Ok(Vec::new()),
        2 => Ok(vec![0; 2]),
        3 => Ok(vec![0; 1]),
        _ => Err(CompileError::MalformedToken(format!(
            "header of {header_len} base64 characters is not a valid encoding"
        ))),
    }
}

/// SHA-256 digest of the unpadded message, with every representation the
/// witness and the auxiliary data need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDigest {
    pub bytes: [u8; 32],
}

impl MessageDigest {
    pub fn hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Big-endian bits, most significant first.
    pub fn bits(&self) -> Vec<u8> {
        self.bytes
            .iter()
            .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1))
            .collect()
    }

    pub fn base64url(&self) -> String {
        encode_base64url(&self.bytes)
    }

    /// See [`digest_to_limbs`].
    pub fn limbs(&self) -> (BigUint, u8) {
        digest_to_limbs(&self.bytes)
    }
}

pub fn digest(prepad: &[u8]) -> MessageDigest {
    MessageDigest {
        bytes: Sha256::digest(prepad).into(),
    }
}
