//! Packing of claim values into field elements.
//!
//! The claim-reveal circuit rebuilds a field element from the value bytes as
//! `sum(byte[i] * 256^i)`, i.e. little-endian by byte position. Packing here
//! must produce the same integer for the same bytes, otherwise the revealed
//! value silently fails to match.

use num_bigint::BigUint;
use num_traits::Zero;
use tracing::warn;

use crate::error::{CompileError, Result};

/// Pack `s` (optionally wrapped in double quotes, as it appears in the raw
/// JSON) into an integer of at most `n_bytes` bytes.
pub fn pack_string(s: &str, n_bytes: usize, quoted: bool) -> Result<BigUint> {
    let mut bytes = Vec::with_capacity(s.len() + 2);
    if quoted {
        bytes.push(b'"');
    }
    bytes.extend_from_slice(s.as_bytes());
    if quoted {
        bytes.push(b'"');
    }

    if bytes.len() > n_bytes {
        return Err(CompileError::Oversize {
            what: format!("packed string '{s}'"),
            len: bytes.len(),
            max: n_bytes,
        });
    }
    // zero padding up to n_bytes leaves the little-endian value unchanged
    Ok(BigUint::from_bytes_le(&bytes))
}

/// Inverse of [`pack_string`] with the same `quoted` flag.
///
/// Only used to cross-check packed values; unprintable output is reported
/// but not rejected.
pub fn unpack_string(n: &BigUint, n_bytes: usize, quoted: bool) -> Result<String> {
    let mut bytes = if n.is_zero() {
        Vec::new()
    } else {
        n.to_bytes_le()
    };
    if bytes.len() > n_bytes {
        return Err(CompileError::Oversize {
            what: "packed integer".into(),
            len: bytes.len(),
            max: n_bytes,
        });
    }

    if !is_printable(&bytes) {
        warn!("unpacked string contains unprintable characters");
    }

    if quoted {
        if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
            return Err(CompileError::MalformedToken(
                "packed value is not wrapped in double quotes".into(),
            ));
        }
        bytes.pop();
        bytes.remove(0);
    }

    String::from_utf8(bytes).map_err(|_| {
        CompileError::MalformedToken("packed value is not valid UTF-8".into())
    })
}

fn is_printable(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace())
}

/// Expand `value` to its code points, zero-padded to `max_length` entries.
pub fn pack_bytes_fixed(value: &str, max_length: usize) -> Result<Vec<u32>> {
    let mut points: Vec<u32> = value.chars().map(u32::from).collect();
    if points.len() > max_length {
        return Err(CompileError::Oversize {
            what: format!("byte input '{value}'"),
            len: points.len(),
            max: max_length,
        });
    }
    points.resize(max_length, 0);
    Ok(points)
}
