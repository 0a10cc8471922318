use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use num_bigint::BigUint;

use crate::error::{CompileError, Result};

/// Decode base64url (with or without `=` padding), falling back to the
/// standard alphabet. Lengths with `len % 4 == 1` are never valid.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    if encoded.len() % 4 == 1 {
        return Err(CompileError::MalformedToken(format!(
            "base64 string of length {} cannot be decoded",
            encoded.len()
        )));
    }

    let mut candidates = vec![encoded.to_string()];

    let mut padded = encoded.to_string();
    match encoded.len() % 4 {
        2 => padded.push_str("=="),
        3 => padded.push('='),
        _ => {}
    }

    if padded != encoded {
        candidates.push(padded);
    }

    for candidate in candidates {
        if let Ok(decoded) = URL_SAFE_NO_PAD.decode(candidate.as_bytes()) {
            return Ok(decoded);
        }
        if let Ok(decoded) = URL_SAFE.decode(candidate.as_bytes()) {
            return Ok(decoded);
        }
        if let Ok(decoded) = STANDARD.decode(candidate.as_bytes()) {
            return Ok(decoded);
        }
    }

    Err(CompileError::MalformedToken(format!(
        "'{encoded}' is not valid base64"
    )))
}

pub fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Big-endian, unsigned.
pub fn bytes_to_biguint(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

pub fn hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Position of the first occurrence of `needle` in `haystack` at or after `from`.
pub fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
