//! Byte intervals of claims inside minified JSON.
//!
//! The circuit locates a claim by its `"<name>":` key token and checks the
//! value that follows with a fixed grammar. The intervals computed here are
//! handed to it as hints, so they must follow the same grammar.

use tracing::debug;

use crate::{
    config::ClaimType,
    error::{CompileError, Result},
    utils::find_bytes,
};

/// Half-open byte interval `[left, right)` of a claim.
///
/// `left` is the start of the `"<name>":` key token, `value_start` the first
/// byte of the value and `right` one past its last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimInterval {
    pub left: usize,
    pub value_start: usize,
    pub right: usize,
}

impl ClaimInterval {
    pub fn value<'a>(&self, message: &'a [u8]) -> &'a [u8] {
        &message[self.value_start..self.right]
    }
}

/// Reject JSON with a space after a key's colon (`"key": value`).
pub fn ensure_minified(json: &[u8]) -> Result<()> {
    match find_bytes(json, b"\": ", 0) {
        Some(pos) => Err(CompileError::MalformedToken(format!(
            "JSON is not minified: found '\": ' at position {pos}"
        ))),
        None => Ok(()),
    }
}

pub fn is_minified(json: &[u8]) -> bool {
    ensure_minified(json).is_ok()
}

/// Find the interval of the value following `key_token` (`"<name>":`).
pub fn find_value_interval(
    message: &[u8],
    key_token: &str,
    claim_type: ClaimType,
) -> Result<ClaimInterval> {
    let left = find_bytes(message, key_token.as_bytes(), 0)
        .ok_or_else(|| CompileError::ClaimNotFound(claim_name(key_token)))?;
    let value_start = left + key_token.len();

    let right = match claim_type {
        ClaimType::String => scan_string(message, value_start),
        ClaimType::Number => scan_while(message, value_start, |b| b.is_ascii_digit()),
        ClaimType::Bool => scan_while(message, value_start, |b| b"truefalse".contains(&b)),
        ClaimType::Null => message
            .get(value_start..value_start + 4)
            .filter(|literal| *literal == b"null")
            .map(|_| value_start + 4),
        ClaimType::Array => scan_nested(message, value_start, b'[', b']'),
        ClaimType::Object => scan_nested(message, value_start, b'{', b'}'),
    }
    .ok_or_else(|| {
        CompileError::MalformedToken(format!(
            "no {:?} value found after {key_token}",
            claim_type
        ))
    })?;

    debug!(key = key_token, left, right, "located claim");
    Ok(ClaimInterval {
        left,
        value_start,
        right,
    })
}

fn claim_name(key_token: &str) -> String {
    key_token
        .trim_end_matches(':')
        .trim_matches('"')
        .to_string()
}

/// One past the closing quote, skipping backslash-escaped bytes.
fn scan_string(message: &[u8], start: usize) -> Option<usize> {
    if message.get(start) != Some(&b'"') {
        return None;
    }
    let mut i = start + 1;
    while i < message.len() {
        match message[i] {
            b'\\' => i += 2,
            b'"' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// First position not matching `accept`; the run must be non-empty.
fn scan_while(message: &[u8], start: usize, accept: impl Fn(u8) -> bool) -> Option<usize> {
    let end = message[start.min(message.len())..]
        .iter()
        .position(|b| !accept(*b))
        .map(|offset| start + offset)?;
    (end > start).then_some(end)
}

/// One past the bracket that closes the one at `start`. Every bracket byte
/// counts, including those inside string literals, as in the circuit.
fn scan_nested(message: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    if message.get(start) != Some(&open) {
        return None;
    }
    let mut depth = 0usize;
    for (i, &b) in message.iter().enumerate().skip(start) {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + 1);
            }
        }
    }
    None
}

/// Part of `s` after the first `@`.
pub fn get_domain(s: &str) -> Result<&str> {
    s.split_once('@')
        .map(|(_, domain)| domain)
        .ok_or_else(|| CompileError::MalformedToken(format!("no '@' found in '{s}'")))
}
