//! Error types for circuit input compilation.

use thiserror::Error;

/// Errors that abort a compilation run.
///
/// Every variant is fatal: when one is returned no artifact has been written.
/// Conditions that only deserve a diagnostic (e.g. a signature that fails to
/// verify) are logged through `tracing` instead.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Bad or missing configuration field.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unsupported key type or curve, or undecodable key material.
    #[error("unsupported issuer key: {0}")]
    KeyFormat(String),

    /// Token or credential that cannot be compiled (segment count, encoding,
    /// non-minified JSON).
    #[error("malformed credential: {0}")]
    MalformedToken(String),

    /// A configured claim is absent from the credential payload.
    #[error("claim '{0}' not found in credential payload")]
    ClaimNotFound(String),

    /// A value is larger than the space configured for it.
    #[error("{what} is {len} bytes but at most {max} are allowed")]
    Oversize {
        what: String,
        len: usize,
        max: usize,
    },

    /// The SHA-256 padded message does not fit `max_jwt_len`.
    #[error(
        "message is {len} bytes after SHA-256 padding but max_jwt_len is {max}; \
         set max_jwt_len to at least {required}"
    )]
    MessageTooLarge {
        len: usize,
        max: usize,
        required: usize,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CompileError>;
