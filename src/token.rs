//! Signed JWT handling: splitting, decoding and the signature check.

use jwt_simple::prelude::{
    Duration, ECDSAP256PublicKeyLike, ECDSAP256kPublicKeyLike, ES256PublicKey, ES256kPublicKey,
    NoCustomClaims, RS256PublicKey, RSAPublicKeyLike, VerificationOptions,
};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    config::TimeClaim,
    digest::header_decode_padding,
    error::{CompileError, Result},
    key::{Curve, IssuerKey},
    utils::decode_base64,
};

/// A compact-serialized JWT, kept both as raw base64url segments and decoded.
#[derive(Debug, Clone)]
pub struct SignedToken {
    raw: String,
    header_b64: String,
    payload_b64: String,
    /// Decoded header JSON bytes.
    pub header_json: Vec<u8>,
    /// Decoded payload JSON bytes.
    pub payload_json: Vec<u8>,
    pub header: Map<String, Value>,
    pub payload: Map<String, Value>,
    pub signature: Vec<u8>,
}

impl SignedToken {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim_end();
        let segments: Vec<&str> = raw.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
            return Err(CompileError::MalformedToken(format!(
                "expected 3 dot-separated segments (header.payload.signature), found {}",
                segments.len()
            )));
        };

        let header_json = decode_base64(header_b64)?;
        let payload_json = decode_base64(payload_b64)?;
        let signature = decode_base64(signature_b64)?;

        Ok(SignedToken {
            header: json_object(&header_json, "header")?,
            payload: json_object(&payload_json, "payload")?,
            raw: raw.to_string(),
            header_b64: header_b64.to_string(),
            payload_b64: payload_b64.to_string(),
            header_json,
            payload_json,
            signature,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header_alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    /// `base64url(header) || '.' || base64url(payload)`, the bytes that are hashed and signed.
    pub fn signing_input(&self) -> Vec<u8> {
        let mut input = Vec::with_capacity(self.header_b64.len() + 1 + self.payload_b64.len());
        input.extend_from_slice(self.header_b64.as_bytes());
        input.push(b'.');
        input.extend_from_slice(self.payload_b64.as_bytes());
        input
    }

    /// Zero-based index of the `.` separating header and payload.
    pub fn period_idx(&self) -> usize {
        self.header_b64.len()
    }

    /// Header and payload JSON as the circuit's base64 decoder produces them:
    /// the zero bytes standing in for the header's `=` padding sit between the two.
    pub fn decoded_view(&self) -> Result<Vec<u8>> {
        let padding = header_decode_padding(self.period_idx())?;
        let mut view =
            Vec::with_capacity(self.header_json.len() + padding.len() + self.payload_json.len());
        view.extend_from_slice(&self.header_json);
        view.extend_from_slice(&padding);
        view.extend_from_slice(&self.payload_json);
        Ok(view)
    }
}

fn json_object(bytes: &[u8], part: &str) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CompileError::MalformedToken(format!(
            "token {part} is not a JSON object"
        ))),
        Err(e) => Err(CompileError::MalformedToken(format!(
            "token {part} is not valid JSON: {e}"
        ))),
    }
}

/// Seconds of clock skew allowed when checking `exp`, `nbf` and `iat`.
const CLOCK_TOLERANCE_SECS: u64 = 15 * 60;

/// Outcome of the signature check. None of them stops compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Valid,
    /// The signature is correct and only tolerated time claims failed.
    ClaimsTolerated(Vec<TimeClaim>),
    /// The signature is correct but the token claims failed validation
    /// for a reason that is not tolerated.
    ClaimsRejected(String),
    /// The signature does not verify under the issuer key.
    Invalid(String),
}

enum Verifier {
    Rs256(RS256PublicKey),
    Es256(ES256PublicKey),
    Es256k(ES256kPublicKey),
}

impl Verifier {
    fn from_key(key: &IssuerKey) -> Result<Self> {
        let key_err = |e: jwt_simple::Error| CompileError::KeyFormat(e.to_string());
        match key {
            IssuerKey::Rsa { n, e } => RS256PublicKey::from_components(n, e)
                .map(Verifier::Rs256)
                .map_err(key_err),
            IssuerKey::Ec { curve, .. } => {
                let point = key.sec1_uncompressed().unwrap_or_default();
                match curve {
                    Curve::P256 => ES256PublicKey::from_bytes(&point)
                        .map(Verifier::Es256)
                        .map_err(key_err),
                    Curve::Secp256k1 => ES256kPublicKey::from_bytes(&point)
                        .map(Verifier::Es256k)
                        .map_err(key_err),
                }
            }
        }
    }

    fn verify(&self, token: &str, options: VerificationOptions) -> std::result::Result<(), String> {
        let verified = match self {
            Verifier::Rs256(key) => key.verify_token::<NoCustomClaims>(token, Some(options)),
            Verifier::Es256(key) => key.verify_token::<NoCustomClaims>(token, Some(options)),
            Verifier::Es256k(key) => key.verify_token::<NoCustomClaims>(token, Some(options)),
        };
        verified.map(drop).map_err(|e| e.to_string())
    }
}

/// Verify the token signature and its time-based claims.
///
/// A failed check is retried with the clock pinned inside the token's own
/// validity window, which separates claim failures from a bad signature.
/// Time claims listed in `tolerated` only produce an informational note.
/// Either way the result is only logged.
pub fn check_signature(
    token: &SignedToken,
    key: &IssuerKey,
    tolerated: &[TimeClaim],
) -> SignatureStatus {
    let status = match Verifier::from_key(key) {
        Ok(verifier) => match verifier.verify(token.raw(), strict_options()) {
            Ok(()) => SignatureStatus::Valid,
            Err(reason) => match verifier.verify(token.raw(), relaxed_options(token)) {
                Ok(()) => {
                    let failed = failed_time_claims(token, chrono::Utc::now().timestamp());
                    if !failed.is_empty() && failed.iter().all(|claim| tolerated.contains(claim)) {
                        SignatureStatus::ClaimsTolerated(failed)
                    } else {
                        SignatureStatus::ClaimsRejected(reason)
                    }
                }
                Err(relaxed_reason) => SignatureStatus::Invalid(relaxed_reason),
            },
        },
        Err(e) => SignatureStatus::Invalid(format!("issuer key not usable for verification: {e}")),
    };

    match &status {
        SignatureStatus::Valid => info!("signature verifies"),
        SignatureStatus::ClaimsTolerated(claims) => info!(
            claims = ?claims.iter().map(|claim| claim.name()).collect::<Vec<_>>(),
            "signature verifies; tolerated time claim checks failed"
        ),
        SignatureStatus::ClaimsRejected(reason) => warn!(
            %reason,
            "signature verifies but token claims were rejected; continuing"
        ),
        SignatureStatus::Invalid(reason) => warn!(
            %reason,
            "SIGNATURE DOES NOT VERIFY under the issuer key; the circuit will not accept this witness"
        ),
    }
    status
}

fn strict_options() -> VerificationOptions {
    VerificationOptions {
        time_tolerance: Some(Duration::from_secs(CLOCK_TOLERANCE_SECS)),
        ..Default::default()
    }
}

/// Time claims of `token` that fail at unix time `now`.
fn failed_time_claims(token: &SignedToken, now: i64) -> Vec<TimeClaim> {
    let tolerance = CLOCK_TOLERANCE_SECS as i64;
    TimeClaim::ALL
        .into_iter()
        .filter(|claim| {
            let Some(at) = token.payload.get(claim.name()).and_then(Value::as_i64) else {
                return false;
            };
            match claim {
                TimeClaim::Exp => at < now - tolerance,
                TimeClaim::Nbf | TimeClaim::Iat => at > now + tolerance,
            }
        })
        .collect()
}

fn relaxed_options(token: &SignedToken) -> VerificationOptions {
    let timestamp = |claim: &str| token.payload.get(claim).and_then(Value::as_u64);
    let pinned = timestamp("exp")
        .or_else(|| timestamp("iat"))
        .or_else(|| timestamp("nbf"));

    VerificationOptions {
        accept_future: true,
        artificial_time: pinned.map(Duration::from_secs),
        ..strict_options()
    }
}
