//! Issuer public key material.
//!
//! Keys arrive already parsed, as a JWK: RSA keys expose `n`/`e`, EC keys
//! expose `crv`/`x`/`y`, all base64url big-endian integers.

use serde::{Deserialize, Serialize};

use crate::{
    config::Alg,
    error::{CompileError, Result},
    utils::decode_base64,
};

const EC_COORDINATE_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    Secp256k1,
}

impl Curve {
    fn from_jwk_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(Curve::P256),
            "secp256k1" | "P-256K" => Some(Curve::Secp256k1),
            _ => None,
        }
    }

    pub fn alg(self) -> Alg {
        match self {
            Curve::P256 => Alg::Es256,
            Curve::Secp256k1 => Alg::Es256k,
        }
    }
}

/// Decoded issuer key. Integers are unsigned big-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuerKey {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { curve: Curve, x: Vec<u8>, y: Vec<u8> },
}

impl IssuerKey {
    pub fn from_json(json: &str) -> Result<Self> {
        let jwk: Jwk = serde_json::from_str(json)
            .map_err(|e| CompileError::KeyFormat(format!("not a JWK: {e}")))?;
        Self::from_jwk(&jwk)
    }

    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        match jwk.kty.as_str() {
            "RSA" => Ok(IssuerKey::Rsa {
                n: required_component(&jwk.n, "n")?,
                e: required_component(&jwk.e, "e")?,
            }),
            "EC" => {
                let crv = jwk
                    .crv
                    .as_deref()
                    .ok_or_else(|| CompileError::KeyFormat("EC key without 'crv'".into()))?;
                let curve = Curve::from_jwk_name(crv)
                    .ok_or_else(|| CompileError::KeyFormat(format!("unsupported curve {crv}")))?;
                Ok(IssuerKey::Ec {
                    curve,
                    x: coordinate(&jwk.x, "x")?,
                    y: coordinate(&jwk.y, "y")?,
                })
            }
            other => Err(CompileError::KeyFormat(format!(
                "unsupported key type {other}"
            ))),
        }
    }

    /// Signature algorithm implied by the key.
    pub fn alg(&self) -> Alg {
        match self {
            IssuerKey::Rsa { .. } => Alg::Rs256,
            IssuerKey::Ec { curve, .. } => curve.alg(),
        }
    }

    pub fn ensure_alg(&self, alg: Alg) -> Result<()> {
        if self.alg() == alg {
            Ok(())
        } else {
            Err(CompileError::KeyFormat(format!(
                "configured algorithm is {} but the issuer key is for {}",
                alg.name(),
                self.alg().name()
            )))
        }
    }

    /// SEC1 uncompressed point `0x04 || x || y` for EC keys.
    pub fn sec1_uncompressed(&self) -> Option<Vec<u8>> {
        match self {
            IssuerKey::Ec { x, y, .. } => {
                let mut point = Vec::with_capacity(1 + 2 * EC_COORDINATE_LEN);
                point.push(0x04);
                point.extend_from_slice(x);
                point.extend_from_slice(y);
                Some(point)
            }
            IssuerKey::Rsa { .. } => None,
        }
    }
}

fn required_component(value: &Option<String>, name: &str) -> Result<Vec<u8>> {
    let encoded = value
        .as_deref()
        .ok_or_else(|| CompileError::KeyFormat(format!("missing key component '{name}'")))?;
    decode_base64(encoded)
        .map_err(|_| CompileError::KeyFormat(format!("key component '{name}' is not base64url")))
}

/// Coordinates are left-padded to the field size.
fn coordinate(value: &Option<String>, name: &str) -> Result<Vec<u8>> {
    let bytes = required_component(value, name)?;
    if bytes.len() > EC_COORDINATE_LEN {
        return Err(CompileError::KeyFormat(format!(
            "coordinate '{name}' is {} bytes, expected {EC_COORDINATE_LEN}",
            bytes.len()
        )));
    }
    let mut padded = vec![0u8; EC_COORDINATE_LEN - bytes.len()];
    padded.extend_from_slice(&bytes);
    Ok(padded)
}
