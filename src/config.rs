//! Claim-revelation configuration.
//!
//! The configuration is a flat JSON object. A handful of reserved keys
//! (`alg`, `credtype`, ...) select global behaviour; every other key names a
//! claim of the credential and maps to a [`ClaimConfig`].

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{CompileError, Result};

/// Largest number of bytes that always fits in a single BN254 field element.
pub const MAX_FIELD_BYTE_LEN: usize = 31;
pub const DEFAULT_MAX_JWT_LEN: usize = 2048;
/// Keys of the configuration object that do not refer to claims.
pub const RESERVED_CONFIG_KEYS: [&str; 7] = [
    "alg",
    "credtype",
    "reveal_all_claims",
    "defer_sig_ver",
    "max_jwt_len",
    "device_bound",
    "tolerated_claim_checks",
];
/// Claims carrying the two halves of a device-bound token's device key.
pub const DEVICE_KEY_CLAIMS: [&str; 2] = ["device_key_0", "device_key_1"];

/// Signature algorithms the circuits are built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alg {
    Rs256,
    Es256,
    Es256k,
}

impl Alg {
    pub const SUPPORTED: [Alg; 3] = [Alg::Rs256, Alg::Es256, Alg::Es256k];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::SUPPORTED.into_iter().find(|alg| alg.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Alg::Rs256 => "RS256",
            Alg::Es256 => "ES256",
            Alg::Es256k => "ES256K",
        }
    }

    /// Limb width of the big-integer arithmetic in the matching signature circuit.
    pub fn limb_bits(self) -> usize {
        match self {
            Alg::Rs256 => 121,
            Alg::Es256 => 43,
            Alg::Es256k => 64,
        }
    }

    /// Fixed limb count for ECDSA scalars and coordinates, `None` for RSA
    /// whose modulus size is not fixed by the circuit family.
    pub fn ecdsa_limb_count(self) -> Option<usize> {
        match self {
            Alg::Rs256 => None,
            Alg::Es256 => Some(6),
            Alg::Es256k => Some(4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredType {
    Jwt,
    Mdl,
}

impl CredType {
    pub fn name(self) -> &'static str {
        match self {
            CredType::Jwt => "jwt",
            CredType::Mdl => "mdl",
        }
    }
}

/// Time-based token claims whose validation failure can be tolerated when
/// the signature itself verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeClaim {
    Exp,
    Nbf,
    Iat,
}

impl TimeClaim {
    pub const ALL: [TimeClaim; 3] = [TimeClaim::Exp, TimeClaim::Nbf, TimeClaim::Iat];

    pub fn name(self) -> &'static str {
        match self {
            TimeClaim::Exp => "exp",
            TimeClaim::Nbf => "nbf",
            TimeClaim::Iat => "iat",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|claim| claim.name() == name)
    }
}

/// JSON type of a claim value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimType {
    String,
    Number,
    Bool,
    Null,
    Array,
    Object,
}

impl ClaimType {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "string" => Ok(ClaimType::String),
            "number" => Ok(ClaimType::Number),
            "bool" => Ok(ClaimType::Bool),
            "null" => Ok(ClaimType::Null),
            "array" => Ok(ClaimType::Array),
            "object" => Ok(ClaimType::Object),
            other => Err(CompileError::Config(format!("unknown claim type '{other}'"))),
        }
    }

    /// Integer tag used by the circuit's claim matcher.
    pub fn as_int(self) -> u8 {
        match self {
            ClaimType::String => 0,
            ClaimType::Number => 1,
            ClaimType::Bool => 2,
            ClaimType::Null => 3,
            ClaimType::Array => 4,
            ClaimType::Object => 5,
        }
    }
}

/// Maps a type name straight to the circuit's integer tag.
pub fn claim_type_as_int(type_name: &str) -> Result<u8> {
    ClaimType::from_name(type_name).map(ClaimType::as_int)
}

/// Extra input a predicate needs beside the claim itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialInput {
    /// Single value, emitted verbatim.
    Scalar(String),
    /// List of integers.
    List(Vec<i128>),
    /// String expanded to code points and zero-padded to `max_length`.
    Bytes { value: String, max_length: usize },
}

impl SpecialInput {
    fn from_json(claim: &str, key: &str, value: &Value) -> Result<Self> {
        let err = |msg: &str| {
            CompileError::Config(format!(
                "special input '{key}' of claim '{claim}' {msg}"
            ))
        };
        match value {
            Value::Number(n) => Ok(SpecialInput::Scalar(n.to_string())),
            Value::String(s) => Ok(SpecialInput::Scalar(s.clone())),
            Value::Bool(b) => Ok(SpecialInput::Scalar(u8::from(*b).to_string())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_i64()
                        .map(i128::from)
                        .or_else(|| item.as_u64().map(i128::from))
                        .ok_or_else(|| err("must only contain integers"))
                })
                .collect::<Result<Vec<_>>>()
                .map(SpecialInput::List),
            Value::Object(fields) => {
                let value = fields
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| err("is missing a string 'value'"))?;
                let max_length = fields
                    .get("max_length")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| err("is missing an integer 'max_length'"))?;
                Ok(SpecialInput::Bytes {
                    value: value.to_string(),
                    max_length: max_length as usize,
                })
            }
            Value::Null => Err(err("is null")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateSpec {
    /// Name as written in the configuration.
    pub name: String,
    /// `name` in lowercase-underscore form, used to build input names.
    pub var_name: String,
    pub special_inputs: Vec<(String, SpecialInput)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimConfig {
    pub name: String,
    pub claim_type: ClaimType,
    pub reveal: bool,
    pub max_claim_byte_len: Option<usize>,
    pub reveal_domain_only: bool,
    pub predicates: Vec<PredicateSpec>,
}

impl ClaimConfig {
    /// The `"<name>":` token anchoring the claim in minified JSON.
    pub fn key_token(&self) -> String {
        format!("\"{}\":", self.name)
    }

    fn from_json(name: &str, value: &Value) -> Result<Self> {
        let entry = value.as_object().ok_or_else(|| {
            CompileError::Config(format!("entry for claim '{name}' must be an object"))
        })?;

        let type_name = entry.get("type").and_then(Value::as_str).ok_or_else(|| {
            CompileError::Config(format!("missing 'type' field for claim '{name}'"))
        })?;
        let claim_type = ClaimType::from_name(type_name)?;

        let reveal = optional_bool(entry, "reveal", name)?;
        let reveal_domain_only = optional_bool(entry, "reveal_domain_only", name)?;

        let max_claim_byte_len = match entry.get("max_claim_byte_len") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().filter(|len| *len > 0).ok_or_else(|| {
                CompileError::Config(format!(
                    "'max_claim_byte_len' of claim '{name}' must be a positive integer"
                ))
            })? as usize),
        };

        if reveal && max_claim_byte_len.is_none() {
            return Err(CompileError::Config(format!(
                "claim '{name}' has reveal flag set but is missing 'max_claim_byte_len'"
            )));
        }
        if reveal_domain_only && claim_type != ClaimType::String {
            return Err(CompileError::Config(format!(
                "'reveal_domain_only' is only valid for string claims, '{name}' is {type_name}"
            )));
        }
        if reveal && claim_type == ClaimType::String {
            if let Some(len) = max_claim_byte_len.filter(|len| *len > MAX_FIELD_BYTE_LEN) {
                warn!(
                    claim = name,
                    max_claim_byte_len = len,
                    "revealed string exceeds {MAX_FIELD_BYTE_LEN} bytes and will not fit one field element"
                );
            }
        }

        let predicates = match entry.get("predicates") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| parse_predicate(name, item))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(CompileError::Config(format!(
                    "'predicates' of claim '{name}' must be a list"
                )))
            }
        };

        Ok(ClaimConfig {
            name: name.to_string(),
            claim_type,
            reveal,
            max_claim_byte_len,
            reveal_domain_only,
            predicates,
        })
    }
}

fn optional_bool(entry: &Map<String, Value>, field: &str, claim: &str) -> Result<bool> {
    match entry.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(CompileError::Config(format!(
            "field '{field}' of claim '{claim}' must be of type bool"
        ))),
    }
}

fn parse_predicate(claim: &str, value: &Value) -> Result<PredicateSpec> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CompileError::Config(format!("predicate of claim '{claim}' is missing a 'name'"))
        })?;

    let special_inputs = match value.get("special_inputs") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(inputs)) => inputs
            .iter()
            .map(|(key, v)| Ok((key.clone(), SpecialInput::from_json(claim, key, v)?)))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(CompileError::Config(format!(
                "'special_inputs' of predicate '{name}' must be an object"
            )))
        }
    };

    Ok(PredicateSpec {
        name: name.to_string(),
        var_name: camel_to_snake(name),
        special_inputs,
    })
}

/// `validUntil` -> `valid_until`; anything that is not alphanumeric becomes `_`.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    out
}

/// Configuration after validation, with all defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub alg: Alg,
    pub credtype: CredType,
    pub reveal_all_claims: bool,
    pub defer_sig_ver: bool,
    pub max_jwt_len: usize,
    pub device_bound: bool,
    /// Time claims that may fail validation without a loud warning.
    pub tolerated_claim_checks: Vec<TimeClaim>,
    /// Claims in configuration order.
    pub claims: Vec<ClaimConfig>,
}

impl ValidatedConfig {
    pub fn revealed_claims(&self) -> impl Iterator<Item = &ClaimConfig> {
        self.claims.iter().filter(|claim| claim.reveal)
    }
}

/// Validate a configuration object, filling in defaults in place.
pub fn validate(config: &mut Value) -> Result<ValidatedConfig> {
    let map = config
        .as_object_mut()
        .ok_or_else(|| CompileError::Config("configuration must be a JSON object".into()))?;

    let alg_name = map
        .get("alg")
        .ok_or_else(|| CompileError::Config("'alg' field is missing".into()))?
        .as_str()
        .ok_or_else(|| CompileError::Config("'alg' must be a string".into()))?;
    let alg = Alg::from_name(alg_name).ok_or_else(|| {
        CompileError::Config(format!("algorithm {alg_name} is not supported"))
    })?;

    let reveal_all_claims = bool_with_default(map, "reveal_all_claims")?;
    let defer_sig_ver = bool_with_default(map, "defer_sig_ver")?;
    let device_bound = bool_with_default(map, "device_bound")?;
    let tolerated_claim_checks = tolerated_claim_checks(map)?;

    let credtype = match map
        .entry("credtype")
        .or_insert_with(|| Value::from("jwt"))
        .as_str()
    {
        Some("jwt") => CredType::Jwt,
        Some("mdl") => CredType::Mdl,
        _ => {
            return Err(CompileError::Config(
                "'credtype' must be either \"jwt\" or \"mdl\"".into(),
            ))
        }
    };

    let max_jwt_len = map
        .entry("max_jwt_len")
        .or_insert_with(|| Value::from(DEFAULT_MAX_JWT_LEN))
        .as_u64()
        .ok_or_else(|| CompileError::Config("'max_jwt_len' must be an integer".into()))?
        as usize;
    if max_jwt_len % 64 != 0 {
        return Err(CompileError::Config(format!(
            "'max_jwt_len' must be a multiple of 64. Found {}, try {}",
            max_jwt_len,
            max_jwt_len + (64 - max_jwt_len % 64)
        )));
    }

    if defer_sig_ver && alg != Alg::Es256k {
        return Err(CompileError::Config(
            "the 'defer_sig_ver' option is only valid with the ES256K algorithm".into(),
        ));
    }
    if credtype == CredType::Mdl && alg != Alg::Es256 {
        return Err(CompileError::Config(
            "mDL credentials are only supported with the ES256 algorithm".into(),
        ));
    }

    // device-bound tokens reveal both halves of the device key
    if device_bound {
        for name in DEVICE_KEY_CLAIMS {
            map.insert(
                name.to_string(),
                serde_json::json!({
                    "type": "number",
                    "reveal": true,
                    "max_claim_byte_len": 2 * MAX_FIELD_BYTE_LEN
                }),
            );
        }
    }

    let claims = map
        .iter()
        .filter(|(key, _)| !RESERVED_CONFIG_KEYS.contains(&key.as_str()))
        .map(|(key, value)| ClaimConfig::from_json(key, value))
        .collect::<Result<Vec<_>>>()?;

    Ok(ValidatedConfig {
        alg,
        credtype,
        reveal_all_claims,
        defer_sig_ver,
        max_jwt_len,
        device_bound,
        tolerated_claim_checks,
        claims,
    })
}

/// Defaults to every [`TimeClaim`].
fn tolerated_claim_checks(map: &mut Map<String, Value>) -> Result<Vec<TimeClaim>> {
    let default = || Value::from(TimeClaim::ALL.map(TimeClaim::name).to_vec());
    let err = || {
        CompileError::Config(format!(
            "'tolerated_claim_checks' must be a list of {:?}",
            TimeClaim::ALL.map(TimeClaim::name)
        ))
    };
    let mut checks = map
        .entry("tolerated_claim_checks")
        .or_insert_with(default)
        .as_array()
        .ok_or_else(err)?
        .iter()
        .map(|item| item.as_str().and_then(TimeClaim::from_name).ok_or_else(err))
        .collect::<Result<Vec<_>>>()?;
    checks.sort();
    checks.dedup();
    Ok(checks)
}

fn bool_with_default(map: &mut Map<String, Value>, field: &str) -> Result<bool> {
    map.entry(field)
        .or_insert(Value::Bool(false))
        .as_bool()
        .ok_or_else(|| CompileError::Config(format!("field '{field}' must be of type bool")))
}
