//! Witness assembly for JWT credentials.
//!
//! One run turns (configuration, issuer key, token) into three input sets:
//! the prover's witness, the verifier's public inputs and the auxiliary data
//! used when the signature is verified outside the circuit.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::{
    codec::{bytes_to_limbs, bytes_to_limbs_fixed, pack_bytes_fixed, pack_string},
    config::{ClaimConfig, ClaimType, CredType, SpecialInput, ValidatedConfig},
    digest::{digest, sha256_pad, zero_extend, MessageDigest},
    error::{CompileError, Result},
    inputs::{decimal_array, CircuitInputs},
    key::IssuerKey,
    locator::{ensure_minified, find_value_interval, get_domain},
    token::{check_signature, SignedToken},
    utils::hex_upper,
};

/// Stages of a compilation run, entered strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Configured,
    KeyLoaded,
    TokenParsed,
    DigestComputed,
    ClaimsResolved,
    Emitted,
}

/// Logs stage transitions and rejects out-of-order ones.
#[derive(Debug)]
pub(crate) struct Progress {
    stage: Stage,
    started: Instant,
}

impl Progress {
    pub(crate) fn start() -> Self {
        debug!(stage = ?Stage::Configured, "compilation stage");
        Progress {
            stage: Stage::Configured,
            started: Instant::now(),
        }
    }

    pub(crate) fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage {next:?} entered after {:?}", self.stage);
        self.stage = next;
        debug!(
            stage = ?next,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "compilation stage"
        );
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

/// Everything a run produces, not yet written anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledInputs {
    /// Full input for the prover (`prover_inputs.json`).
    pub witness: CircuitInputs,
    /// Inputs the verifier supplies (`public_io.json`).
    pub public_inputs: CircuitInputs,
    /// Raw values for out-of-circuit signature verification (`prover_aux.json`).
    pub prover_aux: CircuitInputs,
}

/// Compile a JWT into circuit inputs.
pub fn compile_jwt(
    config: &ValidatedConfig,
    key: &IssuerKey,
    token: &SignedToken,
) -> Result<CompiledInputs> {
    let mut progress = Progress::start();
    if config.credtype != CredType::Jwt {
        return Err(CompileError::Config(format!(
            "credential type is '{}', expected 'jwt'",
            config.credtype.name()
        )));
    }

    key.ensure_alg(config.alg)?;
    progress.advance(Stage::KeyLoaded);

    if let Some(header_alg) = token.header_alg().filter(|alg| *alg != config.alg.name()) {
        warn!(
            header_alg,
            configured = config.alg.name(),
            "token header names a different algorithm than the configuration"
        );
    }
    check_signature(token, key, &config.tolerated_claim_checks);
    progress.advance(Stage::TokenParsed);

    let prepad_m = token.signing_input();
    let padded = sha256_pad(&prepad_m)?;
    let padded_len = padded.len();
    let message = zero_extend(padded, config.max_jwt_len)?;
    let digest = digest(&prepad_m);
    info!(
        prepad_len = prepad_m.len(),
        padded_len,
        sha_blocks = padded_len / 64,
        "message padded"
    );
    progress.advance(Stage::DigestComputed);

    let mut compiled = CompiledInputs::default();
    compiled.witness = compiled.witness.bytes_input("message", &message);
    add_signature_inputs(&mut compiled, config, key, token, &digest)?;
    compiled.witness = compiled
        .witness
        .usize_input("message_padded_bytes", padded_len)
        .usize_input("period_idx", token.period_idx());

    add_claim_inputs(&mut compiled, config, token)?;
    progress.advance(Stage::ClaimsResolved);

    if config.reveal_all_claims {
        compiled.public_inputs = compiled
            .public_inputs
            .bytes_input("prepad_m", &prepad_m)
            .bytes_input("digest", &digest.bits());
    }

    progress.advance(Stage::Emitted);
    info!(
        witness_inputs = compiled.witness.len(),
        public_inputs = compiled.public_inputs.len(),
        aux_entries = compiled.prover_aux.len(),
        "circuit inputs compiled"
    );
    Ok(compiled)
}

fn add_signature_inputs(
    compiled: &mut CompiledInputs,
    config: &ValidatedConfig,
    key: &IssuerKey,
    token: &SignedToken,
    digest: &MessageDigest,
) -> Result<()> {
    let limb_bits = config.alg.limb_bits();

    let (n_limbs, x, y) = match (config.alg.ecdsa_limb_count(), key) {
        (None, IssuerKey::Rsa { n, .. }) => {
            let modulus = bytes_to_limbs(n, limb_bits);
            compiled.witness = std::mem::take(&mut compiled.witness)
                .limbs_input("signature", &bytes_to_limbs(&token.signature, limb_bits))
                .limbs_input("modulus", &modulus);
            compiled.public_inputs =
                std::mem::take(&mut compiled.public_inputs).limbs_input("modulus", &modulus);
            return Ok(());
        }
        (Some(n_limbs), IssuerKey::Ec { x, y, .. }) => (n_limbs, x, y),
        _ => {
            return Err(CompileError::KeyFormat(format!(
                "issuer key does not match algorithm {}",
                config.alg.name()
            )))
        }
    };

    let (sig_r, sig_s) = split_signature(&token.signature)?;
    let pubkey_x = bytes_to_limbs_fixed(x, limb_bits, n_limbs)?;
    let pubkey_y = bytes_to_limbs_fixed(y, limb_bits, n_limbs)?;
    compiled.public_inputs = std::mem::take(&mut compiled.public_inputs)
        .limbs_input("pubkey_x", &pubkey_x)
        .limbs_input("pubkey_y", &pubkey_y);

    if config.defer_sig_ver {
        let (digest_248, digest_byte) = digest.limbs();
        debug!(digest_byte, "signature verification deferred");
        compiled.prover_aux = std::mem::take(&mut compiled.prover_aux)
            .str_input("digest", &digest.hex().to_uppercase())
            .str_input("signature_r", &hex_upper(sig_r))
            .str_input("signature_s", &hex_upper(sig_s))
            .str_input("pk_x", &hex_upper(x))
            .str_input("pk_y", &hex_upper(y));
        compiled.witness =
            std::mem::take(&mut compiled.witness).biguint_input("digest_248", &digest_248);
        compiled.public_inputs =
            std::mem::take(&mut compiled.public_inputs).biguint_input("digest_248", &digest_248);
    } else {
        compiled.witness = std::mem::take(&mut compiled.witness)
            .limbs_input(
                "signature_r",
                &bytes_to_limbs_fixed(sig_r, limb_bits, n_limbs)?,
            )
            .limbs_input(
                "signature_s",
                &bytes_to_limbs_fixed(sig_s, limb_bits, n_limbs)?,
            )
            .limbs_input("pubkey_x", &pubkey_x)
            .limbs_input("pubkey_y", &pubkey_y);
    }
    Ok(())
}

/// ECDSA signatures in JWS and COSE are `R || S` with equal-length halves.
pub(crate) fn split_signature(signature: &[u8]) -> Result<(&[u8], &[u8])> {
    if signature.is_empty() || signature.len() % 2 != 0 {
        return Err(CompileError::MalformedToken(format!(
            "ECDSA signature of {} bytes cannot be split into R and S",
            signature.len()
        )));
    }
    Ok(signature.split_at(signature.len() / 2))
}

fn add_claim_inputs(
    compiled: &mut CompiledInputs,
    config: &ValidatedConfig,
    token: &SignedToken,
) -> Result<()> {
    let view = token.decoded_view()?;
    ensure_minified(&view)?;

    for claim in &config.claims {
        if !token.payload.contains_key(&claim.name) {
            return Err(CompileError::ClaimNotFound(claim.name.clone()));
        }

        let interval = find_value_interval(&view, &claim.key_token(), claim.claim_type)?;
        debug!(
            claim = %claim.name,
            value = %String::from_utf8_lossy(interval.value(&view)),
            "claim interval"
        );
        compiled.witness = std::mem::take(&mut compiled.witness)
            .usize_input(&format!("{}_l", claim.name), interval.left)
            .usize_input(&format!("{}_r", claim.name), interval.right);

        if claim.reveal {
            let value_name = format!("{}_value", claim.name);
            let value = revealed_value(claim, token, interval.value(&view))?;
            compiled.witness =
                std::mem::take(&mut compiled.witness).value_input(&value_name, value.clone());
            compiled.public_inputs =
                std::mem::take(&mut compiled.public_inputs).value_input(&value_name, value);
        }

        for predicate in &claim.predicates {
            for (suffix, special) in &predicate.special_inputs {
                let name = format!("{}_{}_{}", claim.name, predicate.var_name, suffix);
                let value = special_input_value(special)?;
                compiled.witness =
                    std::mem::take(&mut compiled.witness).value_input(&name, value.clone());
                compiled.public_inputs =
                    std::mem::take(&mut compiled.public_inputs).value_input(&name, value);
            }
        }
    }
    info!(claims = config.claims.len(), "claims resolved");
    Ok(())
}

/// Field-element encoding of a revealed claim, as a decimal JSON string.
fn revealed_value(
    claim: &ClaimConfig,
    token: &SignedToken,
    literal: &[u8],
) -> Result<serde_json::Value> {
    let max_len = claim.max_claim_byte_len.unwrap_or_default();
    match claim.claim_type {
        ClaimType::Number => {
            if literal.len() > max_len {
                return Err(CompileError::Oversize {
                    what: format!("number claim '{}'", claim.name),
                    len: literal.len(),
                    max: max_len,
                });
            }
            let digits = std::str::from_utf8(literal).map_err(|_| {
                CompileError::MalformedToken(format!("claim '{}' is not a number", claim.name))
            })?;
            Ok(digits.into())
        }
        ClaimType::String => {
            let value = token
                .payload
                .get(&claim.name)
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    CompileError::MalformedToken(format!(
                        "claim '{}' is not a string",
                        claim.name
                    ))
                })?;
            let packed = if claim.reveal_domain_only {
                let domain = get_domain(value)?;
                debug!(claim = %claim.name, domain, "revealing domain only");
                pack_string(domain, max_len, false)?
            } else {
                pack_string(value, max_len, true)?
            };
            Ok(packed.to_string().into())
        }
        other => Err(CompileError::Config(format!(
            "claim '{}' of type {other:?} cannot be revealed as a single field element",
            claim.name
        ))),
    }
}

fn special_input_value(special: &SpecialInput) -> Result<serde_json::Value> {
    Ok(match special {
        SpecialInput::Scalar(value) => value.as_str().into(),
        SpecialInput::List(values) => decimal_array(values),
        SpecialInput::Bytes { value, max_length } => {
            decimal_array(&pack_bytes_fixed(value, *max_length)?)
        }
    })
}
