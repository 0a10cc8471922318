//! Witness assembly for mobile driving licenses (ISO 18013-5).
//!
//! The mDL's COSE_Sign1 is parsed elsewhere; what arrives here is the CBOR
//! `Sig_structure` that was signed (the "to-be-signed" data), the raw
//! `r || s` signature, both hex encoded, and the disclosed `birth_date`
//! item of the issuer-signed namespace.
//!
//! The signed data only commits to each item through a value digest,
//! `SHA-256(tag24(bstr(item)))`. The circuit rehashes the item preimage and
//! finds `<digestID> 58 20 <digest>` in the signed data.

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use ciborium::value::Value as Cbor;
use p256::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    codec::bytes_to_limbs_fixed,
    config::{Alg, CredType, ValidatedConfig},
    digest::{digest, sha256_pad, zero_extend},
    error::{CompileError, Result},
    key::IssuerKey,
    utils::find_bytes,
    witness::{split_signature, CompiledInputs, Progress, Stage},
};

/// CBOR for `text(10) "validUntil"`, `tag(0)`, `text(20)`.
pub const VALID_UNTIL_PREFIX: &[u8] = &[
    0x6a, 0x76, 0x61, 0x6c, 0x69, 0x64, 0x55, 0x6e, 0x74, 0x69, 0x6c, 0xc0, 0x74,
];
/// `YYYY-MM-DDTHH:MM:SSZ`
const VALID_UNTIL_VALUE_LEN: usize = 20;
const ISSUER_UTC_OFFSET_HOURS: i32 = -8;

pub const DOB_IDENTIFIER: &str = "birth_date";
/// Padded length of the birth-date preimage the circuit hashes.
pub const DOB_PREIMAGE_LEN: usize = 128;
/// CBOR tag for an RFC 8943 full-date string.
const FULL_DATE_TAG: u64 = 1004;
/// CBOR tag for embedded CBOR data.
const ENCODED_CBOR_TAG: u64 = 24;
/// CBOR head of a 32-byte byte string.
const DIGEST_HEAD: [u8; 2] = [0x58, 0x20];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdlRecord {
    /// Hex of the signed CBOR `Sig_structure`.
    pub tbs_data: String,
    /// Hex of the raw `r || s` signature.
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<IssuerSignedItem>,
}

/// An `IssuerSignedItem` of the `org.iso.18013.5.1` namespace, without its
/// element identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerSignedItem {
    #[serde(rename = "digestID")]
    pub digest_id: u64,
    /// Hex of the item's salt.
    pub random: String,
    /// Full date, `YYYY-MM-DD`.
    #[serde(rename = "elementValue")]
    pub element_value: String,
}

impl IssuerSignedItem {
    /// `tag24(bstr(item))`, the bytes the value digest is computed over.
    pub fn tagged_preimage(&self, identifier: &str) -> Result<Vec<u8>> {
        let item = Cbor::Map(vec![
            (Cbor::Text("digestID".into()), Cbor::Integer(self.digest_id.into())),
            (
                Cbor::Text("random".into()),
                Cbor::Bytes(decode_hex(&self.random, "random")?),
            ),
            (
                Cbor::Text("elementIdentifier".into()),
                Cbor::Text(identifier.into()),
            ),
            (
                Cbor::Text("elementValue".into()),
                Cbor::Tag(FULL_DATE_TAG, Box::new(Cbor::Text(self.element_value.clone()))),
            ),
        ]);
        let embedded = Cbor::Tag(ENCODED_CBOR_TAG, Box::new(Cbor::Bytes(cbor_bytes(&item)?)));
        cbor_bytes(&embedded)
    }

    /// `<digestID> 58 20 <digest>` as it appears in the signed `valueDigests` map.
    pub fn encoded_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>> {
        let mut encoded = cbor_bytes(&Cbor::Integer(self.digest_id.into()))?;
        encoded.extend_from_slice(&DIGEST_HEAD);
        encoded.extend_from_slice(digest);
        Ok(encoded)
    }
}

fn cbor_bytes(value: &Cbor) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| CompileError::MalformedToken(format!("cannot encode CBOR: {e}")))?;
    Ok(out)
}

/// Circuit inputs describing the disclosed birth date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirthDateInputs {
    /// Days since 0001-01-01, which is day 1.
    pub value: i32,
    pub id: u64,
    /// SHA-256 padded preimage, exactly [`DOB_PREIMAGE_LEN`] bytes.
    pub preimage: Vec<u8>,
    pub encoded_l: usize,
    pub encoded_r: usize,
}

pub fn resolve_birth_date(item: &IssuerSignedItem, tbs: &[u8]) -> Result<BirthDateInputs> {
    let preimage = item.tagged_preimage(DOB_IDENTIFIER)?;
    let padded = sha256_pad(&preimage)?;
    if padded.len() != DOB_PREIMAGE_LEN {
        return Err(CompileError::MalformedToken(format!(
            "{DOB_IDENTIFIER} preimage is {} bytes after SHA-256 padding, the circuit expects {DOB_PREIMAGE_LEN}",
            padded.len()
        )));
    }

    let value_digest = digest(&preimage);
    let encoded = item.encoded_digest(&value_digest.bytes)?;
    let encoded_l = find_bytes(tbs, &encoded, 0).ok_or_else(|| {
        CompileError::MalformedToken(format!(
            "value digest {} of {DOB_IDENTIFIER} is not in the signed data",
            value_digest.hex()
        ))
    })?;

    let date = NaiveDate::parse_from_str(&item.element_value, "%Y-%m-%d").map_err(|e| {
        CompileError::MalformedToken(format!(
            "{DOB_IDENTIFIER} '{}' is not a full date: {e}",
            item.element_value
        ))
    })?;

    Ok(BirthDateInputs {
        value: date.num_days_from_ce(),
        id: item.digest_id,
        preimage: padded,
        encoded_l,
        encoded_r: encoded_l + encoded.len(),
    })
}

impl MdlRecord {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CompileError::MalformedToken(format!("not an mDL record: {e}")))
    }

    pub fn tbs_bytes(&self) -> Result<Vec<u8>> {
        decode_hex(&self.tbs_data, "tbs_data")
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        decode_hex(&self.signature, "signature")
    }
}

fn decode_hex(value: &str, field: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim())
        .map_err(|e| CompileError::MalformedToken(format!("mDL field '{field}' is not hex: {e}")))
}

pub fn compile_mdl(
    config: &ValidatedConfig,
    key: &IssuerKey,
    record: &MdlRecord,
) -> Result<CompiledInputs> {
    let mut progress = Progress::start();
    if config.credtype != CredType::Mdl || config.alg != Alg::Es256 {
        return Err(CompileError::Config(
            "mDL credentials need \"credtype\":\"mdl\" and \"alg\":\"ES256\"".into(),
        ));
    }
    if !config.claims.is_empty() {
        warn!(
            claims = config.claims.len(),
            "claim entries are not used for mDL credentials"
        );
    }

    key.ensure_alg(Alg::Es256)?;
    let IssuerKey::Ec { x, y, .. } = key else {
        return Err(CompileError::KeyFormat("mDL issuer key must be an EC key".into()));
    };
    progress.advance(Stage::KeyLoaded);

    let tbs = record.tbs_bytes()?;
    let signature = record.signature_bytes()?;
    check_tbs_signature(key, &tbs, &signature);
    progress.advance(Stage::TokenParsed);

    let padded = sha256_pad(&tbs)?;
    let padded_len = padded.len();
    let message = zero_extend(padded, config.max_jwt_len)?;
    info!(
        tbs_len = tbs.len(),
        padded_len,
        digest = %digest(&tbs).hex(),
        "mDL message padded"
    );
    progress.advance(Stage::DigestComputed);

    let prefix_l = find_bytes(&tbs, VALID_UNTIL_PREFIX, 0)
        .ok_or_else(|| CompileError::ClaimNotFound("validUntil".into()))?;
    let prefix_r = prefix_l + VALID_UNTIL_PREFIX.len();
    let valid_until = tbs
        .get(prefix_r..prefix_r + VALID_UNTIL_VALUE_LEN)
        .ok_or_else(|| CompileError::MalformedToken("truncated validUntil value".into()))?;
    let valid_until = std::str::from_utf8(valid_until)
        .map_err(|_| CompileError::MalformedToken("validUntil is not text".into()))?;
    let valid_until_value = issuer_midnight_timestamp(valid_until)?;
    info!(valid_until, valid_until_value, "validUntil resolved");

    let dob = record
        .birth_date
        .as_ref()
        .ok_or_else(|| CompileError::ClaimNotFound(DOB_IDENTIFIER.into()))
        .and_then(|item| resolve_birth_date(item, &tbs))?;
    info!(
        dob_value = dob.value,
        dob_id = dob.id,
        encoded_l = dob.encoded_l,
        "birth_date resolved"
    );
    progress.advance(Stage::ClaimsResolved);

    let limb_bits = Alg::Es256.limb_bits();
    let n_limbs = Alg::Es256.ecdsa_limb_count().unwrap_or(6);
    let (sig_r, sig_s) = split_signature(&signature)?;
    let pubkey_x = bytes_to_limbs_fixed(x, limb_bits, n_limbs)?;
    let pubkey_y = bytes_to_limbs_fixed(y, limb_bits, n_limbs)?;

    let mut compiled = CompiledInputs::default();
    compiled.witness = compiled
        .witness
        .bytes_input("message", &message)
        .str_input("valid_until_value", &valid_until_value.to_string())
        .usize_input("valid_until_prefix_l", prefix_l)
        .usize_input("valid_until_prefix_r", prefix_r)
        .str_input("dob_value", &dob.value.to_string())
        .str_input("dob_id", &dob.id.to_string())
        .bytes_input("dob_preimage", &dob.preimage)
        .usize_input("dob_encoded_l", dob.encoded_l)
        .usize_input("dob_encoded_r", dob.encoded_r)
        .limbs_input(
            "signature_r",
            &bytes_to_limbs_fixed(sig_r, limb_bits, n_limbs)?,
        )
        .limbs_input(
            "signature_s",
            &bytes_to_limbs_fixed(sig_s, limb_bits, n_limbs)?,
        )
        .limbs_input("pubkey_x", &pubkey_x)
        .limbs_input("pubkey_y", &pubkey_y)
        .usize_input("message_padded_bytes", padded_len);
    compiled.public_inputs = compiled
        .public_inputs
        .limbs_input("pubkey_x", &pubkey_x)
        .limbs_input("pubkey_y", &pubkey_y);

    progress.advance(Stage::Emitted);
    Ok(compiled)
}

/// ECDSA-P256/SHA-256 check of the signed data. Failures are only logged.
pub fn check_tbs_signature(key: &IssuerKey, tbs: &[u8], signature: &[u8]) -> bool {
    let verified = key
        .sec1_uncompressed()
        .ok_or_else(|| "not an EC key".to_string())
        .and_then(|point| VerifyingKey::from_sec1_bytes(&point).map_err(|e| e.to_string()))
        .and_then(|vk| {
            let sig = Signature::from_slice(signature).map_err(|e| e.to_string())?;
            vk.verify(tbs, &sig).map_err(|e| e.to_string())
        });

    match verified {
        Ok(()) => {
            info!("mDL signature verifies");
            true
        }
        Err(reason) => {
            warn!(%reason, "mDL SIGNATURE DOES NOT VERIFY under the issuer key");
            false
        }
    }
}

/// Unix time of midnight, issuer local time, on the date of `value`
/// (`YYYY-MM-DDTHH:MM:SSZ`). The circuit compares dates only.
pub fn issuer_midnight_timestamp(value: &str) -> Result<i64> {
    let parsed = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ").map_err(|e| {
        CompileError::MalformedToken(format!("validUntil '{value}' is not a date-time: {e}"))
    })?;
    let midnight = parsed.date().and_hms_opt(0, 0, 0).unwrap_or(parsed);
    FixedOffset::east_opt(ISSUER_UTC_OFFSET_HOURS * 3600)
        .and_then(|offset| offset.from_local_datetime(&midnight).single())
        .map(|local| local.timestamp())
        .ok_or_else(|| CompileError::MalformedToken(format!("validUntil '{value}' is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::validate, key::Curve};
    use p256::ecdsa::{signature::Signer, SigningKey};
    use serde_json::json;

    fn issuer() -> (SigningKey, IssuerKey) {
        let signing = SigningKey::from_slice(&[7u8; 32]).unwrap();
        let point = signing.verifying_key().to_encoded_point(false);
        let key = IssuerKey::Ec {
            curve: Curve::P256,
            x: point.x().unwrap().to_vec(),
            y: point.y().unwrap().to_vec(),
        };
        (signing, key)
    }

    fn birth_date() -> IssuerSignedItem {
        IssuerSignedItem {
            digest_id: 3,
            random: hex::encode([0xaa; 16]),
            element_value: "1990-01-15".into(),
        }
    }

    fn tbs() -> Vec<u8> {
        let item = birth_date();
        let value_digest = digest(&item.tagged_preimage(DOB_IDENTIFIER).unwrap());

        let mut tbs = b"\x84\x6aSignature1".to_vec();
        tbs.extend_from_slice(&[0xa1, 0x01, 0x26]);
        tbs.extend_from_slice(VALID_UNTIL_PREFIX);
        tbs.extend_from_slice(b"2030-01-02T12:00:00Z");
        tbs.extend_from_slice(&item.encoded_digest(&value_digest.bytes).unwrap());
        tbs.extend_from_slice(&[0x40, 0xf6]);
        tbs
    }

    fn record(tbs: &[u8], signature: &[u8]) -> MdlRecord {
        MdlRecord {
            tbs_data: hex::encode(tbs),
            signature: hex::encode(signature),
            birth_date: Some(birth_date()),
        }
    }

    fn mdl_config() -> ValidatedConfig {
        validate(&mut json!({ "alg": "ES256", "credtype": "mdl" })).unwrap()
    }

    #[test]
    fn midnight_in_issuer_time_zone() {
        // 2030-01-02T00:00:00-08:00
        assert_eq!(
            issuer_midnight_timestamp("2030-01-02T12:00:00Z").unwrap(),
            1_893_571_200
        );
        assert!(issuer_midnight_timestamp("2030-13-02T12:00:00Z").is_err());
    }

    #[test]
    fn birth_date_preimage_encoding() {
        let mut inner = vec![0xa4, 0x68];
        inner.extend_from_slice(b"digestID");
        inner.extend_from_slice(&[0x03, 0x66]);
        inner.extend_from_slice(b"random");
        inner.push(0x50);
        inner.extend_from_slice(&[0xaa; 16]);
        inner.push(0x71);
        inner.extend_from_slice(b"elementIdentifier");
        inner.push(0x6a);
        inner.extend_from_slice(b"birth_date");
        inner.push(0x6c);
        inner.extend_from_slice(b"elementValue");
        inner.extend_from_slice(&[0xd9, 0x03, 0xec, 0x6a]);
        inner.extend_from_slice(b"1990-01-15");
        let mut expected = vec![0xd8, 0x18, 0x58, inner.len() as u8];
        expected.extend_from_slice(&inner);

        let preimage = birth_date().tagged_preimage(DOB_IDENTIFIER).unwrap();
        assert_eq!(preimage, expected);
        assert_eq!(preimage.len(), 95);
        assert_eq!(
            digest(&preimage).hex(),
            "092e4854ba35f5b2311373847d470e81179b26920cfa6be4602a0e27f1680a4d"
        );

        let encoded = birth_date().encoded_digest(&digest(&preimage).bytes).unwrap();
        assert_eq!(&encoded[..3], &[0x03, 0x58, 0x20]);
        assert_eq!(encoded.len(), 35);
    }

    #[test]
    fn resolves_birth_date() {
        let dob = resolve_birth_date(&birth_date(), &tbs()).unwrap();
        // date(1990, 1, 15).toordinal()
        assert_eq!(dob.value, 726_482);
        assert_eq!(dob.id, 3);
        assert_eq!(dob.preimage.len(), DOB_PREIMAGE_LEN);
        assert_eq!(dob.preimage[95], 0x80);
        assert_eq!(dob.encoded_l, 48);
        assert_eq!(dob.encoded_r, 83);
    }

    #[test]
    fn birth_date_must_be_signed() {
        let mut other = birth_date();
        other.element_value = "1980-01-15".into();
        let err = resolve_birth_date(&other, &tbs()).unwrap_err();
        assert!(matches!(err, CompileError::MalformedToken(msg) if msg.contains("not in the signed data")));
    }

    #[test]
    fn birth_date_preimage_must_fill_two_blocks() {
        // a 48-byte salt makes the preimage 128 bytes, three blocks once padded
        let mut long = birth_date();
        long.random = hex::encode([0xaa; 48]);
        let err = resolve_birth_date(&long, &tbs()).unwrap_err();
        assert!(err.to_string().contains("expects 128"), "{err}");
    }

    #[test]
    fn birth_date_needs_full_date() {
        let mut item = birth_date();
        item.element_value = "15.01.1990".into();
        let value_digest = digest(&item.tagged_preimage(DOB_IDENTIFIER).unwrap());
        let tbs = item.encoded_digest(&value_digest.bytes).unwrap();
        assert!(matches!(
            resolve_birth_date(&item, &tbs),
            Err(CompileError::MalformedToken(msg)) if msg.contains("full date")
        ));
    }

    #[test]
    fn compiles_signed_record() {
        let (signing, key) = issuer();
        let tbs = tbs();
        let signature: Signature = signing.sign(&tbs);
        let record = record(&tbs, &signature.to_bytes());
        assert!(check_tbs_signature(&key, &tbs, &signature.to_bytes()));

        let compiled = compile_mdl(&mdl_config(), &key, &record).unwrap();
        let witness = &compiled.witness;
        assert_eq!(witness.get("valid_until_prefix_l"), Some(&json!("15")));
        assert_eq!(witness.get("valid_until_prefix_r"), Some(&json!("28")));
        assert_eq!(witness.get("valid_until_value"), Some(&json!("1893571200")));
        assert_eq!(witness.get("dob_value"), Some(&json!("726482")));
        assert_eq!(witness.get("dob_id"), Some(&json!("3")));
        assert_eq!(witness.get("dob_encoded_l"), Some(&json!("48")));
        assert_eq!(witness.get("dob_encoded_r"), Some(&json!("83")));
        assert_eq!(
            witness.get("dob_preimage").unwrap().as_array().unwrap().len(),
            128
        );
        assert_eq!(witness.get("message_padded_bytes"), Some(&json!("128")));
        assert_eq!(
            witness.get("signature_r").unwrap().as_array().unwrap().len(),
            6
        );
        assert_eq!(
            witness.get("message").unwrap().as_array().unwrap().len(),
            2048
        );
        assert_eq!(compiled.public_inputs.get("pubkey_x"), witness.get("pubkey_x"));
        assert!(compiled.prover_aux.is_empty());

        let names: Vec<&str> = witness.names().collect();
        assert_eq!(
            names,
            [
                "message",
                "valid_until_value",
                "valid_until_prefix_l",
                "valid_until_prefix_r",
                "dob_value",
                "dob_id",
                "dob_preimage",
                "dob_encoded_l",
                "dob_encoded_r",
                "signature_r",
                "signature_s",
                "pubkey_x",
                "pubkey_y",
                "message_padded_bytes"
            ]
        );
    }

    #[test]
    fn bad_signature_still_compiles() {
        let (_, key) = issuer();
        let record = record(&tbs(), &[1u8; 64]);
        assert!(compile_mdl(&mdl_config(), &key, &record).is_ok());
    }

    #[test]
    fn missing_valid_until() {
        let (_, key) = issuer();
        let record = record(b"no expiry here", &[1u8; 64]);
        assert!(matches!(
            compile_mdl(&mdl_config(), &key, &record),
            Err(CompileError::ClaimNotFound(name)) if name == "validUntil"
        ));
    }

    #[test]
    fn missing_birth_date() {
        let (_, key) = issuer();
        let mut record = record(&tbs(), &[1u8; 64]);
        record.birth_date = None;
        assert!(matches!(
            compile_mdl(&mdl_config(), &key, &record),
            Err(CompileError::ClaimNotFound(name)) if name == DOB_IDENTIFIER
        ));
    }

    #[test]
    fn parses_record_json() {
        let record = MdlRecord::from_json(
            r#"{"tbs_data":"00","signature":"00","birth_date":{"digestID":7,"random":"ab","elementValue":"2000-02-29"}}"#,
        )
        .unwrap();
        assert_eq!(record.birth_date.unwrap().digest_id, 7);
        assert!(MdlRecord::from_json(r#"{"tbs_data":"00","signature":"00"}"#)
            .unwrap()
            .birth_date
            .is_none());
    }

    #[test]
    fn requires_mdl_config() {
        let (_, key) = issuer();
        let record = MdlRecord::from_json(r#"{"tbs_data":"00","signature":"00"}"#).unwrap();
        let jwt_config = validate(&mut json!({ "alg": "ES256" })).unwrap();
        assert!(matches!(
            compile_mdl(&jwt_config, &key, &record),
            Err(CompileError::Config(_))
        ));
    }
}
