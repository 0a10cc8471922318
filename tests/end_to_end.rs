use std::fs;

use cred_witness::{
    check_signature,
    codec::{bytes_to_limbs, bytes_to_limbs_fixed},
    compile_jwt,
    inputs::decimal_array,
    load_config, load_issuer_key, load_token,
    utils::encode_base64url,
    validate, write_artifacts, CircuitInputs, CompileError, IssuerKey, SignatureStatus,
    SignedToken, TimeClaim, ValidatedConfig,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

struct P256Issuer {
    signing: p256::ecdsa::SigningKey,
    x: Vec<u8>,
    y: Vec<u8>,
}

impl P256Issuer {
    fn new() -> Self {
        let signing = p256::ecdsa::SigningKey::from_slice(&[0x42; 32]).unwrap();
        let point = signing.verifying_key().to_encoded_point(false);
        P256Issuer {
            x: point.x().unwrap().to_vec(),
            y: point.y().unwrap().to_vec(),
            signing,
        }
    }

    fn jwk(&self) -> Value {
        json!({
            "kty": "EC",
            "crv": "P-256",
            "x": encode_base64url(&self.x),
            "y": encode_base64url(&self.y),
        })
    }

    fn key(&self) -> IssuerKey {
        IssuerKey::from_json(&self.jwk().to_string()).unwrap()
    }

    fn sign(&self, payload: &str) -> String {
        use p256::ecdsa::{signature::Signer, Signature};
        let signing_input = signing_input(r#"{"alg":"ES256","typ":"JWT"}"#, payload);
        let signature: Signature = self.signing.sign(signing_input.as_bytes());
        format!("{signing_input}.{}", encode_base64url(&signature.to_bytes()))
    }
}

fn signing_input(header: &str, payload: &str) -> String {
    format!(
        "{}.{}",
        encode_base64url(header.as_bytes()),
        encode_base64url(payload.as_bytes())
    )
}

fn config(mut value: Value) -> ValidatedConfig {
    validate(&mut value).unwrap()
}

fn index(inputs: &CircuitInputs, name: &str) -> usize {
    inputs
        .get(name)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap()
}

#[test]
fn p256_token_reveals_age() {
    let issuer = P256Issuer::new();
    let token = SignedToken::parse(&issuer.sign(r#"{"age":30}"#)).unwrap();
    let config = config(json!({
        "alg": "ES256",
        "age": { "type": "number", "reveal": true, "max_claim_byte_len": 31 }
    }));

    let compiled = compile_jwt(&config, &issuer.key(), &token).unwrap();
    let witness = &compiled.witness;

    assert_eq!(witness.get("age_value"), Some(&json!("30")));
    let view = token.decoded_view().unwrap();
    let (left, right) = (index(witness, "age_l"), index(witness, "age_r"));
    assert_eq!(&view[left..right], br#""age":30"#);
    assert_eq!(&view[right - 2..right], b"30");

    let expected_x = decimal_array(&bytes_to_limbs_fixed(&issuer.x, 43, 6).unwrap());
    let expected_y = decimal_array(&bytes_to_limbs_fixed(&issuer.y, 43, 6).unwrap());
    assert_eq!(compiled.public_inputs.get("pubkey_x"), Some(&expected_x));
    assert_eq!(compiled.public_inputs.get("pubkey_y"), Some(&expected_y));
    assert_eq!(witness.get("pubkey_x"), Some(&expected_x));
    assert_eq!(
        witness.get("signature_r").and_then(Value::as_array).map(Vec::len),
        Some(6)
    );
    assert_eq!(compiled.public_inputs.get("age_value"), Some(&json!("30")));
    assert!(compiled.prover_aux.is_empty());
}

#[test]
fn message_is_padded_to_max_len() {
    let issuer = P256Issuer::new();
    let raw = issuer.sign(r#"{"age":30}"#);
    let token = SignedToken::parse(&raw).unwrap();
    let config = config(json!({ "alg": "ES256", "max_jwt_len": 192 }));

    let compiled = compile_jwt(&config, &issuer.key(), &token).unwrap();
    let message = compiled.witness.get("message").and_then(Value::as_array).unwrap();
    assert_eq!(message.len(), 192);

    let signing_input = token.signing_input();
    for (i, byte) in signing_input.iter().enumerate() {
        assert_eq!(message[i], json!(byte.to_string()));
    }
    assert_eq!(message[signing_input.len()], json!("128"));

    let padded_len = index(&compiled.witness, "message_padded_bytes");
    assert_eq!(padded_len % 64, 0);
    assert!(message[padded_len..].iter().all(|b| b == "0"));

    let period_idx = index(&compiled.witness, "period_idx");
    assert_eq!(signing_input[period_idx], b'.');
}

#[test]
fn es256k_deferred_verification_writes_aux_data() {
    use k256::ecdsa::{signature::Signer, Signature, SigningKey};

    let signing = SigningKey::from_slice(&[0x17; 32]).unwrap();
    let point = signing.verifying_key().to_encoded_point(false);
    let (x, y) = (point.x().unwrap().to_vec(), point.y().unwrap().to_vec());
    let key = IssuerKey::from_json(
        &json!({
            "kty": "EC",
            "crv": "secp256k1",
            "x": encode_base64url(&x),
            "y": encode_base64url(&y),
        })
        .to_string(),
    )
    .unwrap();

    let input = signing_input(r#"{"alg":"ES256K","typ":"JWT"}"#, r#"{"sub":"alice"}"#);
    let signature: Signature = signing.sign(input.as_bytes());
    let sig_bytes = signature.to_bytes();
    let token =
        SignedToken::parse(&format!("{input}.{}", encode_base64url(&sig_bytes))).unwrap();
    let config = config(json!({ "alg": "ES256K", "defer_sig_ver": true }));

    let compiled = compile_jwt(&config, &key, &token).unwrap();

    let digest = Sha256::digest(input.as_bytes());
    let aux = &compiled.prover_aux;
    assert_eq!(aux.get("digest"), Some(&json!(hex::encode_upper(digest))));
    assert_eq!(
        aux.get("signature_r"),
        Some(&json!(hex::encode_upper(&sig_bytes[..32])))
    );
    assert_eq!(
        aux.get("signature_s"),
        Some(&json!(hex::encode_upper(&sig_bytes[32..])))
    );
    assert_eq!(aux.get("pk_x"), Some(&json!(hex::encode_upper(&x))));
    assert_eq!(aux.get("pk_y"), Some(&json!(hex::encode_upper(&y))));

    let digest_248 = num_bigint::BigUint::from_bytes_be(&digest[..31]).to_string();
    assert_eq!(compiled.witness.get("digest_248"), Some(&json!(digest_248)));
    assert_eq!(compiled.public_inputs.get("digest_248"), Some(&json!(digest_248)));
    assert!(!compiled.witness.contains("signature_r"));
    assert!(!compiled.witness.contains("pubkey_x"));
    assert_eq!(
        compiled.public_inputs.get("pubkey_x"),
        Some(&decimal_array(&bytes_to_limbs_fixed(&x, 64, 4).unwrap()))
    );
}

#[test]
fn oversize_claim_writes_nothing() {
    let issuer = P256Issuer::new();
    let token = SignedToken::parse(&issuer.sign(r#"{"name":"Bartholomew"}"#)).unwrap();
    let config = config(json!({
        "alg": "ES256",
        "name": { "type": "string", "reveal": true, "max_claim_byte_len": 8 }
    }));
    let dir = tempfile::tempdir().unwrap();

    let result = compile_jwt(&config, &issuer.key(), &token)
        .and_then(|compiled| write_artifacts(dir.path(), &compiled));

    assert!(matches!(result, Err(CompileError::Oversize { max: 8, .. })));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn non_minified_payload_is_rejected() {
    let issuer = P256Issuer::new();
    let token = SignedToken::parse(&issuer.sign(r#"{"age": 30}"#)).unwrap();
    let config = config(json!({
        "alg": "ES256",
        "age": { "type": "number", "reveal": true, "max_claim_byte_len": 31 }
    }));

    let err = compile_jwt(&config, &issuer.key(), &token).unwrap_err();
    assert!(matches!(err, CompileError::MalformedToken(msg) if msg.contains("minified")));
}

#[test]
fn expired_token_still_compiles() {
    let issuer = P256Issuer::new();
    let token = SignedToken::parse(&issuer.sign(r#"{"exp":1000,"age":30}"#)).unwrap();
    assert_eq!(
        check_signature(&token, &issuer.key(), &TimeClaim::ALL),
        SignatureStatus::ClaimsTolerated(vec![TimeClaim::Exp])
    );
    let fresh = SignedToken::parse(&issuer.sign(r#"{"age":30}"#)).unwrap();
    assert_eq!(
        check_signature(&fresh, &issuer.key(), &TimeClaim::ALL),
        SignatureStatus::Valid
    );

    let config = config(json!({ "alg": "ES256", "age": { "type": "number" } }));
    assert!(compile_jwt(&config, &issuer.key(), &token).is_ok());
}

#[test]
fn untolerated_expiry_is_rejected_but_compiles() {
    let issuer = P256Issuer::new();
    let token = SignedToken::parse(&issuer.sign(r#"{"exp":1000,"age":30}"#)).unwrap();
    let config = config(json!({
        "alg": "ES256",
        "tolerated_claim_checks": ["nbf"],
        "age": { "type": "number" }
    }));

    assert!(matches!(
        check_signature(&token, &issuer.key(), &config.tolerated_claim_checks),
        SignatureStatus::ClaimsRejected(_)
    ));
    assert!(compile_jwt(&config, &issuer.key(), &token).is_ok());
}

#[test]
fn rs256_token_signed_by_jwt_library() {
    use jwt_simple::prelude::{Claims, Duration, RS256KeyPair, RSAKeyPairLike};

    let key_pair = RS256KeyPair::generate(2048).unwrap();
    let components = key_pair.public_key().to_components();
    let key = IssuerKey::from_json(
        &json!({
            "kty": "RSA",
            "n": encode_base64url(&components.n),
            "e": encode_base64url(&components.e),
        })
        .to_string(),
    )
    .unwrap();
    let token = SignedToken::parse(&key_pair.sign(Claims::create(Duration::from_hours(1))).unwrap())
        .unwrap();

    assert_eq!(
        check_signature(&token, &key, &TimeClaim::ALL),
        SignatureStatus::Valid
    );

    let config = config(json!({
        "alg": "RS256",
        "exp": { "type": "number", "reveal": true, "max_claim_byte_len": 31 }
    }));
    let compiled = compile_jwt(&config, &key, &token).unwrap();
    let modulus = decimal_array(&bytes_to_limbs(&components.n, 121));
    assert_eq!(compiled.witness.get("modulus"), Some(&modulus));
    assert_eq!(compiled.public_inputs.get("modulus"), Some(&modulus));
    assert_eq!(
        compiled.witness.get("signature"),
        Some(&decimal_array(&bytes_to_limbs(&token.signature, 121)))
    );
    let exp = token.payload["exp"].to_string();
    assert_eq!(compiled.public_inputs.get("exp_value"), Some(&json!(exp)));
}

#[test]
fn es256k_token_verified_in_circuit() {
    use k256::ecdsa::{signature::Signer, Signature, SigningKey};

    let signing = SigningKey::from_slice(&[0x29; 32]).unwrap();
    let point = signing.verifying_key().to_encoded_point(false);
    let (x, y) = (point.x().unwrap().to_vec(), point.y().unwrap().to_vec());
    let key = IssuerKey::from_json(
        &json!({
            "kty": "EC",
            "crv": "secp256k1",
            "x": encode_base64url(&x),
            "y": encode_base64url(&y),
        })
        .to_string(),
    )
    .unwrap();

    let input = signing_input(r#"{"alg":"ES256K","typ":"JWT"}"#, r#"{"sub":"alice"}"#);
    let signature: Signature = signing.sign(input.as_bytes());
    let sig_bytes = signature.to_bytes();
    let token =
        SignedToken::parse(&format!("{input}.{}", encode_base64url(&sig_bytes))).unwrap();

    assert_eq!(
        check_signature(&token, &key, &TimeClaim::ALL),
        SignatureStatus::Valid
    );

    let compiled = compile_jwt(&config(json!({ "alg": "ES256K" })), &key, &token).unwrap();
    let witness = &compiled.witness;
    assert_eq!(
        witness.get("signature_r"),
        Some(&decimal_array(&bytes_to_limbs_fixed(&sig_bytes[..32], 64, 4).unwrap()))
    );
    assert_eq!(
        witness.get("signature_s"),
        Some(&decimal_array(&bytes_to_limbs_fixed(&sig_bytes[32..], 64, 4).unwrap()))
    );
    assert_eq!(
        witness.get("pubkey_y"),
        Some(&decimal_array(&bytes_to_limbs_fixed(&y, 64, 4).unwrap()))
    );
    assert!(!witness.contains("digest_248"));
    assert!(compiled.prover_aux.is_empty());
}

#[test]
fn tampered_token_is_reported_invalid() {
    let issuer = P256Issuer::new();
    let raw = issuer.sign(r#"{"age":30}"#);
    let forged = raw.replacen(
        &encode_base64url(br#"{"age":30}"#),
        &encode_base64url(br#"{"age":31}"#),
        1,
    );
    let token = SignedToken::parse(&forged).unwrap();

    assert!(matches!(
        check_signature(&token, &issuer.key(), &TimeClaim::ALL),
        SignatureStatus::Invalid(_)
    ));
}

#[test]
fn compiles_from_files() {
    let issuer = P256Issuer::new();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    let key_path = dir.path().join("issuer.jwk");
    let token_path = dir.path().join("token.jwt");
    fs::write(
        &config_path,
        r#"{"alg":"ES256","email":{"type":"string","reveal":true,"max_claim_byte_len":31,"reveal_domain_only":true}}"#,
    )
    .unwrap();
    fs::write(&key_path, issuer.jwk().to_string()).unwrap();
    fs::write(
        &token_path,
        format!("{}\n", issuer.sign(r#"{"email":"alice@example.com"}"#)),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let key = load_issuer_key(&key_path).unwrap();
    let token = load_token(&token_path).unwrap();
    let compiled = compile_jwt(&config, &key, &token).unwrap();
    let out = dir.path().join("out");
    let paths = write_artifacts(&out, &compiled).unwrap();

    let public: Value = serde_json::from_str(&fs::read_to_string(&paths.public_io).unwrap()).unwrap();
    assert!(public.get("pubkey_x").is_some());
    assert!(public.get("email_value").is_some());

    let aux: Value = serde_json::from_str(&fs::read_to_string(&paths.prover_aux).unwrap()).unwrap();
    assert_eq!(aux, json!({ "_placeholder": "empty file" }));

    let witness: Value =
        serde_json::from_str(&fs::read_to_string(&paths.prover_inputs).unwrap()).unwrap();
    assert_eq!(witness["email_value"], public["email_value"]);
}
