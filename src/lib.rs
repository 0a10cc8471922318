//! Circuit input compiler for signed credentials.
//!
//! This library turns a signed credential into the exact integer inputs a
//! zero-knowledge circuit expects:
//! - JWTs signed with RS256, ES256 or ES256K, with selective claim disclosure
//! - mobile driving licenses (mDL) signed with ES256
//!
//! Each run produces the prover's witness, the verifier's public inputs and
//! the auxiliary data for out-of-circuit signature verification.

pub mod artifacts;
pub mod codec;
pub mod config;
pub mod digest;
pub mod error;
pub mod inputs;
pub mod key;
pub mod locator;
pub mod mdl;
pub mod token;
pub mod utils;
pub mod witness;

// Re-export commonly used types and functions
pub use artifacts::{
    load_config, load_issuer_key, load_mdl_record, load_token, write_artifacts, ArtifactPaths,
    PROVER_AUX, PROVER_INPUTS, PUBLIC_IO,
};
pub use config::{validate, Alg, ClaimConfig, ClaimType, CredType, TimeClaim, ValidatedConfig};
pub use error::{CompileError, Result};
pub use inputs::CircuitInputs;
pub use key::IssuerKey;
pub use mdl::{compile_mdl, IssuerSignedItem, MdlRecord};
pub use token::{check_signature, SignatureStatus, SignedToken};
pub use witness::{compile_jwt, CompiledInputs, Stage};
