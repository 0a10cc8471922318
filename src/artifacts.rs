use std::{
    fs::{self, create_dir_all, File},
    io::Write,
    path::{Path, PathBuf},
};

use serde_json::Value;
use tracing::{info, warn};

use crate::{
    config::{validate, ValidatedConfig},
    error::Result,
    key::IssuerKey,
    mdl::MdlRecord,
    token::SignedToken,
    witness::CompiledInputs,
};

pub const PROVER_INPUTS: &str = "prover_inputs.json";
pub const PUBLIC_IO: &str = "public_io.json";
pub const PROVER_AUX: &str = "prover_aux.json";

const TMP_SUFFIX: &str = ".tmp";

/// Read and validate a configuration file.
pub fn load_config(path: &Path) -> Result<ValidatedConfig> {
    let mut config: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let validated = validate(&mut config)?;
    info!(
        path = %path.display(),
        alg = validated.alg.name(),
        credtype = validated.credtype.name(),
        claims = validated.claims.len(),
        "Loaded configuration"
    );
    Ok(validated)
}

pub fn load_issuer_key(path: &Path) -> Result<IssuerKey> {
    let key = IssuerKey::from_json(&fs::read_to_string(path)?)?;
    info!(path = %path.display(), alg = key.alg().name(), "Loaded issuer key");
    Ok(key)
}

pub fn load_token(path: &Path) -> Result<SignedToken> {
    let token = SignedToken::parse(&fs::read_to_string(path)?)?;
    info!(path = %path.display(), len = token.raw().len(), "Loaded token");
    Ok(token)
}

pub fn load_mdl_record(path: &Path) -> Result<MdlRecord> {
    let record = MdlRecord::from_json(&fs::read_to_string(path)?)?;
    info!(path = %path.display(), "Loaded mDL record");
    Ok(record)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub prover_inputs: PathBuf,
    pub public_io: PathBuf,
    pub prover_aux: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        ArtifactPaths {
            prover_inputs: dir.join(PROVER_INPUTS),
            public_io: dir.join(PUBLIC_IO),
            prover_aux: dir.join(PROVER_AUX),
        }
    }
}

/// Write the witness, public inputs and auxiliary data into `out_dir`.
///
/// All three files are rendered and written to temporary siblings before
/// any of them is renamed into place, so an error leaves no partial artifact.
pub fn write_artifacts(out_dir: &Path, compiled: &CompiledInputs) -> Result<ArtifactPaths> {
    let paths = ArtifactPaths::in_dir(out_dir);
    let rendered = [
        (&paths.prover_inputs, compiled.witness.to_json_pretty()?),
        (&paths.public_io, compiled.public_inputs.to_json_pretty()?),
        (&paths.prover_aux, compiled.prover_aux.to_json_pretty()?),
    ];

    create_dir_all(out_dir)?;

    let mut staged = Vec::with_capacity(rendered.len());
    for (path, contents) in &rendered {
        let tmp = tmp_path(path);
        if let Err(e) = write_file(&tmp, contents) {
            discard(&tmp);
            discard_all(&staged);
            return Err(e);
        }
        staged.push((tmp, path.as_path()));
    }

    publish(&staged)?;
    Ok(paths)
}

/// Rename every staged file into place. On failure the staged files not yet
/// renamed are removed.
fn publish(staged: &[(PathBuf, &Path)]) -> Result<()> {
    for (index, (tmp, path)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(tmp, path) {
            discard_all(&staged[index..]);
            return Err(e.into());
        }
        info!("Saved {}", path.display());
    }
    Ok(())
}

fn discard_all(staged: &[(PathBuf, &Path)]) {
    for (tmp, _) in staged {
        discard(tmp);
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove temporary file");
        }
    }
}
