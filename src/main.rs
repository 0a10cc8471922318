//! CLI for compiling credentials into circuit inputs.
//!
//! Usage examples:
//!   cargo run --release -- jwt --config inputs/config.json --key inputs/issuer.jwk --token inputs/token.jwt
//!   cargo run --release -- mdl --config inputs/mdl/config.json --key inputs/mdl/issuer.jwk --cred inputs/mdl/cred.json
//!
//! Both commands write `prover_inputs.json`, `public_io.json` and
//! `prover_aux.json` into the output directory (`generated_files` by default).
//! Diagnostics go to stderr; set `RUST_LOG=info` to see them.

use anyhow::Context;
use cred_witness::{
    compile_jwt, compile_mdl, load_config, load_issuer_key, load_mdl_record, load_token,
    write_artifacts,
};
use std::{
    env::args,
    path::{Path, PathBuf},
    process,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_OUT_DIR: &str = "generated_files";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialKind {
    Jwt,
    Mdl,
}

#[derive(Debug, Default, Clone)]
struct CommandOptions {
    config: Option<PathBuf>,
    key: Option<PathBuf>,
    credential: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    stdout: bool,
}

#[derive(Debug, Clone)]
struct ParsedCommand {
    kind: CredentialKind,
    options: CommandOptions,
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = args().collect();
    let command_args: &[String] = if args.len() > 1 { &args[1..] } else { &[] };

    let command = match parse_command(command_args) {
        Ok(cmd) => cmd,
        Err(err) => {
            eprintln!("Error: {}", err);
            print_usage();
            process::exit(1);
        }
    };

    if let Err(err) = execute(command) {
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}

fn execute(command: ParsedCommand) -> anyhow::Result<()> {
    let options = command.options;
    let credential_flag = match command.kind {
        CredentialKind::Jwt => "--token",
        CredentialKind::Mdl => "--cred",
    };
    let config_path = required(&options.config, "--config")?;
    let key_path = required(&options.key, "--key")?;
    let credential_path = required(&options.credential, credential_flag)?;
    let out_dir = options
        .out_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));

    let config = load_config(config_path)
        .with_context(|| format!("loading configuration {}", config_path.display()))?;
    let key = load_issuer_key(key_path)
        .with_context(|| format!("loading issuer key {}", key_path.display()))?;

    let compiled = match command.kind {
        CredentialKind::Jwt => {
            let token = load_token(credential_path)
                .with_context(|| format!("loading token {}", credential_path.display()))?;
            compile_jwt(&config, &key, &token)?
        }
        CredentialKind::Mdl => {
            let record = load_mdl_record(credential_path)
                .with_context(|| format!("loading mDL record {}", credential_path.display()))?;
            compile_mdl(&config, &key, &record)?
        }
    };

    let paths = write_artifacts(&out_dir, &compiled)
        .with_context(|| format!("writing artifacts to {}", out_dir.display()))?;
    info!(
        witness = %paths.prover_inputs.display(),
        public = %paths.public_io.display(),
        aux = %paths.prover_aux.display(),
        "Circuit inputs written"
    );

    if options.stdout {
        println!("{}", compiled.witness.to_json_pretty()?);
    }
    Ok(())
}

fn required<'a>(value: &'a Option<PathBuf>, flag: &str) -> anyhow::Result<&'a Path> {
    value
        .as_deref()
        .with_context(|| format!("Missing required option {flag}"))
}

fn parse_command(args: &[String]) -> Result<ParsedCommand, String> {
    if args.is_empty() {
        return Err("No command provided".into());
    }

    let kind = match args[0].as_str() {
        "-h" | "--help" => {
            print_usage();
            process::exit(0);
        }
        "jwt" => CredentialKind::Jwt,
        "mdl" => CredentialKind::Mdl,
        other => return Err(format!("Unknown command '{other}'")),
    };

    Ok(ParsedCommand {
        kind,
        options: parse_options(kind, &args[1..])?,
    })
}

fn parse_options(kind: CredentialKind, args: &[String]) -> Result<CommandOptions, String> {
    let mut options = CommandOptions::default();
    let mut index = 0;

    while index < args.len() {
        let arg = &args[index];
        if arg == "--help" || arg == "-h" {
            print_usage();
            process::exit(0);
        }
        if arg == "--stdout" {
            options.stdout = true;
            index += 1;
            continue;
        }

        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let slot = match (flag, kind) {
            ("--config" | "-c", _) => &mut options.config,
            ("--key" | "-k", _) => &mut options.key,
            ("--token" | "-t", CredentialKind::Jwt) => &mut options.credential,
            ("--cred", CredentialKind::Mdl) => &mut options.credential,
            ("--out-dir" | "-o", _) => &mut options.out_dir,
            _ => return Err(format!("Unknown option '{arg}'")),
        };

        let value = match inline {
            Some(value) => value,
            None => {
                index += 1;
                args.get(index)
                    .cloned()
                    .ok_or_else(|| format!("Missing value for {flag}"))?
            }
        };
        if value.is_empty() {
            return Err(format!("Missing value for {flag}"));
        }
        *slot = Some(PathBuf::from(value));
        index += 1;
    }

    Ok(options)
}

fn print_usage() {
    eprintln!(
        "Usage:
  cred-witness jwt --config <path> --key <path> --token <path> [options]
  cred-witness mdl --config <path> --key <path> --cred <path> [options]

Commands:
  jwt                  Compile a signed JWT
  mdl                  Compile an mDL record (hex tbs_data and signature)

Options:
  --config, -c <path>  Claim-revelation configuration (JSON)
  --key, -k <path>     Issuer public key (JWK)
  --token, -t <path>   Compact-serialized JWT (jwt only)
  --cred <path>        mDL record JSON (mdl only)
  --out-dir, -o <dir>  Output directory (default: {DEFAULT_OUT_DIR})
  --stdout             Also print the prover inputs to stdout

Examples:
  cargo run --release -- jwt -c inputs/config.json -k inputs/issuer.jwk -t inputs/token.jwt
  cargo run --release -- mdl -c inputs/mdl/config.json -k inputs/mdl/issuer.jwk --cred inputs/mdl/cred.json -o out/mdl"
    );
}
