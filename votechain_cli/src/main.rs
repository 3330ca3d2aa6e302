use clap::{value_parser, Arg, ArgAction, Command};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing_subscriber::{prelude::*, EnvFilter};

mod command_ceremony;
mod command_e2e;
mod command_validate;
mod command_verify_receipt;

#[tokio::main]
async fn main() {
    let matches = Command::new("votechain")
        .version("0.1.0")
        .about("Runs and audits threshold-keyed vote ledgers")
        .arg(
            Arg::new("v")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            Command::new("e2e")
                .about("Run a complete simulated election")
                .arg(
                    Arg::new("custodians")
                        .long("custodians")
                        .value_parser(value_parser!(u8))
                        .default_value("5")
                        .help("Number of key custodians"),
                )
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .value_parser(value_parser!(u8))
                        .default_value("3")
                        .help("Custodians required to decrypt"),
                )
                .arg(
                    Arg::new("votes")
                        .long("votes")
                        .value_parser(value_parser!(u32))
                        .default_value("10")
                        .help("Number of votes to cast"),
                )
                .arg(
                    Arg::new("key-bits")
                        .long("key-bits")
                        .value_parser(value_parser!(usize))
                        .help("RSA modulus size, defaults to VOTECHAIN_KEY_BITS"),
                )
                .arg(
                    Arg::new("options")
                        .long("options")
                        .default_value("alpha,beta,gamma")
                        .help("Comma separated ballot options"),
                ),
        )
        .subcommand(
            Command::new("ceremony")
                .about("Run a key ceremony and write its artifacts")
                .arg(
                    Arg::new("custodians")
                        .long("custodians")
                        .value_parser(value_parser!(u8))
                        .required(true),
                )
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .value_parser(value_parser!(u8))
                        .required(true),
                )
                .arg(
                    Arg::new("key-bits")
                        .long("key-bits")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .required(true)
                        .help("Output directory"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate a chain exported as JSON")
                .arg(Arg::new("INPUT").index(1).required(true).help("Chain JSON file"))
                .arg(
                    Arg::new("validator-key")
                        .long("validator-key")
                        .action(ArgAction::Append)
                        .help("Trusted validator as ID=HEX_PUBLIC_KEY"),
                ),
        )
        .subcommand(
            Command::new("verify-receipt")
                .about("Verify a vote receipt against its block")
                .arg(Arg::new("RECEIPT").index(1).required(true).help("Receipt JSON file"))
                .arg(Arg::new("BLOCK").index(2).required(true).help("Block JSON file"))
                .arg(
                    Arg::new("root")
                        .long("root")
                        .help("Merkle root to verify against, defaults to the block's own root"),
                ),
        )
        .get_matches();

    init_logging(matches.get_count("v"));

    let config = match votechain::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("votechain: {}", e);
            std::process::exit(1);
        }
    };

    match matches.subcommand() {
        Some(("e2e", matches)) => command_e2e::command_e2e(matches, &config).await,
        Some(("ceremony", matches)) => command_ceremony::command_ceremony(matches, &config),
        Some(("validate", matches)) => command_validate::command_validate(matches, &config),
        Some(("verify-receipt", matches)) => {
            command_verify_receipt::command_verify_receipt(matches, &config)
        }
        _ => {
            eprintln!("votechain: no subcommand given, see --help");
            std::process::exit(1);
        }
    }
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Expand `~` and environment variables in a path argument
pub fn expand(input: &str) -> String {
    shellexpand::full(input)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| input.to_owned())
}

/// Read a JSON file or exit with a message
pub fn read_json<T: DeserializeOwned>(command: &str, filename: &str) -> T {
    let filename = expand(filename);
    let bytes = std::fs::read(&filename).unwrap_or_else(|e| {
        eprintln!("votechain {}: unable to read {}: {}", command, filename, e);
        std::process::exit(1);
    });
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        eprintln!("votechain {}: unable to parse {}: {}", command, filename, e);
        std::process::exit(1);
    })
}

/// Write pretty JSON or exit with a message
pub fn write_json<T: serde::Serialize>(command: &str, path: &Path, value: &T) {
    let json = serde_json::to_vec_pretty(value).unwrap_or_else(|e| {
        eprintln!("votechain {}: unable to serialize {}: {}", command, path.display(), e);
        std::process::exit(1);
    });
    if let Err(e) = std::fs::write(path, json) {
        eprintln!("votechain {}: unable to write {}: {}", command, path.display(), e);
        std::process::exit(1);
    }
}
