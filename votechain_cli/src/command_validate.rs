use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;
use votechain::ledger::validate_blocks;
use votechain::{Block, Config};

fn parse_validator_key(arg: &str) -> Option<(String, VerifyingKey)> {
    let (id, key_hex) = arg.split_once('=')?;
    let bytes: [u8; 32] = hex::decode(key_hex).ok()?.try_into().ok()?;
    let key = VerifyingKey::from_bytes(&bytes).ok()?;
    Some((id.to_owned(), key))
}

pub fn command_validate(matches: &clap::ArgMatches, config: &Config) {
    let filename = match matches.get_one::<String>("INPUT") {
        Some(filename) => filename,
        None => {
            eprintln!("votechain validate: input filename required");
            std::process::exit(1);
        }
    };
    let blocks: Vec<Block> = crate::read_json("validate", filename);

    let mut validators = HashMap::new();
    for arg in matches
        .get_many::<String>("validator-key")
        .into_iter()
        .flatten()
    {
        match parse_validator_key(arg) {
            Some((id, key)) => {
                validators.insert(id, key);
            }
            None => {
                eprintln!("votechain validate: invalid validator key {}", arg);
                std::process::exit(1);
            }
        }
    }
    if validators.is_empty() && blocks.len() > 1 {
        eprintln!("votechain validate: no --validator-key given, block signatures will not verify");
    }

    let report = validate_blocks(&blocks, config.difficulty, &validators);
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("votechain validate: unable to print report: {}", e);
            std::process::exit(1);
        }
    }

    if !report.is_valid {
        std::process::exit(2);
    }
}
