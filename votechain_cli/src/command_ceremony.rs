use rand::rngs::OsRng;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use votechain::{Config, Custodian, KeyCeremony, MemAuditLog};

#[derive(serde::Serialize)]
struct CustodianFile<'a> {
    custodian: &'a Custodian,
    election_id: Uuid,
    /// X25519 transport secret, hex
    secret_key: String,
}

fn fail<E: Display>(step: &str, e: E) -> ! {
    eprintln!("votechain ceremony: {} failed: {}", step, e);
    std::process::exit(1);
}

pub fn command_ceremony(matches: &clap::ArgMatches, config: &Config) {
    let num_custodians = *matches.get_one::<u8>("custodians").unwrap_or(&0);
    let threshold = *matches.get_one::<u8>("threshold").unwrap_or(&0);
    let key_bits = matches
        .get_one::<usize>("key-bits")
        .copied()
        .unwrap_or(config.key_bits);
    let out = match matches.get_one::<String>("out") {
        Some(out) => PathBuf::from(crate::expand(out)),
        None => fail("output", "--out is required"),
    };

    if let Err(e) = std::fs::create_dir_all(&out) {
        fail("output directory", e);
    }

    let mut rng = OsRng;
    let election_id = Uuid::new_v4();

    let audit = Arc::new(MemAuditLog::new());
    let mut ceremony = KeyCeremony::new(election_id, num_custodians, threshold, key_bits, audit)
        .unwrap_or_else(|e| fail("setup", e));

    // Each custodian generates its own transport key; only the public half is registered
    let custodians: Vec<_> = (0..num_custodians)
        .map(|i| Custodian::new(&mut rng, &format!("custodian-{}", i + 1)))
        .collect();
    for (custodian, _) in &custodians {
        ceremony
            .register_custodian(custodian.clone())
            .unwrap_or_else(|e| fail("registration", e));
    }

    let params = ceremony
        .start(&mut rng)
        .unwrap_or_else(|e| fail("key generation", e))
        .clone();
    match ceremony.self_test(&mut rng) {
        Ok(true) => {}
        Ok(false) => fail("threshold self-test", "round trip mismatch"),
        Err(e) => fail("threshold self-test", e),
    }

    let records = ceremony
        .key_shares(&mut rng)
        .unwrap_or_else(|e| fail("share encryption", e));
    ceremony.destroy_private_data();

    crate::write_json("ceremony", &out.join("params.json"), &params);
    for ((custodian, secret), record) in custodians.iter().zip(&records) {
        let n = record.share_index;
        crate::write_json(
            "ceremony",
            &out.join(format!("custodian-{}.json", n)),
            &CustodianFile {
                custodian,
                election_id,
                secret_key: hex::encode(secret.to_bytes()),
            },
        );
        crate::write_json("ceremony", &out.join(format!("key-share-{}.json", n)), record);
    }

    println!("> Election {}", election_id);
    println!("  key id: {}", params.key_id);
    println!(
        "  wrote params.json and {} custodian/key-share pairs to {}",
        records.len(),
        out.display()
    );
}
