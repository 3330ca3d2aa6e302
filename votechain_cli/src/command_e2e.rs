use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use votechain::*;

const VALIDATOR_ID: &str = "cli-validator";

fn fail<E: Display>(step: &str, e: E) -> ! {
    eprintln!("votechain e2e: {} failed: {}", step, e);
    std::process::exit(1);
}

pub async fn command_e2e(matches: &clap::ArgMatches, config: &Config) {
    let num_custodians = *matches.get_one::<u8>("custodians").unwrap_or(&5);
    let threshold = *matches.get_one::<u8>("threshold").unwrap_or(&3);
    let num_votes = *matches.get_one::<u32>("votes").unwrap_or(&10);
    let key_bits = matches
        .get_one::<usize>("key-bits")
        .copied()
        .unwrap_or(config.key_bits);
    let options: Vec<String> = matches
        .get_one::<String>("options")
        .map(|s| s.split(',').map(|o| o.trim().to_owned()).filter(|o| !o.is_empty()).collect())
        .unwrap_or_default();
    if options.is_empty() {
        fail("ballot setup", "at least one option is required");
    }

    let mut rng = OsRng;
    let election_id = Uuid::new_v4();

    // Key ceremony
    let custodians: Vec<_> = (0..num_custodians)
        .map(|i| Custodian::new(&mut rng, &format!("custodian-{}", i + 1)))
        .collect();
    let audit = Arc::new(MemAuditLog::new());
    let mut ceremony =
        KeyCeremony::new(election_id, num_custodians, threshold, key_bits, audit.clone())
            .unwrap_or_else(|e| fail("ceremony setup", e));
    for (custodian, _) in &custodians {
        ceremony
            .register_custodian(custodian.clone())
            .unwrap_or_else(|e| fail("custodian registration", e));
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

    let store = Arc::new(MemStore::new());
    let records = ceremony
        .key_shares(&mut rng)
        .unwrap_or_else(|e| fail("share distribution", e));
    for record in records {
        let custodian_id = record.custodian_id;
        store
            .insert_key_share(record)
            .unwrap_or_else(|e| fail("share distribution", e));
        store
            .mark_distributed(election_id, custodian_id, chrono::Utc::now())
            .unwrap_or_else(|e| fail("share distribution", e));
    }
    ceremony.destroy_private_data();

    println!("> Key ceremony {}", ceremony.state());
    println!("  key id:     {}", params.key_id);
    println!("  custodians: {} (threshold {})", num_custodians, threshold);

    // Voting
    let ledger = VoteLedger::new(store.clone(), audit.clone(), config)
        .unwrap_or_else(|e| fail("ledger setup", e))
        .with_validator(Validator::new(&mut rng, VALIDATOR_ID));
    ledger
        .create_genesis(election_id)
        .await
        .unwrap_or_else(|e| fail("genesis", e));

    let receipts = ReceiptService::from_config(config, audit.clone())
        .unwrap_or_else(|e| fail("receipt setup", e));
    let mut issued = Vec::with_capacity(num_votes as usize);
    for _ in 0..num_votes {
        let option = &options[rng.gen_range(0..options.len())];
        let ciphertext = Ballot::new(option)
            .encrypt(&mut rng, &params.public_key)
            .unwrap_or_else(|e| fail("ballot encryption", e));
        let vote = VotePayload::new(ciphertext, None);

        let (block, proof) = ledger
            .append(election_id, vote.clone(), VALIDATOR_ID)
            .await
            .unwrap_or_else(|e| fail("vote append", e.public_message()));
        let receipt = receipts
            .generate(&mut rng, &vote, &block, &proof)
            .unwrap_or_else(|e| fail("receipt", e));
        store
            .insert_receipt(receipt.clone())
            .unwrap_or_else(|e| fail("receipt", e));
        issued.push((receipt, block));
    }
    println!("> Cast {} votes", issued.len());

    let mut verified = 0;
    for (receipt, block) in &issued {
        match receipts.check(receipt, block, &block.merkle_root, store.as_ref()) {
            Ok(true) => verified += 1,
            Ok(false) => eprintln!("  receipt {} did not verify", receipt.receipt_id),
            Err(e) => fail("receipt check", e),
        }
    }
    println!("> Verified {}/{} receipts", verified, issued.len());
    if let Some((receipt, _)) = issued.first() {
        println!();
        print!("{}", receipts.printable(receipt));
        println!();
    }

    let report = ledger
        .validate_chain(election_id)
        .await
        .unwrap_or_else(|e| fail("validation", e));
    println!(
        "> Chain {}: {} blocks, merkle root valid: {}",
        if report.is_valid { "valid" } else { "INVALID" },
        report.validated_blocks,
        report.merkle_root_valid
    );

    // Tally with the first quorum of custodians
    let share_records = store.shares_for(election_id);
    let quorum: Vec<Share> = custodians
        .iter()
        .take(threshold as usize)
        .map(|(custodian, secret)| {
            share_records
                .iter()
                .find(|r| r.custodian_id == custodian.id)
                .ok_or(Error::UnknownCustodian(custodian.id))
                .and_then(|r| r.open(secret))
                .unwrap_or_else(|e| fail("share recovery", e))
        })
        .collect();

    let tally = Tally::count(&params, &ledger.chain(election_id), &quorum, &HashSet::new())
        .unwrap_or_else(|e| fail("tally", e));
    info!(election = %election_id, votes = tally.num_votes, "election tallied");

    println!("> Tally ({} counted, {} voided, {} rejected)", tally.num_votes, tally.voided, tally.rejected);
    for (option, count) in tally.ranked() {
        println!("  {} got {} votes", option, count);
    }
    if let Some((winner, _)) = tally.ranked().first() {
        println!("  The winner is {}", winner);
    }
    println!("> {} audit records", audit.records(election_id).len());
}
