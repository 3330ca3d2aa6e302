use std::sync::Arc;
use votechain::{Block, Config, MemAuditLog, ReceiptService, VoteReceipt};

pub fn command_verify_receipt(matches: &clap::ArgMatches, config: &Config) {
    let (receipt_file, block_file) = match (
        matches.get_one::<String>("RECEIPT"),
        matches.get_one::<String>("BLOCK"),
    ) {
        (Some(receipt), Some(block)) => (receipt, block),
        _ => {
            eprintln!("votechain verify-receipt: receipt and block files required");
            std::process::exit(1);
        }
    };

    let receipt: VoteReceipt = crate::read_json("verify-receipt", receipt_file);
    let block: Block = crate::read_json("verify-receipt", block_file);
    let root = matches
        .get_one::<String>("root")
        .cloned()
        .unwrap_or_else(|| block.merkle_root.clone());

    let service = match ReceiptService::from_config(config, Arc::new(MemAuditLog::new())) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("votechain verify-receipt: {}", e);
            std::process::exit(1);
        }
    };
    let valid = service.verify(&receipt, &block, &root);

    print!("{}", service.printable(&receipt));
    if service.is_expired(&receipt) {
        println!("> Receipt is past its verification window");
    }

    if valid {
        println!("> Receipt verified: vote included in block #{}", block.index);
    } else {
        println!("> Receipt did NOT verify");
        std::process::exit(2);
    }
}
