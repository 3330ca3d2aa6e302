use super::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const NODE: &str = "validator-1";

fn ledger(rng: &mut ChaCha20Rng) -> (VoteLedger<MemStore>, Arc<MemStore>, Arc<MemAuditLog>) {
    let store = Arc::new(MemStore::new());
    let audit = Arc::new(MemAuditLog::new());
    let config = Config {
        mining_threads: 2,
        max_concurrent_mines: 4,
        ..Config::default()
    };
    let ledger = VoteLedger::new(store.clone(), audit.clone(), &config)
        .unwrap()
        .with_validator(Validator::new(rng, NODE));
    (ledger, store, audit)
}

#[tokio::test]
async fn end_to_end_election() {
    let mut rng = ChaCha20Rng::seed_from_u64(1);
    let election_id = Uuid::new_v4();

    // Five custodians, any three of whom can decrypt
    let custodians: Vec<_> = (0..5)
        .map(|i| Custodian::new(&mut rng, &format!("custodian-{}", i)))
        .collect();

    let audit = Arc::new(MemAuditLog::new());
    let mut ceremony = KeyCeremony::new(election_id, 5, 3, 1024, audit.clone()).unwrap();
    for (custodian, _) in &custodians {
        ceremony.register_custodian(custodian.clone()).unwrap();
    }
    let params = ceremony.start(&mut rng).unwrap().clone();
    assert!(ceremony.self_test(&mut rng).unwrap());

    // Distribute encrypted shares, then forget them
    let store = Arc::new(MemStore::new());
    for record in ceremony.key_shares(&mut rng).unwrap() {
        store.insert_key_share(record).unwrap();
    }
    for (custodian, _) in &custodians {
        store
            .mark_distributed(election_id, custodian.id, chrono::Utc::now())
            .unwrap();
    }
    ceremony.destroy_private_data();

    // Ledger
    let ledger = VoteLedger::new(store.clone(), audit.clone(), &Config::default())
        .unwrap()
        .with_validator(Validator::new(&mut rng, NODE));
    ledger.create_genesis(election_id).await.unwrap();

    let receipts = ReceiptService::new("https://verify.example/receipts", 90, audit.clone()).unwrap();
    let mut issued = Vec::new();
    for option in ["yes", "no", "yes", "yes", "abstain"] {
        let ciphertext = Ballot::new(option)
            .encrypt(&mut rng, &params.public_key)
            .unwrap();
        let vote = VotePayload::new(ciphertext, None);

        let (block, proof) = ledger.append(election_id, vote.clone(), NODE).await.unwrap();
        let receipt = receipts.generate(&mut rng, &vote, &block, &proof).unwrap();
        store.insert_receipt(receipt.clone()).unwrap();
        issued.push((receipt, block));
    }

    // Voters check their receipts
    for (receipt, block) in &issued {
        assert!(receipts
            .check(receipt, block, &block.merkle_root, store.as_ref())
            .unwrap());
        assert!(store.receipt(receipt.receipt_id).unwrap().verified);
    }

    let report = ledger.validate_chain(election_id).await.unwrap();
    assert!(report.is_valid);
    assert_eq!(report.validated_blocks, 6);

    // Three custodians come forward at tally time
    let records = store.shares_for(election_id);
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.distributed));
    let quorum: Vec<Share> = [4usize, 0, 2]
        .iter()
        .map(|&i| {
            let (custodian, secret) = &custodians[i];
            let record = records
                .iter()
                .find(|r| r.custodian_id == custodian.id)
                .unwrap();
            let share = record.open(secret).unwrap();
            assert!(ceremony.verify_share(custodian.id, &share));
            share
        })
        .collect();

    let tally = Tally::count(&params, &ledger.chain(election_id), &quorum, &HashSet::new()).unwrap();
    assert_eq!(tally.num_votes, 5);
    assert_eq!(tally.totals["yes"], 3);
    assert_eq!(tally.totals["no"], 1);
    assert_eq!(tally.totals["abstain"], 1);
    assert_eq!(tally.rejected, 0);

    // The ceremony, then genesis, one block and one verified receipt per vote
    let events: Vec<AuditEventType> = audit
        .records(election_id)
        .iter()
        .map(|r| r.event_type)
        .collect();
    assert_eq!(
        events[..5],
        [
            AuditEventType::CeremonyStarted,
            AuditEventType::CeremonyCompleted,
            AuditEventType::SharesDistributed,
            AuditEventType::PrivateDataDestroyed,
            AuditEventType::GenesisCreated,
        ]
    );
    let count = |kind| events.iter().filter(|e| **e == kind).count();
    assert_eq!(count(AuditEventType::BlockSealed), 5);
    assert_eq!(count(AuditEventType::ReceiptVerified), 5);
    assert_eq!(count(AuditEventType::CeremonyFailed), 0);
}

#[test]
fn threshold_scenario_2048() {
    let mut rng = ChaCha20Rng::seed_from_u64(2);
    let (public_key, shares, params) = threshold::generate(&mut rng, 2048, 5, 3).unwrap();
    assert_eq!(params.key_bits, 2048);

    let mut payload = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rng, &mut payload);
    let ciphertext = threshold::encrypt(&mut rng, &public_key, &payload).unwrap();

    // Any three of the five
    for a in 0..5 {
        for b in (a + 1)..5 {
            for c in (b + 1)..5 {
                let quorum = vec![shares[a].clone(), shares[b].clone(), shares[c].clone()];
                assert_eq!(threshold::decrypt(&ciphertext, &quorum).unwrap(), payload);
            }
        }
    }

    // Two shares never yield the original payload
    let result = threshold::decrypt(&ciphertext, &shares[1..3]);
    assert!(!matches!(result, Ok(ref p) if p.as_slice() == payload));
}

#[tokio::test]
async fn genesis_always_validates() {
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let (ledger, _, _) = ledger(&mut rng);
    let election_id = Uuid::new_v4();

    let genesis = ledger.create_genesis(election_id).await.unwrap();
    assert_eq!(genesis.previous_hash, "0");

    let report = ledger.validate_chain(election_id).await.unwrap();
    assert!(report.is_valid);
    assert!(report.merkle_root_valid);
    assert!(report.chain_integrity_valid);
    assert!(report.invalid_blocks.is_empty());
}

#[tokio::test]
async fn tampered_vote_data_is_isolated() {
    let mut rng = ChaCha20Rng::seed_from_u64(4);
    let (ledger, store, _) = ledger(&mut rng);
    let election_id = Uuid::new_v4();
    ledger.create_genesis(election_id).await.unwrap();

    for i in 0..3u8 {
        let vote = VotePayload::new(vec![i; 64], None);
        ledger.append(election_id, vote, NODE).await.unwrap();
    }

    let report = ledger.validate_chain(election_id).await.unwrap();
    assert!(report.is_valid);
    assert_eq!(report.validated_blocks, 4);

    store.tamper(election_id, 2, |b| b.data.encrypted_vote[10] ^= 0x80);
    let report = ledger.validate_chain(election_id).await.unwrap();
    assert!(!report.is_valid);
    assert_eq!(report.invalid_blocks, vec![2]);
}

#[tokio::test]
async fn flipped_hash_marks_only_that_block() {
    let mut rng = ChaCha20Rng::seed_from_u64(5);
    let (ledger, store, _) = ledger(&mut rng);
    let election_id = Uuid::new_v4();
    ledger.create_genesis(election_id).await.unwrap();
    for i in 0..5u8 {
        let vote = VotePayload::new(vec![i; 32], Some(format!("voter-sig-{}", i)));
        ledger.append(election_id, vote, NODE).await.unwrap();
    }

    fn flip(hash: &mut String) {
        let last = hash.pop().unwrap_or('0');
        hash.push(if last == '0' { '1' } else { '0' });
    }

    for k in 0..=5u64 {
        let original = ledger.chain(election_id)[k as usize].clone();
        store.tamper(election_id, k, |b| flip(&mut b.hash));

        let report = ledger.validate_chain(election_id).await.unwrap();
        assert!(!report.is_valid, "k={}", k);
        assert_eq!(report.invalid_blocks, vec![k], "k={}", k);
        // Every stored hash is a merkle leaf, so the root no longer matches
        assert!(!report.merkle_root_valid, "k={}", k);
        assert!(!report.chain_integrity_valid, "k={}", k);
        assert!(report.anomalies.iter().all(|a| a.index >= k));

        store.tamper(election_id, k, |b| *b = original);
        assert!(ledger.validate_chain(election_id).await.unwrap().is_valid, "k={}", k);
    }
}

#[tokio::test]
async fn receipt_round_trip_through_ledger() {
    let mut rng = ChaCha20Rng::seed_from_u64(6);
    let (ledger, _, _) = ledger(&mut rng);
    let service = ReceiptService::from_config(&Config::default(), Arc::new(MemAuditLog::new())).unwrap();
    let election_id = Uuid::new_v4();
    ledger.create_genesis(election_id).await.unwrap();

    let vote = VotePayload::new(vec![7; 40], None);
    let (block, proof) = ledger.append(election_id, vote.clone(), NODE).await.unwrap();
    let (other, _) = ledger
        .append(election_id, VotePayload::new(vec![8; 40], None), NODE)
        .await
        .unwrap();

    let receipt = service.generate(&mut rng, &vote, &block, &proof).unwrap();
    assert!(service.verify(&receipt, &block, &block.merkle_root));

    let mut swapped = receipt.clone();
    swapped.block_hash = other.hash.clone();
    assert!(!service.verify(&swapped, &block, &block.merkle_root));

    // A fresh proof against the current root also reaches the block
    let current = ledger.merkle_proof(election_id, &block.hash).unwrap();
    let mut refreshed = receipt.clone();
    refreshed.merkle_proof = current.proof;
    assert!(service.verify(&refreshed, &block, &current.root));
}
