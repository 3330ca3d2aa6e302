//! Append-only, hash-chained vote ledger, one chain per election.
//!
//! Appends are serialized per election with an async mutex held from reading the tail to
//! inserting the successor. The nonce search runs on the [`MiningPool`], so the executor stays
//! responsive while a block is mined. Different elections never contend.

use crate::audit::{AuditEventType, AuditLog};
use crate::block::{self, Block, Mined, Validator, VotePayload, GENESIS_PREVIOUS_HASH, GENESIS_VALIDATOR};
use crate::config::Config;
use crate::merkle::MerkleTree;
use crate::pool::MiningPool;
use crate::store::LedgerStore;
use crate::util::{decode_hash, sha256, Hash};
use crate::{Error, Result};
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Mining rounds attempted per append, each from a fresh nonce seed
const MAX_MINING_ROUNDS: u32 = 3;

/// Merkle leaf for a stored block hash.
///
/// Well-formed hashes are used as-is. A corrupted, non-hex hash still maps to a
/// deterministic leaf so a damaged chain can be walked to the end.
pub fn block_leaf(hash: &str) -> Hash {
    decode_hash(hash).unwrap_or_else(|| sha256(&[hash.as_bytes()]))
}

/// Merkle tree over the hashes of `blocks`, in chain order
pub fn chain_tree(blocks: &[Block]) -> MerkleTree {
    let leaves: Vec<Hash> = blocks.iter().map(|b| block_leaf(&b.hash)).collect();
    MerkleTree::build(&leaves)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Stored hash differs from the digest of the block's fields
    HashMismatch,
    /// `previous_hash` matches neither the predecessor's stored nor recomputed hash
    BrokenLink,
    DifficultyNotMet,
    BadSignature,
    /// Block index does not match its position
    IndexGap,
    /// The last block's merkle root differs from the recomputed root of the chain
    MerkleRootMismatch,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub index: u64,
    pub kind: AnomalyKind,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub validated_blocks: usize,
    pub invalid_blocks: Vec<u64>,
    pub merkle_root_valid: bool,
    pub chain_integrity_valid: bool,
    pub anomalies: Vec<Anomaly>,
}

/// Validate a chain without touching storage.
///
/// Every block is checked and every anomaly is reported; the walk never stops early.
/// Corruption is attributed to the block whose stored fields changed: a successor whose link
/// matches its predecessor's true digest is not itself flagged.
pub fn validate_blocks(
    blocks: &[Block],
    difficulty: u32,
    validators: &HashMap<String, VerifyingKey>,
) -> ValidationReport {
    let mut anomalies = Vec::new();
    let mut recomputed: Vec<Option<String>> = Vec::with_capacity(blocks.len());

    for (position, block) in blocks.iter().enumerate() {
        let mut flag = |kind| {
            anomalies.push(Anomaly {
                index: position as u64,
                kind,
            })
        };

        if block.index != position as u64 {
            flag(AnomalyKind::IndexGap);
        }

        let digest = block.compute_hash().ok();
        if digest.as_deref() != Some(block.hash.as_str()) {
            flag(AnomalyKind::HashMismatch);
        }

        let linked = match position.checked_sub(1) {
            None => block.previous_hash == GENESIS_PREVIOUS_HASH,
            Some(prev) => {
                block.previous_hash == blocks[prev].hash
                    || recomputed[prev].as_deref() == Some(block.previous_hash.as_str())
            }
        };
        if !linked {
            flag(AnomalyKind::BrokenLink);
        }

        if !block::meets_difficulty(&block.hash, difficulty) {
            flag(AnomalyKind::DifficultyNotMet);
        }

        if position > 0 {
            let sealed = validators
                .get(&block.validator)
                .map(|key| block::verify_seal(block, key))
                .unwrap_or(false);
            if !sealed {
                flag(AnomalyKind::BadSignature);
            }
        }

        recomputed.push(digest);
    }

    let mut invalid_blocks: Vec<u64> = anomalies.iter().map(|a| a.index).collect();
    invalid_blocks.dedup();

    let merkle_root_valid = match blocks.last() {
        None => true,
        Some(last) => chain_tree(blocks).root_hex() == last.merkle_root,
    };
    if !merkle_root_valid {
        anomalies.push(Anomaly {
            index: blocks.len().saturating_sub(1) as u64,
            kind: AnomalyKind::MerkleRootMismatch,
        });
    }

    let chain_integrity_valid = invalid_blocks.is_empty();
    ValidationReport {
        is_valid: chain_integrity_valid && merkle_root_valid,
        validated_blocks: blocks.len(),
        invalid_blocks,
        merkle_root_valid,
        chain_integrity_valid,
        anomalies,
    }
}

/// A block's membership proof against the current root of its chain
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub block_hash: String,
    pub proof: Vec<String>,
    pub root: String,
}

pub struct VoteLedger<S: LedgerStore> {
    store: Arc<S>,
    audit: Arc<dyn AuditLog>,
    pool: MiningPool,
    difficulty: u32,
    max_nonce_attempts: u64,
    validators: HashMap<String, Arc<Validator>>,
    validator_keys: HashMap<String, VerifyingKey>,
    // Entries live only while an append or genesis for that election is in flight
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: LedgerStore> VoteLedger<S> {
    pub fn new(store: Arc<S>, audit: Arc<dyn AuditLog>, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(VoteLedger {
            store,
            audit,
            pool: MiningPool::new(config.mining_threads, config.max_concurrent_mines)?,
            difficulty: config.difficulty,
            max_nonce_attempts: config.max_nonce_attempts,
            validators: HashMap::new(),
            validator_keys: HashMap::new(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Register a validator this node seals blocks with
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator_keys
            .insert(validator.id.clone(), validator.verifying_key());
        self.validators
            .insert(validator.id.clone(), Arc::new(validator));
        self
    }

    /// Accept blocks sealed by another node's validator key
    pub fn trust_validator(mut self, id: &str, key: VerifyingKey) -> Self {
        self.validator_keys.insert(id.to_owned(), key);
        self
    }

    pub fn validator_keys(&self) -> &HashMap<String, VerifyingKey> {
        &self.validator_keys
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn election_lock(&self, election_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(election_id).or_default().clone()
    }

    /// Drop the election's lock once no task holds or awaits it
    fn release_lock(&self, election_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&election_id)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&election_id);
        }
    }

    /// Search for a nonce on the pool, retrying from fresh random seeds
    async fn mine(&self, election_id: Uuid, index: u64, previous_hash: &str, payload: Vec<u8>) -> Result<Mined> {
        let previous_hash = Arc::new(previous_hash.to_owned());
        let payload = Arc::new(payload);
        let difficulty = self.difficulty;
        let max_attempts = self.max_nonce_attempts;

        for round in 0..MAX_MINING_ROUNDS {
            let start_nonce = if round == 0 { 0 } else { rand::random::<u64>() };
            let (prev, data) = (previous_hash.clone(), payload.clone());

            let mined = self
                .pool
                .spawn(format!("mine {}#{}", election_id, index), move || {
                    block::mine(index, &prev, &data, difficulty, start_nonce, max_attempts)
                })
                .await?;

            match mined {
                Some(mined) => return Ok(mined),
                None => warn!(
                    election = %election_id,
                    index,
                    round,
                    start_nonce,
                    "nonce budget exhausted, reseeding"
                ),
            }
        }

        Err(Error::MiningExhausted(
            max_attempts.saturating_mul(MAX_MINING_ROUNDS as u64),
        ))
    }

    /// Create block 0 for an election. Returns the existing genesis if there is one.
    pub async fn create_genesis(&self, election_id: Uuid) -> Result<Block> {
        let lock = self.election_lock(election_id);
        let result = {
            let _guard = lock.lock().await;
            self.create_genesis_locked(election_id).await
        };
        drop(lock);
        self.release_lock(election_id);
        result
    }

    async fn create_genesis_locked(&self, election_id: Uuid) -> Result<Block> {
        if let Some(genesis) = self.store.blocks(election_id).into_iter().next() {
            return Ok(genesis);
        }

        let data = VotePayload::new(format!("genesis:{}", election_id).into_bytes(), None);
        let mined = self
            .mine(election_id, 0, GENESIS_PREVIOUS_HASH, data.canonical_bytes()?)
            .await?;

        let genesis = Block {
            index: 0,
            election_id,
            data,
            previous_hash: GENESIS_PREVIOUS_HASH.to_owned(),
            merkle_root: hex::encode(block_leaf(&mined.hash)),
            hash: mined.hash,
            nonce: mined.nonce,
            validator: GENESIS_VALIDATOR.to_owned(),
            signature: String::new(),
            timestamp: Utc::now(),
        };
        self.store.insert_block(genesis.clone())?;

        info!(election = %election_id, hash = %genesis.hash, "genesis block created");
        self.audit.record(
            AuditEventType::GenesisCreated,
            election_id,
            format!("genesis {}", genesis.hash),
        );
        Ok(genesis)
    }

    /// Seal one vote into the election's chain.
    ///
    /// Returns the new block and its merkle proof against the block's own root.
    pub async fn append(
        &self,
        election_id: Uuid,
        payload: VotePayload,
        validator_id: &str,
    ) -> Result<(Block, Vec<String>)> {
        let validator = self
            .validators
            .get(validator_id)
            .cloned()
            .ok_or_else(|| Error::UnknownValidator(validator_id.to_owned()))?;

        let lock = self.election_lock(election_id);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(election_id, payload, &validator).await
        };
        drop(lock);
        self.release_lock(election_id);
        result
    }

    async fn append_locked(
        &self,
        election_id: Uuid,
        payload: VotePayload,
        validator: &Validator,
    ) -> Result<(Block, Vec<String>)> {
        let chain = self.store.blocks(election_id);
        let tail = chain.last().ok_or(Error::ChainNotInitialized(election_id))?;
        let index = tail.index + 1;

        let mined = self
            .mine(election_id, index, &tail.hash, payload.canonical_bytes()?)
            .await?;
        debug!(election = %election_id, index, nonce = mined.nonce, attempts = mined.attempts, "nonce found");

        let mut leaves: Vec<Hash> = chain.iter().map(|b| block_leaf(&b.hash)).collect();
        let leaf = block_leaf(&mined.hash);
        leaves.push(leaf);
        let tree = MerkleTree::build(&leaves);

        let block = Block {
            index,
            election_id,
            data: payload,
            previous_hash: tail.hash.clone(),
            signature: validator.seal(index, &mined.hash)?,
            hash: mined.hash,
            nonce: mined.nonce,
            merkle_root: tree.root_hex(),
            validator: validator.id.clone(),
            timestamp: Utc::now(),
        };
        self.store.insert_block(block.clone())?;
        let proof = tree.proof_hex(&leaf)?;

        info!(
            election = %election_id,
            index,
            nonce = block.nonce,
            validator = %validator.id,
            "block sealed"
        );
        self.audit.record(
            AuditEventType::BlockSealed,
            election_id,
            format!("block {} {}", index, block.hash),
        );
        Ok((block, proof))
    }

    pub async fn validate_chain(&self, election_id: Uuid) -> Result<ValidationReport> {
        let blocks = self.store.blocks(election_id);
        if blocks.is_empty() {
            return Err(Error::ChainNotInitialized(election_id));
        }

        let report = validate_blocks(&blocks, self.difficulty, &self.validator_keys);
        if report.is_valid {
            info!(election = %election_id, blocks = report.validated_blocks, "chain valid");
        } else {
            warn!(
                election = %election_id,
                invalid = ?report.invalid_blocks,
                merkle_root_valid = report.merkle_root_valid,
                "chain validation found anomalies"
            );
        }
        self.audit.record(
            AuditEventType::ChainValidated,
            election_id,
            format!(
                "validated {} blocks, valid={}",
                report.validated_blocks, report.is_valid
            ),
        );
        Ok(report)
    }

    /// Inclusion proof for a block against the chain's current root
    pub fn merkle_proof(&self, election_id: Uuid, block_hash: &str) -> Result<InclusionProof> {
        let blocks = self.store.blocks(election_id);
        if blocks.is_empty() {
            return Err(Error::ChainNotInitialized(election_id));
        }
        if !blocks.iter().any(|b| b.hash == block_hash) {
            return Err(Error::LeafNotFound);
        }

        let tree = chain_tree(&blocks);
        Ok(InclusionProof {
            block_hash: block_hash.to_owned(),
            proof: tree.proof_hex(&block_leaf(block_hash))?,
            root: tree.root_hex(),
        })
    }

    pub fn block_by_hash(&self, election_id: Uuid, hash: &str) -> Option<Block> {
        self.store.block_by_hash(election_id, hash)
    }

    pub fn chain(&self, election_id: Uuid) -> Vec<Block> {
        self.store.blocks(election_id)
    }
}
