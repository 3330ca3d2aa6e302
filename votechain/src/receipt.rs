//! Non-coercible vote receipts.
//!
//! A receipt carries a Pedersen commitment to the vote digest whose blinding factor is thrown
//! away at issue time, so not even the voter can open it for a third party. The Schnorr proof
//! binds that commitment to the block it landed in; the merkle proof lets anyone confirm the
//! block is part of the election's chain.

use crate::audit::{AuditEventType, AuditLog};
use crate::block::{Block, VotePayload};
use crate::config::Config;
use crate::merkle;
use crate::schnorr::{self, SchnorrProof};
use crate::store::ReceiptStore;
use crate::util::sha256_hex;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroize;

const TOKEN_DOMAIN: &[u8] = b"votechain/receipt-token/v1";

/// Characters in an anonymous token
const TOKEN_LEN: usize = 16;

// Positions in `ZkProof::public_signals`
const SIGNAL_COMMITMENT: usize = 0;
const SIGNAL_BLOCK_HASH: usize = 1;
const SIGNAL_MERKLE_ROOT: usize = 2;
const SIGNAL_TIMESTAMP: usize = 3;
const SIGNAL_PUBLIC_KEY: usize = 4;
const SIGNAL_COUNT: usize = 5;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ZkProof {
    pub proof: SchnorrProof,
    /// `[commitment, block hash, merkle root, timestamp, proof public key]`
    pub public_signals: Vec<String>,
    pub curve: String,
    pub protocol: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub receipt_id: Uuid,
    pub election_id: Uuid,
    pub block_hash: String,
    pub block_index: u64,
    pub zk_proof: ZkProof,
    pub merkle_proof: Vec<String>,
    pub verification_url: String,
    pub timestamp: DateTime<Utc>,
}

/// Stored form of a receipt
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReceiptRecord {
    #[serde(flatten)]
    pub receipt: VoteReceipt,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

impl ReceiptRecord {
    pub fn new(receipt: VoteReceipt) -> Self {
        ReceiptRecord {
            receipt,
            verified: false,
            verified_at: None,
        }
    }
}

/// The statement proven by a receipt
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofStatement<'a> {
    commitment: &'a str,
    block_hash: &'a str,
    merkle_root: &'a str,
    timestamp: &'a str,
}

impl ProofStatement<'_> {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Serialize)]
struct QrPayload<'a> {
    r: Uuid,
    e: Uuid,
    b: &'a str,
    i: u64,
    u: &'a str,
}

#[derive(Clone)]
pub struct ReceiptService {
    verification_url: String,
    window: Duration,
    audit: Arc<dyn AuditLog>,
}

impl fmt::Debug for ReceiptService {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReceiptService")
            .field("verification_url", &self.verification_url)
            .field("window", &self.window)
            .finish()
    }
}

impl ReceiptService {
    pub fn new(verification_url: &str, window_days: i64, audit: Arc<dyn AuditLog>) -> Result<Self> {
        if window_days < 0 {
            return Err(Error::Config("receipt window cannot be negative".into()));
        }
        let window = Duration::try_days(window_days).ok_or_else(|| {
            Error::Config(format!("receipt window of {} days is out of range", window_days))
        })?;

        Ok(ReceiptService {
            verification_url: verification_url.trim_end_matches('/').to_owned(),
            window,
            audit,
        })
    }

    pub fn from_config(config: &Config, audit: Arc<dyn AuditLog>) -> Result<Self> {
        Self::new(&config.verification_url, config.receipt_window_days, audit)
    }

    /// Issue a receipt for `vote`, sealed in `block` with the given merkle proof
    pub fn generate<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        vote: &VotePayload,
        block: &Block,
        merkle_proof: &[String],
    ) -> Result<VoteReceipt> {
        if &block.data != vote {
            return Err(Error::VoteNotInBlock { index: block.index });
        }

        let value = schnorr::scalar_from_bytes(&vote.digest()?);
        let mut blinding = schnorr::random_scalar(rng);
        let commitment = hex::encode(schnorr::commit(&value, &blinding));
        blinding.zeroize();

        let created_at = Utc::now();
        let timestamp = created_at.to_rfc3339();
        let statement = ProofStatement {
            commitment: &commitment,
            block_hash: &block.hash,
            merkle_root: &block.merkle_root,
            timestamp: &timestamp,
        }
        .to_bytes()?;

        // One-time key: nothing links two receipts of the same voter
        let (secret, public) = schnorr::keypair(rng);
        let proof = schnorr::prove(rng, &statement, &secret);
        drop(secret);

        let receipt_id = Uuid::new_v4();
        let receipt = VoteReceipt {
            receipt_id,
            election_id: block.election_id,
            block_hash: block.hash.clone(),
            block_index: block.index,
            zk_proof: ZkProof {
                proof,
                public_signals: vec![
                    commitment,
                    block.hash.clone(),
                    block.merkle_root.clone(),
                    timestamp,
                    public.to_hex(),
                ],
                curve: schnorr::CURVE.to_owned(),
                protocol: schnorr::PROTOCOL.to_owned(),
                created_at,
            },
            merkle_proof: merkle_proof.to_vec(),
            verification_url: format!("{}/{}", self.verification_url, receipt_id),
            timestamp: created_at,
        };

        info!(election = %block.election_id, index = block.index, receipt = %receipt_id, "receipt issued");
        Ok(receipt)
    }

    /// True iff the receipt matches `block`, its merkle proof reaches `merkle_root`, and its
    /// zero-knowledge proof holds. Never errors: receipts arrive from untrusted clients.
    pub fn verify(&self, receipt: &VoteReceipt, block: &Block, merkle_root: &str) -> bool {
        if receipt.block_hash != block.hash
            || receipt.block_index != block.index
            || receipt.election_id != block.election_id
        {
            debug!(receipt = %receipt.receipt_id, "receipt does not match block");
            return false;
        }

        if !merkle::verify_proof_hex(&block.hash, &receipt.merkle_proof, merkle_root) {
            debug!(receipt = %receipt.receipt_id, "merkle proof rejected");
            return false;
        }

        verify_zk_proof(&receipt.zk_proof, &block.hash)
    }

    /// Verify and record the outcome in `store`
    pub fn check(
        &self,
        receipt: &VoteReceipt,
        block: &Block,
        merkle_root: &str,
        store: &dyn ReceiptStore,
    ) -> Result<bool> {
        let stored = store
            .receipt(receipt.receipt_id)
            .ok_or(Error::ReceiptNotFound(receipt.receipt_id))?;
        if &stored.receipt != receipt {
            return Ok(false);
        }

        let valid = self.verify(receipt, block, merkle_root);
        if valid {
            store.mark_verified(receipt.receipt_id, Utc::now())?;
            self.audit.record(
                AuditEventType::ReceiptVerified,
                receipt.election_id,
                format!("receipt {} block {}", receipt.receipt_id, receipt.block_index),
            );
        }
        Ok(valid)
    }

    pub fn is_expired(&self, receipt: &VoteReceipt) -> bool {
        self.is_expired_at(receipt, Utc::now())
    }

    pub fn is_expired_at(&self, receipt: &VoteReceipt, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(receipt.timestamp) > self.window
    }

    /// Human-readable summary
    pub fn printable(&self, receipt: &VoteReceipt) -> String {
        let mut out = String::new();
        out.push_str("VOTE RECEIPT\n");
        out.push_str(&format!("Receipt:   {}\n", receipt.receipt_id));
        out.push_str(&format!("Election:  {}\n", receipt.election_id));
        out.push_str(&format!("Block:     #{} {}\n", receipt.block_index, receipt.block_hash));
        out.push_str(&format!("Issued:    {}\n", receipt.timestamp.to_rfc3339()));
        // Timestamps come from untrusted receipts and may sit at the edge of the calendar
        let expires = receipt
            .timestamp
            .checked_add_signed(self.window)
            .map_or_else(|| "n/a".to_owned(), |t| t.to_rfc3339());
        out.push_str(&format!("Expires:   {}\n", expires));
        out.push_str(&format!("Token:     {}\n", anonymous_token(receipt)));
        out.push_str(&format!("Verify at: {}\n", receipt.verification_url));
        out
    }

    /// Compact JSON for QR rendering
    pub fn qr_payload(&self, receipt: &VoteReceipt) -> Result<String> {
        Ok(serde_json::to_string(&QrPayload {
            r: receipt.receipt_id,
            e: receipt.election_id,
            b: &receipt.block_hash,
            i: receipt.block_index,
            u: &receipt.verification_url,
        })?)
    }
}

fn verify_zk_proof(zk: &ZkProof, block_hash: &str) -> bool {
    if zk.curve != schnorr::CURVE
        || zk.protocol != schnorr::PROTOCOL
        || zk.public_signals.len() != SIGNAL_COUNT
        || zk.public_signals[SIGNAL_BLOCK_HASH] != block_hash
    {
        return false;
    }

    let public = match schnorr::PublicKey::from_hex(&zk.public_signals[SIGNAL_PUBLIC_KEY]) {
        Some(key) => key,
        None => return false,
    };
    let statement = ProofStatement {
        commitment: &zk.public_signals[SIGNAL_COMMITMENT],
        block_hash: &zk.public_signals[SIGNAL_BLOCK_HASH],
        merkle_root: &zk.public_signals[SIGNAL_MERKLE_ROOT],
        timestamp: &zk.public_signals[SIGNAL_TIMESTAMP],
    };
    match statement.to_bytes() {
        Ok(message) => schnorr::verify(&zk.proof, &public, &message),
        Err(_) => false,
    }
}

/// Short token for support lookups; reveals nothing about the vote
pub fn anonymous_token(receipt: &VoteReceipt) -> String {
    let mut token = sha256_hex(&[
        TOKEN_DOMAIN,
        receipt.receipt_id.as_bytes(),
        &receipt.zk_proof.proof.r,
        &receipt.zk_proof.proof.s,
    ]);
    token.truncate(TOKEN_LEN);
    token
}
