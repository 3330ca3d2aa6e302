use crate::block::Block;
use crate::custodian::KeyShare;
use crate::receipt::{ReceiptRecord, VoteReceipt};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;
use uuid::Uuid;

/// Append-only storage for election ledgers
pub trait LedgerStore: Send + Sync {
    /// The full chain, genesis first
    fn blocks(&self, election_id: Uuid) -> Vec<Block>;

    fn tail(&self, election_id: Uuid) -> Option<Block>;

    fn block_by_hash(&self, election_id: Uuid, hash: &str) -> Option<Block>;

    /// Insert the exact successor of the current tail (or a genesis block into an empty chain)
    fn insert_block(&self, block: Block) -> Result<()>;

    fn update_block(&self, _block: Block) -> Result<()> {
        Err(Error::Forbidden("immutable"))
    }

    fn delete_block(&self, _election_id: Uuid, _index: u64) -> Result<()> {
        Err(Error::Forbidden("immutable"))
    }
}

/// Persisted custodian shares. Only the distribution flag may change.
pub trait KeyShareStore: Send + Sync {
    fn insert_key_share(&self, share: KeyShare) -> Result<()>;

    fn shares_for(&self, election_id: Uuid) -> Vec<KeyShare>;

    fn mark_distributed(&self, election_id: Uuid, custodian_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    fn delete_key_share(&self, _election_id: Uuid, _custodian_id: Uuid) -> Result<()> {
        Err(Error::Forbidden("immutable"))
    }
}

/// Issued receipts. Only the verification marker may change.
pub trait ReceiptStore: Send + Sync {
    fn insert_receipt(&self, receipt: VoteReceipt) -> Result<()>;

    fn receipt(&self, receipt_id: Uuid) -> Option<ReceiptRecord>;

    fn mark_verified(&self, receipt_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    fn update_receipt(&self, _receipt: VoteReceipt) -> Result<()> {
        Err(Error::Forbidden("immutable"))
    }
}

/// A simple store that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemStore {
    ledgers: RwLock<BTreeMap<Uuid, Vec<Block>>>,
    key_shares: RwLock<BTreeMap<(Uuid, Uuid), KeyShare>>,
    receipts: RwLock<BTreeMap<Uuid, ReceiptRecord>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored block in place, bypassing immutability. Test-only.
    #[cfg(test)]
    pub(crate) fn tamper(&self, election_id: Uuid, index: u64, f: impl FnOnce(&mut Block)) {
        let mut ledgers = write(&self.ledgers);
        if let Some(block) = ledgers
            .get_mut(&election_id)
            .and_then(|chain| chain.get_mut(index as usize))
        {
            f(block);
        }
    }
}

impl LedgerStore for MemStore {
    fn blocks(&self, election_id: Uuid) -> Vec<Block> {
        read(&self.ledgers)
            .get(&election_id)
            .cloned()
            .unwrap_or_default()
    }

    fn tail(&self, election_id: Uuid) -> Option<Block> {
        read(&self.ledgers)
            .get(&election_id)
            .and_then(|chain| chain.last().cloned())
    }

    fn block_by_hash(&self, election_id: Uuid, hash: &str) -> Option<Block> {
        read(&self.ledgers)
            .get(&election_id)
            .and_then(|chain| chain.iter().find(|b| b.hash == hash).cloned())
    }

    fn insert_block(&self, block: Block) -> Result<()> {
        let mut ledgers = write(&self.ledgers);

        // Block hashes are unique across every ledger
        if ledgers
            .values()
            .any(|chain| chain.iter().any(|b| b.hash == block.hash))
        {
            warn!(election = %block.election_id, index = block.index, "duplicate block hash rejected");
            return Err(Error::ChainConflict { index: block.index });
        }

        let chain = ledgers.entry(block.election_id).or_default();
        let extends_tail = match chain.last() {
            None => block.index == 0,
            Some(tail) => tail.index + 1 == block.index && tail.hash == block.previous_hash,
        };
        if !extends_tail {
            return Err(Error::ChainConflict { index: block.index });
        }

        chain.push(block);
        Ok(())
    }
}

impl KeyShareStore for MemStore {
    fn insert_key_share(&self, share: KeyShare) -> Result<()> {
        let mut shares = write(&self.key_shares);
        let key = (share.election_id, share.custodian_id);
        let index_taken = shares
            .values()
            .any(|s| s.election_id == share.election_id && s.share_index == share.share_index);
        if shares.contains_key(&key) || index_taken {
            return Err(Error::Forbidden("immutable"));
        }
        shares.insert(key, share);
        Ok(())
    }

    fn shares_for(&self, election_id: Uuid) -> Vec<KeyShare> {
        let mut shares: Vec<KeyShare> = read(&self.key_shares)
            .values()
            .filter(|s| s.election_id == election_id)
            .cloned()
            .collect();
        shares.sort_by_key(|s| s.share_index);
        shares
    }

    fn mark_distributed(&self, election_id: Uuid, custodian_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut shares = write(&self.key_shares);
        let share = shares
            .get_mut(&(election_id, custodian_id))
            .ok_or(Error::UnknownCustodian(custodian_id))?;
        if share.distributed {
            return Err(Error::Forbidden("immutable"));
        }
        share.distributed = true;
        share.distributed_at = Some(at);
        Ok(())
    }
}

impl ReceiptStore for MemStore {
    fn insert_receipt(&self, receipt: VoteReceipt) -> Result<()> {
        let mut receipts = write(&self.receipts);
        if receipts.contains_key(&receipt.receipt_id) {
            return Err(Error::Forbidden("immutable"));
        }
        receipts.insert(receipt.receipt_id, ReceiptRecord::new(receipt));
        Ok(())
    }

    fn receipt(&self, receipt_id: Uuid) -> Option<ReceiptRecord> {
        read(&self.receipts).get(&receipt_id).cloned()
    }

    fn mark_verified(&self, receipt_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut receipts = write(&self.receipts);
        let record = receipts
            .get_mut(&receipt_id)
            .ok_or(Error::ReceiptNotFound(receipt_id))?;
        record.verified = true;
        record.verified_at = Some(at);
        Ok(())
    }
}
