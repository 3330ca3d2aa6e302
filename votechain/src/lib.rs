#[macro_use]
extern crate serde;

pub mod audit;
pub mod block;
pub mod ceremony;
pub mod config;
pub mod custodian;
pub mod ecies;
mod error;
pub mod ledger;
pub mod merkle;
pub mod pool;
pub mod receipt;
pub mod schnorr;
pub mod secret_share;
mod serde_hex;
pub mod store;
pub mod tally;
pub mod threshold;
mod util;

pub use audit::{AuditEventType, AuditLog, AuditRecord, MemAuditLog};
pub use block::{Block, Validator, VotePayload};
pub use ceremony::{CeremonyState, KeyCeremony};
pub use config::Config;
pub use custodian::{Custodian, KeyShare};
pub use error::*;
pub use ledger::{Anomaly, AnomalyKind, InclusionProof, ValidationReport, VoteLedger};
pub use merkle::MerkleTree;
pub use pool::MiningPool;
pub use receipt::{ReceiptRecord, ReceiptService, VoteReceipt, ZkProof};
pub use schnorr::SchnorrProof;
pub use secret_share::Share;
pub use store::{KeyShareStore, LedgerStore, MemStore, ReceiptStore};
pub use tally::{Ballot, Tally};
pub use threshold::ThresholdParams;
pub use util::{decode_hash, sha256, sha256_hex, Hash};

#[cfg(test)]
mod tests;
