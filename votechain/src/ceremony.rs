//! Threshold key ceremony.
//!
//! ```text
//! Initiated --start()--> InProgress --ok--> Completed
//!                                   \--err-> Failed
//! ```
//!
//! Usage errors (roster full, incomplete roster, restarting) are rejected without changing
//! state; only a cryptographic failure during generation moves the ceremony to `Failed`.

use crate::audit::{AuditEventType, AuditLog};
use crate::custodian::{Custodian, KeyShare};
use crate::secret_share::Share;
use crate::threshold::{self, ThresholdParams};
use crate::{Error, Result};
use indexmap::IndexMap;
use rand::{CryptoRng, RngCore};
use rsa::RsaPublicKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Size of the throwaway payload used by the threshold self-test
const SELF_TEST_PAYLOAD_LEN: usize = 32;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyState {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for CeremonyState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CeremonyState::Initiated => "initiated",
            CeremonyState::InProgress => "in_progress",
            CeremonyState::Completed => "completed",
            CeremonyState::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct KeyCeremony {
    pub id: Uuid,
    pub election_id: Uuid,
    total_custodians: u8,
    threshold: u8,
    key_bits: usize,
    state: CeremonyState,

    // Registration order decides share indexes
    custodians: IndexMap<Uuid, Custodian>,
    shares: HashMap<Uuid, Share>,
    commitments: HashMap<Uuid, String>,
    params: Option<ThresholdParams>,
    private_data_destroyed: bool,
    audit: Arc<dyn AuditLog>,
}

impl KeyCeremony {
    pub fn new(
        election_id: Uuid,
        total_custodians: u8,
        threshold: u8,
        key_bits: usize,
        audit: Arc<dyn AuditLog>,
    ) -> Result<Self> {
        if threshold < 2 || threshold > total_custodians {
            return Err(Error::InvalidThreshold {
                threshold: threshold as usize,
                total: total_custodians as usize,
            });
        }

        Ok(KeyCeremony {
            id: Uuid::new_v4(),
            election_id,
            total_custodians,
            threshold,
            key_bits,
            state: CeremonyState::Initiated,
            custodians: IndexMap::new(),
            shares: HashMap::new(),
            commitments: HashMap::new(),
            params: None,
            private_data_destroyed: false,
            audit,
        })
    }

    pub fn state(&self) -> CeremonyState {
        self.state
    }

    pub fn custodians(&self) -> impl Iterator<Item = &Custodian> {
        self.custodians.values()
    }

    /// Public parameters, available once the ceremony has completed
    pub fn params(&self) -> Option<&ThresholdParams> {
        self.params.as_ref()
    }

    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        self.params.as_ref().map(|p| &p.public_key)
    }

    pub fn register_custodian(&mut self, custodian: Custodian) -> Result<()> {
        if self.state != CeremonyState::Initiated {
            return Err(Error::CeremonyAlreadyStarted);
        }
        if self.custodians.len() >= self.total_custodians as usize {
            return Err(Error::RosterFull);
        }
        if self.custodians.contains_key(&custodian.id) {
            return Err(Error::DuplicateCustodian(custodian.id));
        }

        info!(
            ceremony = %self.id,
            custodian = %custodian.id,
            registered = self.custodians.len() + 1,
            total = self.total_custodians,
            "custodian registered"
        );
        self.custodians.insert(custodian.id, custodian);
        Ok(())
    }

    /// Generate the key and assign one share and commitment per custodian.
    pub fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<&ThresholdParams> {
        if self.state != CeremonyState::Initiated {
            return Err(Error::CeremonyAlreadyStarted);
        }
        if self.custodians.len() != self.total_custodians as usize {
            return Err(Error::IncompleteRoster {
                required: self.total_custodians as usize,
                registered: self.custodians.len(),
            });
        }

        self.state = CeremonyState::InProgress;
        info!(ceremony = %self.id, election = %self.election_id, "key ceremony in progress");
        self.audit.record(
            AuditEventType::CeremonyStarted,
            self.election_id,
            format!(
                "ceremony {}: {} of {} custodians, {} bit key",
                self.id, self.threshold, self.total_custodians, self.key_bits
            ),
        );

        let (_, shares, params) =
            match threshold::generate(rng, self.key_bits, self.total_custodians, self.threshold) {
                Ok(generated) => generated,
                Err(e) => {
                    self.state = CeremonyState::Failed;
                    error!(ceremony = %self.id, error = %e, "key ceremony failed");
                    self.audit.record(
                        AuditEventType::CeremonyFailed,
                        self.election_id,
                        format!("ceremony {}: {}", self.id, e.public_message()),
                    );
                    return Err(e);
                }
            };

        for (custodian_id, share) in self.custodians.keys().zip(shares) {
            self.commitments
                .insert(*custodian_id, threshold::commitment(&share));
            self.shares.insert(*custodian_id, share);
        }

        self.state = CeremonyState::Completed;
        info!(ceremony = %self.id, key_id = %params.key_id, "key ceremony completed");
        self.audit.record(
            AuditEventType::CeremonyCompleted,
            self.election_id,
            format!("ceremony {}: key {}", self.id, params.key_id),
        );

        Ok(self.params.insert(params))
    }

    fn require_completed(&self) -> Result<()> {
        if self.state != CeremonyState::Completed {
            return Err(Error::CeremonyNotCompleted);
        }
        Ok(())
    }

    fn require_private_data(&self) -> Result<()> {
        self.require_completed()?;
        if self.private_data_destroyed {
            return Err(Error::PrivateDataDestroyed);
        }
        Ok(())
    }

    /// The published commitment for a custodian's share
    pub fn commitment(&self, custodian_id: Uuid) -> Option<&str> {
        self.commitments.get(&custodian_id).map(String::as_str)
    }

    /// Check a share presented by a custodian against its stored commitment
    pub fn verify_share(&self, custodian_id: Uuid, share: &Share) -> bool {
        match self.commitments.get(&custodian_id) {
            Some(commitment) => threshold::verify_commitment(share, commitment),
            None => false,
        }
    }

    /// The in-memory share held for a custodian, until private data is destroyed
    pub fn share_for(&self, custodian_id: Uuid) -> Result<&Share> {
        self.require_private_data()?;
        self.shares
            .get(&custodian_id)
            .ok_or(Error::UnknownCustodian(custodian_id))
    }

    /// Operational self-test: reconstruct from `shares` and round-trip a throwaway payload.
    pub fn verify_threshold<R: RngCore + CryptoRng>(&self, rng: &mut R, shares: &[Share]) -> Result<bool> {
        self.require_completed()?;
        let params = self.params.as_ref().ok_or(Error::CeremonyNotCompleted)?;
        params.check_quorum(shares)?;

        let mut payload = [0u8; SELF_TEST_PAYLOAD_LEN];
        rng.fill_bytes(&mut payload);

        let ciphertext = threshold::encrypt(rng, &params.public_key, &payload)?;
        let ok = match threshold::decrypt(&ciphertext, &shares[..params.threshold as usize]) {
            Ok(decrypted) => decrypted == payload,
            Err(Error::DecryptionFailed) => false,
            Err(e) => return Err(e),
        };

        if !ok {
            warn!(ceremony = %self.id, "threshold self-test failed");
        }
        Ok(ok)
    }

    /// Self-test using the ceremony's own shares, taking the first `threshold` custodians
    pub fn self_test<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<bool> {
        self.require_private_data()?;
        let quorum: Vec<Share> = self
            .custodians
            .keys()
            .filter_map(|id| self.shares.get(id).cloned())
            .take(self.threshold as usize)
            .collect();
        self.verify_threshold(rng, &quorum)
    }

    /// Build the persisted, per-custodian encrypted share records
    pub fn key_shares<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<Vec<KeyShare>> {
        self.require_private_data()?;

        let mut records = Vec::with_capacity(self.custodians.len());
        for custodian in self.custodians.values() {
            let share = self
                .shares
                .get(&custodian.id)
                .ok_or(Error::UnknownCustodian(custodian.id))?;
            records.push(KeyShare::seal(rng, self.election_id, custodian, share)?);
        }

        self.audit.record(
            AuditEventType::SharesDistributed,
            self.election_id,
            format!("ceremony {}: sealed {} shares", self.id, records.len()),
        );
        Ok(records)
    }

    /// Drop every in-memory share once distribution is confirmed; commitments are kept.
    pub fn destroy_private_data(&mut self) {
        // Share zeroizes itself on drop
        self.shares.clear();
        self.private_data_destroyed = true;
        info!(ceremony = %self.id, "ceremony private data destroyed");
        self.audit.record(
            AuditEventType::PrivateDataDestroyed,
            self.election_id,
            format!("ceremony {}", self.id),
        );
    }
}

impl fmt::Debug for KeyCeremony {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyCeremony")
            .field("id", &self.id)
            .field("election_id", &self.election_id)
            .field("state", &self.state)
            .field("custodians", &self.custodians.len())
            .field("threshold", &self.threshold)
            .finish()
    }
}
