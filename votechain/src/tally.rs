use crate::block::Block;
use crate::secret_share::Share;
use crate::threshold::{self, ThresholdParams};
use crate::Result;
use indexmap::IndexMap;
use rand::{CryptoRng, RngCore};
use rsa::RsaPublicKey;
use std::collections::HashSet;
use tracing::{info, warn};

/// Plaintext of an encrypted vote
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub option: String,
}

impl Ballot {
    pub fn new(option: &str) -> Self {
        Ballot {
            option: option.to_owned(),
        }
    }

    /// Chunked RSA-OAEP encryption of the JSON ballot
    pub fn encrypt<R: RngCore + CryptoRng>(&self, rng: &mut R, public_key: &RsaPublicKey) -> Result<Vec<u8>> {
        let plaintext = serde_json::to_vec(self)?;
        threshold::encrypt_chunked(rng, public_key, &plaintext)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    /// Counted votes
    pub num_votes: usize,

    /// Votes per option id, in first-seen order
    pub totals: IndexMap<String, u64>,

    /// Blocks excluded because their vote was voided. Never subtracted from `totals`.
    pub voided: usize,

    /// Blocks whose vote failed to decrypt or parse
    pub rejected: usize,
}

impl Tally {
    /// Decrypt and count every vote in `blocks` with a single key reconstruction.
    ///
    /// Genesis blocks are skipped; blocks whose hash is in `voided` are counted separately.
    pub fn count(
        params: &ThresholdParams,
        blocks: &[Block],
        shares: &[Share],
        voided: &HashSet<String>,
    ) -> Result<Self> {
        params.check_quorum(shares)?;

        let mut tally = Tally {
            num_votes: 0,
            totals: IndexMap::new(),
            voided: 0,
            rejected: 0,
        };

        let mut ciphertexts: Vec<&[u8]> = Vec::new();
        for block in blocks.iter().filter(|b| !b.is_genesis()) {
            if voided.contains(&block.hash) {
                tally.voided += 1;
            } else {
                ciphertexts.push(&block.data.encrypted_vote);
            }
        }

        for (position, plaintext) in threshold::decrypt_many(&ciphertexts, shares)?
            .into_iter()
            .enumerate()
        {
            let ballot = plaintext.and_then(|p| Ok(serde_json::from_slice::<Ballot>(&p)?));
            match ballot {
                Ok(ballot) => {
                    *tally.totals.entry(ballot.option).or_insert(0) += 1;
                    tally.num_votes += 1;
                }
                Err(e) => {
                    warn!(position, error = %e, "vote rejected during tally");
                    tally.rejected += 1;
                }
            }
        }

        info!(
            key_id = %params.key_id,
            counted = tally.num_votes,
            voided = tally.voided,
            rejected = tally.rejected,
            "tally computed"
        );
        Ok(tally)
    }

    /// Options ordered by descending count, ties in first-seen order
    pub fn ranked(&self) -> Vec<(String, u64)> {
        let mut ranked: Vec<(String, u64)> = self
            .totals
            .iter()
            .map(|(option, count)| (option.clone(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::VotePayload;
    use crate::Error;
    use chrono::Utc;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use uuid::Uuid;

    fn block(index: u64, encrypted_vote: Vec<u8>) -> Block {
        Block {
            index,
            election_id: Uuid::nil(),
            data: VotePayload::new(encrypted_vote, None),
            previous_hash: String::new(),
            hash: format!("h{}", index),
            nonce: 0,
            merkle_root: String::new(),
            validator: String::new(),
            signature: String::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn counts_voided_and_rejected_separately() {
        let mut rng = ChaCha20Rng::seed_from_u64(100);
        let (public_key, shares, params) = threshold::generate(&mut rng, 1024, 3, 2).unwrap();

        let mut blocks = vec![block(0, b"genesis".to_vec())];
        for (i, option) in ["red", "blue", "red", "green", "red", "blue"].iter().enumerate() {
            let ct = Ballot::new(option).encrypt(&mut rng, &public_key).unwrap();
            blocks.push(block(i as u64 + 1, ct));
        }
        blocks.push(block(7, vec![0u8; 128]));

        let voided: HashSet<String> = ["h2".to_string()].into_iter().collect();
        let tally = Tally::count(&params, &blocks, &shares[1..], &voided).unwrap();

        assert_eq!(tally.num_votes, 5);
        assert_eq!(tally.voided, 1);
        assert_eq!(tally.rejected, 1);
        assert_eq!(tally.totals["red"], 3);
        assert_eq!(tally.totals["blue"], 1);
        assert_eq!(tally.totals["green"], 1);
        assert_eq!(tally.ranked()[0], ("red".to_string(), 3));
        // blue was first seen in the voided block, so green ranks ahead on the tie
        assert_eq!(tally.ranked()[1], ("green".to_string(), 1));
    }

    #[test]
    fn needs_quorum() {
        let mut rng = ChaCha20Rng::seed_from_u64(101);
        let (_, shares, params) = threshold::generate(&mut rng, 1024, 3, 2).unwrap();
        assert!(matches!(
            Tally::count(&params, &[], &shares[..1], &HashSet::new()),
            Err(Error::InsufficientShares { .. })
        ));
    }
}
