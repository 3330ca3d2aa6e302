use crate::serde_hex::hex_bytes;
use crate::util::Hash;
use crate::Result;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// `previous_hash` of every genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Validator id recorded on genesis blocks, which are never signed
pub const GENESIS_VALIDATOR: &str = "genesis";

/// The vote data carried by a block. This is the only part of the vote that is hashed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct VotePayload {
    /// Chunked RSA-OAEP ciphertext under the election's public key
    #[serde(with = "hex_bytes")]
    pub encrypted_vote: Vec<u8>,

    /// Signature supplied by the voting collaborator, opaque to the ledger
    pub vote_signature: Option<String>,
}

impl VotePayload {
    pub fn new(encrypted_vote: Vec<u8>, vote_signature: Option<String>) -> Self {
        VotePayload {
            encrypted_vote,
            vote_signature,
        }
    }

    /// Canonical JSON used in the block hash
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Digest of the payload, the value a receipt commits to
    pub fn digest(&self) -> Result<Hash> {
        Ok(crate::util::sha256(&[&self.canonical_bytes()?]))
    }
}

/// One sealed entry of an election's ledger
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub election_id: Uuid,
    pub data: VotePayload,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,

    /// Merkle root over every block hash up to and including this one
    pub merkle_root: String,
    pub validator: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Recompute the hash from the block's declared fields
    pub fn compute_hash(&self) -> Result<String> {
        let payload = self.data.canonical_bytes()?;
        Ok(hash_block(self.index, &self.previous_hash, &payload, self.nonce))
    }
}

/// Hasher primed with everything but the nonce
fn prefix_hasher(index: u64, previous_hash: &str, payload: &[u8]) -> Sha256 {
    Sha256::new()
        .chain_update(index.to_string())
        .chain_update(previous_hash)
        .chain_update(payload)
}

/// `sha256_hex(index || previous_hash || payload || nonce)`, decimal index and nonce
pub fn hash_block(index: u64, previous_hash: &str, payload: &[u8], nonce: u64) -> String {
    let digest = prefix_hasher(index, previous_hash, payload)
        .chain_update(nonce.to_string())
        .finalize();
    hex::encode(digest)
}

/// Whether a raw digest starts with `difficulty` zero nibbles
fn digest_meets_difficulty(digest: &[u8], difficulty: u32) -> bool {
    (0..difficulty as usize).all(|i| match digest.get(i / 2) {
        Some(byte) if i % 2 == 0 => byte >> 4 == 0,
        Some(byte) => byte & 0x0f == 0,
        None => false,
    })
}

pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    hash.len() >= difficulty as usize && hash.bytes().take(difficulty as usize).all(|c| c == b'0')
}

/// Result of a successful nonce search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mined {
    pub nonce: u64,
    pub hash: String,
    pub attempts: u64,
}

/// Search nonces from `start_nonce` until the hash meets `difficulty`.
///
/// Returns None once `max_attempts` nonces have been tried.
pub fn mine(
    index: u64,
    previous_hash: &str,
    payload: &[u8],
    difficulty: u32,
    start_nonce: u64,
    max_attempts: u64,
) -> Option<Mined> {
    let prefix = prefix_hasher(index, previous_hash, payload);

    for attempt in 0..max_attempts {
        let nonce = start_nonce.wrapping_add(attempt);
        let digest = prefix.clone().chain_update(nonce.to_string()).finalize();
        if digest_meets_difficulty(&digest, difficulty) {
            return Some(Mined {
                nonce,
                hash: hex::encode(digest),
                attempts: attempt + 1,
            });
        }
    }
    None
}

/// Seals blocks on behalf of the ledger operator
pub struct Validator {
    pub id: String,
    signing_key: SigningKey,
}

/// The signed package: CBOR `(index, hash, validator)`
fn seal_package(index: u64, hash: &str, validator: &str) -> Result<Vec<u8>> {
    Ok(serde_cbor::to_vec(&(index, hash, validator))?)
}

impl Validator {
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R, id: &str) -> Self {
        Validator {
            id: id.to_owned(),
            signing_key: SigningKey::generate(rng),
        }
    }

    pub fn from_signing_key(id: &str, signing_key: SigningKey) -> Self {
        Validator {
            id: id.to_owned(),
            signing_key,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex ed25519 signature over `(index, hash, validator id)`
    pub fn seal(&self, index: u64, hash: &str) -> Result<String> {
        let package = seal_package(index, hash, &self.id)?;
        Ok(hex::encode(self.signing_key.sign(&package).to_bytes()))
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Validator").field("id", &self.id).finish()
    }
}

/// Check a block's seal against a validator key; malformed signatures never verify
pub fn verify_seal(block: &Block, key: &VerifyingKey) -> bool {
    let package = match seal_package(block.index, &block.hash, &block.validator) {
        Ok(package) => package,
        Err(_) => return false,
    };
    let signature = match hex::decode(&block.signature) {
        Ok(bytes) => match Signature::from_slice(&bytes) {
            Ok(sig) => sig,
            Err(_) => return false,
        },
        Err(_) => return false,
    };
    key.verify(&package, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn hash_layout() {
        let payload = VotePayload::new(vec![1, 2, 3], None).canonical_bytes().unwrap();
        assert_eq!(payload, br#"{"encrypted_vote":"010203","vote_signature":null}"#.to_vec());

        let mut expected = b"4abc".to_vec();
        expected.extend(&payload);
        expected.extend(b"99");
        assert_eq!(
            hash_block(4, "abc", &payload, 99),
            crate::util::sha256_hex(&[&expected])
        );
    }

    #[test]
    fn mining_meets_difficulty() {
        let payload = VotePayload::new(vec![9; 16], Some("sig".into()))
            .canonical_bytes()
            .unwrap();
        let mined = mine(1, "prev", &payload, 2, 0, 1 << 20).unwrap();

        assert!(meets_difficulty(&mined.hash, 2));
        assert_eq!(mined.hash, hash_block(1, "prev", &payload, mined.nonce));
        assert_eq!(mined.attempts, mined.nonce + 1);
    }

    #[test]
    fn mining_budget() {
        // Three attempts will practically never find six zero nibbles
        assert_eq!(mine(1, "prev", b"{}", 6, 0, 3), None);
        assert!(mine(1, "prev", b"{}", 0, 42, 1).is_some());
    }

    #[test]
    fn difficulty_prefix() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(meets_difficulty("abcd", 0));
        assert!(!meets_difficulty("0", 2));

        assert!(digest_meets_difficulty(&[0x00, 0x0f], 3));
        assert!(!digest_meets_difficulty(&[0x00, 0x1f], 3));
        assert!(!digest_meets_difficulty(&[0x00], 3));
    }

    #[test]
    fn seal_and_verify() {
        let mut rng = ChaCha20Rng::seed_from_u64(70);
        let validator = Validator::new(&mut rng, "node-1");
        let other = Validator::new(&mut rng, "node-2");

        let mut block = Block {
            index: 3,
            election_id: Uuid::new_v4(),
            data: VotePayload::default(),
            previous_hash: "aa".into(),
            hash: "00ff".into(),
            nonce: 0,
            merkle_root: String::new(),
            validator: validator.id.clone(),
            signature: String::new(),
            timestamp: Utc::now(),
        };
        block.signature = validator.seal(block.index, &block.hash).unwrap();

        assert!(verify_seal(&block, &validator.verifying_key()));
        assert!(!verify_seal(&block, &other.verifying_key()));

        let mut moved = block.clone();
        moved.index = 4;
        assert!(!verify_seal(&moved, &validator.verifying_key()));

        let mut garbled = block.clone();
        garbled.signature = "not hex".into();
        assert!(!verify_seal(&garbled, &validator.verifying_key()));
        assert!(!format!("{:?}", validator).contains("signing_key"));
    }
}
