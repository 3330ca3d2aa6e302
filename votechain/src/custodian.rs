use crate::ecies;
use crate::secret_share::Share;
use crate::serde_hex::{hex_bytes, x25519_public_key_hex};
use crate::threshold;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rand::{CryptoRng, RngCore};
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

/// A custodian safeguards one share of an election's decryption key.
///
/// Most elections will have a handful of custodians (between 3 and 30), with a quorum set to
/// about 2/3 of them. Any quorum of custodians may reconstruct the key at tally time.
///
/// The custodian generates its own transport keypair; only the public half is registered.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Custodian {
    pub id: Uuid,
    pub name: String,

    #[serde(with = "x25519_public_key_hex")]
    pub public_key: PublicKey,
}

impl Custodian {
    /// Create a new custodian together with its transport secret
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R, name: &str) -> (Self, StaticSecret) {
        let (secret, public_key) = ecies::generate_keypair(rng);

        let custodian = Custodian {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            public_key,
        };
        (custodian, secret)
    }
}

/// Persisted form of a custodian's share.
///
/// The share itself is only ever stored encrypted to the custodian's transport key.
/// Records are never updated except for the distribution flag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeyShare {
    pub share_index: u8,
    pub custodian_id: Uuid,
    #[serde(with = "hex_bytes")]
    pub encrypted_share: Vec<u8>,
    pub public_commitment: String,
    pub election_id: Uuid,
    pub distributed: bool,
    pub distributed_at: Option<DateTime<Utc>>,
}

impl KeyShare {
    /// Seal `share` for `custodian`
    pub fn seal<R: RngCore + CryptoRng>(
        rng: &mut R,
        election_id: Uuid,
        custodian: &Custodian,
        share: &Share,
    ) -> Result<Self> {
        let encrypted_share = ecies::encrypt(rng, &custodian.public_key, &share.to_bytes())?;

        Ok(KeyShare {
            share_index: share.x,
            custodian_id: custodian.id,
            encrypted_share,
            public_commitment: threshold::commitment(share),
            election_id,
            distributed: false,
            distributed_at: None,
        })
    }

    /// Recover the share with the custodian's transport secret.
    ///
    /// Fails if the decrypted share does not match the published commitment.
    pub fn open(&self, secret: &StaticSecret) -> Result<Share> {
        let bytes = ecies::decrypt(secret, &self.encrypted_share)?;
        let share = Share::from_bytes(&bytes)?;

        if share.x != self.share_index || !threshold::verify_commitment(&share, &self.public_commitment)
        {
            return Err(Error::DecryptionFailed);
        }
        Ok(share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret_share;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn seal_and_open() {
        let mut rng = ChaCha20Rng::seed_from_u64(40);
        let (alice, alice_secret) = Custodian::new(&mut rng, "alice");
        let (_bob, bob_secret) = Custodian::new(&mut rng, "bob");

        let shares = secret_share::split(&mut rng, b"election key", 3, 2).unwrap();
        let election_id = Uuid::new_v4();
        let record = KeyShare::seal(&mut rng, election_id, &alice, &shares[0]).unwrap();

        assert_eq!(record.share_index, 1);
        assert_eq!(record.custodian_id, alice.id);
        assert!(!record.distributed);
        assert!(record.distributed_at.is_none());

        assert_eq!(record.open(&alice_secret).unwrap(), shares[0]);
        assert!(matches!(
            record.open(&bob_secret),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn open_checks_commitment() {
        let mut rng = ChaCha20Rng::seed_from_u64(41);
        let (alice, alice_secret) = Custodian::new(&mut rng, "alice");
        let shares = secret_share::split(&mut rng, b"election key", 3, 2).unwrap();

        let mut record = KeyShare::seal(&mut rng, Uuid::new_v4(), &alice, &shares[1]).unwrap();
        record.public_commitment = threshold::commitment(&shares[2]);
        assert!(record.open(&alice_secret).is_err());
    }

    #[test]
    fn custodian_serializes_public_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let (carol, _) = Custodian::new(&mut rng, "carol");
        let json = serde_json::to_string(&carol).unwrap();
        assert!(json.contains(&hex::encode(carol.public_key.as_bytes())));
        let back: Custodian = serde_json::from_str(&json).unwrap();
        assert_eq!(back, carol);
    }
}
