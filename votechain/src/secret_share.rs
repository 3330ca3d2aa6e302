//! k-of-n Shamir secret sharing over GF(256)

use crate::serde_hex::hex_bytes;
use crate::{Error, Result};
use rand::{CryptoRng, RngCore};
use sharks::Sharks;
use std::collections::HashSet;
use std::convert::TryFrom;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// One point on the sharing polynomial.
///
/// `x` is the share index (1..=n), `y` holds one field element per secret byte.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    pub x: u8,
    #[serde(with = "hex_bytes")]
    pub y: Vec<u8>,
}

impl Share {
    /// Encode as `x || y`
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Vec::with_capacity(1 + self.y.len());
        bytes.push(self.x);
        bytes.extend_from_slice(&self.y);
        Zeroizing::new(bytes)
    }

    /// Decode from `x || y`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::CombineError("share encoding too short".into()));
        }
        if bytes[0] == 0 {
            return Err(Error::CombineError("share index cannot be zero".into()));
        }
        Ok(Share {
            x: bytes[0],
            y: bytes[1..].to_vec(),
        })
    }
}

// Never print share payloads
impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Share")
            .field("x", &self.x)
            .field("len", &self.y.len())
            .finish()
    }
}

/// Split `secret` into `n` shares, any `k` of which reconstruct it.
pub fn split<R: RngCore + CryptoRng>(
    rng: &mut R,
    secret: &[u8],
    n: u8,
    k: u8,
) -> Result<Vec<Share>> {
    if k < 2 || k > n {
        return Err(Error::InvalidThreshold {
            threshold: k as usize,
            total: n as usize,
        });
    }
    if secret.is_empty() {
        return Err(Error::EmptySecret);
    }

    let sharks = Sharks(k);
    let dealer = sharks.dealer_rng(secret, rng);

    let mut shares = Vec::with_capacity(n as usize);
    for s in dealer.take(n as usize) {
        let bytes = Zeroizing::new(Vec::from(&s));
        shares.push(Share::from_bytes(&bytes)?);
    }

    Ok(shares)
}

/// Interpolate the secret from the given shares.
///
/// Fewer shares than the dealing threshold yield a value that is not the secret; no
/// error is raised for that case; callers verify the result by other means.
pub fn combine(shares: &[Share]) -> Result<Zeroizing<Vec<u8>>> {
    if shares.len() < 2 {
        return Err(Error::CombineError("at least two shares are required".into()));
    }

    let len = shares[0].y.len();
    let mut seen = HashSet::with_capacity(shares.len());
    let mut decoded = Vec::with_capacity(shares.len());
    for share in shares {
        if share.x == 0 {
            return Err(Error::CombineError("share index cannot be zero".into()));
        }
        if share.y.is_empty() || share.y.len() != len {
            return Err(Error::CombineError("share payload lengths differ".into()));
        }
        if !seen.insert(share.x) {
            return Err(Error::CombineError(format!("duplicate share index {}", share.x)));
        }
        let bytes = share.to_bytes();
        let share = sharks::Share::try_from(bytes.as_slice())
            .map_err(|e| Error::CombineError(e.to_string()))?;
        decoded.push(share);
    }

    let secret = Sharks(2)
        .recover(decoded.iter())
        .map_err(|e| Error::CombineError(e.to_string()))?;

    Ok(Zeroizing::new(secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn any_k_subset_recovers() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let secret = b"the quick brown fox jumps over the lazy dog".to_vec();

        for (n, k) in [(2u8, 2u8), (3, 2), (5, 3), (7, 7), (255, 200)] {
            let shares = split(&mut rng, &secret, n, k).unwrap();
            assert_eq!(shares.len(), n as usize);
            let xs: Vec<u8> = shares.iter().map(|s| s.x).collect();
            assert_eq!(xs, (1..=n).collect::<Vec<u8>>());

            // first k, last k
            assert_eq!(*combine(&shares[..k as usize]).unwrap(), secret);
            assert_eq!(*combine(&shares[(n - k) as usize..]).unwrap(), secret);
        }
    }

    #[test]
    fn every_three_of_five() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let secret = [42u8; 32];
        let shares = split(&mut rng, &secret, 5, 3).unwrap();

        for a in 0..5 {
            for b in (a + 1)..5 {
                for c in (b + 1)..5 {
                    let subset = vec![shares[a].clone(), shares[b].clone(), shares[c].clone()];
                    assert_eq!(*combine(&subset).unwrap(), secret);
                }
            }
        }
    }

    #[test]
    fn below_threshold_is_wrong() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let secret = [9u8; 32];
        let shares = split(&mut rng, &secret, 5, 3).unwrap();

        let recovered = combine(&shares[..2]).unwrap();
        assert_ne!(*recovered, secret);
    }

    #[test]
    fn invalid_threshold() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        assert!(matches!(
            split(&mut rng, b"secret", 3, 1),
            Err(Error::InvalidThreshold { .. })
        ));
        assert!(matches!(
            split(&mut rng, b"secret", 3, 4),
            Err(Error::InvalidThreshold { .. })
        ));
        assert!(matches!(split(&mut rng, b"", 3, 2), Err(Error::EmptySecret)));
    }

    #[test]
    fn malformed_shares() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let shares = split(&mut rng, b"secret", 3, 2).unwrap();

        assert!(matches!(combine(&shares[..1]), Err(Error::CombineError(_))));

        let dup = vec![shares[0].clone(), shares[0].clone()];
        assert!(matches!(combine(&dup), Err(Error::CombineError(_))));

        let mut short = shares[1].clone();
        short.y.pop();
        let mixed = vec![shares[0].clone(), short];
        assert!(matches!(combine(&mixed), Err(Error::CombineError(_))));

        assert!(Share::from_bytes(&[1]).is_err());
        assert!(Share::from_bytes(&[0, 1, 2]).is_err());
    }

    #[test]
    fn debug_redacts_payload() {
        let share = Share {
            x: 1,
            y: vec![0xde, 0xad],
        };
        let printed = format!("{:?}", share);
        assert!(!printed.contains("222"));
        assert!(printed.contains("len: 2"));
    }
}
