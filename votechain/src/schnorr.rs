//! Schnorr proofs of knowledge and Pedersen commitments over ristretto255.
//!
//! Proofs are Fiat-Shamir Schnorr signatures: `R = kG`, `e = H(R || P || m)`, `s = k + e*x`.
//! A verifier checks both the challenge and `sG == R + eP`.

use crate::serde_hex::hex_32;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const CURVE: &str = "ristretto255";
pub const PROTOCOL: &str = "schnorr";

const CHALLENGE_DOMAIN: &[u8] = b"votechain/schnorr/v1";
const PEDERSEN_H_DOMAIN: &[u8] = b"votechain/pedersen/h/v1";

/// Second Pedersen generator, with no known discrete log relative to the basepoint
pub fn pedersen_h() -> RistrettoPoint {
    RistrettoPoint::hash_from_bytes::<Sha512>(PEDERSEN_H_DOMAIN)
}

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Scalar);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(RistrettoPoint);

impl PublicKey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Option<Self> {
        CompressedRistretto(bytes).decompress().map(PublicKey)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_bytes(bytes.as_slice().try_into().ok()?)
    }
}

impl SecretKey {
    pub fn public_key(&self) -> PublicKey {
        PublicKey(RISTRETTO_BASEPOINT_POINT * self.0)
    }
}

pub fn keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (SecretKey, PublicKey) {
    let secret = SecretKey(Scalar::random(rng));
    let public = secret.public_key();
    (secret, public)
}

/// Map arbitrary bytes (e.g. a vote digest) to a scalar
pub fn scalar_from_bytes(bytes: &[u8]) -> Scalar {
    Scalar::hash_from_bytes::<Sha512>(bytes)
}

pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    Scalar::random(rng)
}

/// Pedersen commitment `vG + rH`, compressed
pub fn commit(value: &Scalar, randomness: &Scalar) -> [u8; 32] {
    (RISTRETTO_BASEPOINT_POINT * value + pedersen_h() * randomness)
        .compress()
        .to_bytes()
}

/// Check an opening of a Pedersen commitment
pub fn open(commitment: &[u8; 32], value: &Scalar, randomness: &Scalar) -> bool {
    &commit(value, randomness) == commitment
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SchnorrProof {
    #[serde(with = "hex_32")]
    pub r: [u8; 32],
    #[serde(with = "hex_32")]
    pub s: [u8; 32],
    #[serde(with = "hex_32")]
    pub e: [u8; 32],
}

fn challenge(r: &CompressedRistretto, public: &PublicKey, message: &[u8]) -> Scalar {
    let hasher = Sha512::new()
        .chain_update(CHALLENGE_DOMAIN)
        .chain_update(r.as_bytes())
        .chain_update(public.to_bytes())
        .chain_update(message);
    Scalar::from_hash(hasher)
}

pub fn prove<R: RngCore + CryptoRng>(rng: &mut R, message: &[u8], secret: &SecretKey) -> SchnorrProof {
    let mut k = Scalar::random(rng);
    let r = (RISTRETTO_BASEPOINT_POINT * k).compress();
    let e = challenge(&r, &secret.public_key(), message);
    let s = k + e * secret.0;
    k.zeroize();

    SchnorrProof {
        r: r.to_bytes(),
        s: s.to_bytes(),
        e: e.to_bytes(),
    }
}

/// Verify a proof. Any malformed component yields false.
pub fn verify(proof: &SchnorrProof, public: &PublicKey, message: &[u8]) -> bool {
    let r_compressed = CompressedRistretto(proof.r);
    let r = match r_compressed.decompress() {
        Some(r) => r,
        None => return false,
    };
    let s: Option<Scalar> = Scalar::from_canonical_bytes(proof.s).into();
    let e: Option<Scalar> = Scalar::from_canonical_bytes(proof.e).into();
    let (s, e) = match (s, e) {
        (Some(s), Some(e)) => (s, e),
        _ => return false,
    };

    if challenge(&r_compressed, public, message) != e {
        return false;
    }
    RISTRETTO_BASEPOINT_POINT * s == r + public.0 * e
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn prove_and_verify() {
        let mut rng = ChaCha20Rng::seed_from_u64(60);
        let (secret, public) = keypair(&mut rng);
        let proof = prove(&mut rng, b"block 7", &secret);

        assert!(verify(&proof, &public, b"block 7"));
        assert!(!verify(&proof, &public, b"block 8"));

        let (_, other) = keypair(&mut rng);
        assert!(!verify(&proof, &other, b"block 7"));
    }

    #[test]
    fn bit_flips_fail_closed() {
        let mut rng = ChaCha20Rng::seed_from_u64(61);
        let (secret, public) = keypair(&mut rng);
        let proof = prove(&mut rng, b"msg", &secret);

        for field in 0..3 {
            for byte in [0usize, 17, 31] {
                let mut bad = proof.clone();
                let target = match field {
                    0 => &mut bad.r,
                    1 => &mut bad.s,
                    _ => &mut bad.e,
                };
                target[byte] ^= 0x01;
                assert!(!verify(&bad, &public, b"msg"));
            }
        }

        // Non-canonical scalar
        let mut bad = proof.clone();
        bad.s = [0xff; 32];
        assert!(!verify(&bad, &public, b"msg"));
    }

    #[test]
    fn pedersen_hides_and_binds() {
        let mut rng = ChaCha20Rng::seed_from_u64(62);
        let v = scalar_from_bytes(b"option-a");
        let r1 = random_scalar(&mut rng);
        let r2 = random_scalar(&mut rng);

        let c1 = commit(&v, &r1);
        assert_ne!(c1, commit(&v, &r2));
        assert!(open(&c1, &v, &r1));
        assert!(!open(&c1, &scalar_from_bytes(b"option-b"), &r1));
        assert_ne!(pedersen_h(), RISTRETTO_BASEPOINT_POINT);
    }

    #[test]
    fn public_key_hex() {
        let mut rng = ChaCha20Rng::seed_from_u64(63);
        let (_, public) = keypair(&mut rng);
        assert_eq!(PublicKey::from_hex(&public.to_hex()), Some(public));
        assert!(PublicKey::from_hex("00ff").is_none());
        assert!(PublicKey::from_hex("zz").is_none());
    }

    #[test]
    fn proof_serializes_as_hex() {
        let mut rng = ChaCha20Rng::seed_from_u64(64);
        let (secret, _) = keypair(&mut rng);
        let proof = prove(&mut rng, b"m", &secret);
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["r"], hex::encode(proof.r));
        let back: SchnorrProof = serde_json::from_value(json).unwrap();
        assert_eq!(back, proof);
    }
}
