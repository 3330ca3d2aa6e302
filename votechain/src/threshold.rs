//! RSA keypairs whose private half only ever exists as Shamir shares.
//!
//! The private key is serialized (PKCS#8 DER), split with [`secret_share::split`] and dropped.
//! Every operation needing it reconstructs it from a caller-supplied quorum, uses it once and
//! scrubs it. Both the DER buffer and the parsed key zeroize on drop.

use crate::secret_share::{self, Share};
use crate::serde_hex::rsa_public_key_hex;
use crate::util::sha256;
use crate::{Error, Result};
use rand::{CryptoRng, RngCore};
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::{debug, info};

pub const ALGORITHM: &str = "RSA-OAEP-SHA256";

/// Smallest modulus accepted for a threshold key
pub const MIN_KEY_BITS: usize = 1024;

const COMMITMENT_DOMAIN: &[u8] = b"votechain/share-commitment/v1";

// OAEP overhead for SHA-256: 2 * hLen + 2
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

/// Public parameters of a threshold key. Immutable once a ceremony completes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ThresholdParams {
    pub threshold: u8,
    pub total_shares: u8,
    pub key_id: String,
    #[serde(with = "rsa_public_key_hex")]
    pub public_key: RsaPublicKey,
    pub algorithm: String,
    pub key_bits: usize,
}

impl ThresholdParams {
    /// Reject a quorum that is too small to reconstruct the key
    pub fn check_quorum(&self, shares: &[Share]) -> Result<()> {
        if shares.len() < self.threshold as usize {
            return Err(Error::InsufficientShares {
                required: self.threshold as usize,
                provided: shares.len(),
            });
        }
        Ok(())
    }
}

/// Derive a stable identifier for a public key
pub fn key_id(public_key: &RsaPublicKey) -> Result<String> {
    let der = public_key
        .to_pkcs1_der()
        .map_err(|e| Error::KeyGenError(e.to_string()))?;
    Ok(hex::encode(&sha256(&[der.as_bytes()])[..16]))
}

/// Generate a keypair and split its private half into `total_shares` shares.
pub fn generate<R: RngCore + CryptoRng>(
    rng: &mut R,
    key_bits: usize,
    total_shares: u8,
    threshold: u8,
) -> Result<(RsaPublicKey, Vec<Share>, ThresholdParams)> {
    if threshold < 2 || threshold > total_shares {
        return Err(Error::InvalidThreshold {
            threshold: threshold as usize,
            total: total_shares as usize,
        });
    }

    if key_bits < MIN_KEY_BITS {
        return Err(Error::KeyGenError(format!(
            "key size {} below minimum {}",
            key_bits, MIN_KEY_BITS
        )));
    }

    let private_key =
        RsaPrivateKey::new(rng, key_bits).map_err(|e| Error::KeyGenError(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let shares = {
        let der = private_key
            .to_pkcs8_der()
            .map_err(|e| Error::KeyGenError(e.to_string()))?;
        secret_share::split(rng, der.as_bytes(), total_shares, threshold)?
    };
    drop(private_key);

    let params = ThresholdParams {
        threshold,
        total_shares,
        key_id: key_id(&public_key)?,
        public_key: public_key.clone(),
        algorithm: ALGORITHM.to_owned(),
        key_bits,
    };

    info!(key_id = %params.key_id, threshold, total_shares, "threshold key generated");

    Ok((public_key, shares, params))
}

/// Largest plaintext a single OAEP block can carry under this key
pub fn max_chunk_len(public_key: &RsaPublicKey) -> usize {
    public_key.size().saturating_sub(OAEP_OVERHEAD)
}

pub fn encrypt<R: RngCore + CryptoRng>(
    rng: &mut R,
    public_key: &RsaPublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    public_key
        .encrypt(rng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| Error::EncryptionFailed(e.to_string()))
}

/// Encrypt a payload of any size as a sequence of modulus-sized blocks
pub fn encrypt_chunked<R: RngCore + CryptoRng>(
    rng: &mut R,
    public_key: &RsaPublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let chunk_len = max_chunk_len(public_key);
    if chunk_len == 0 {
        return Err(Error::EncryptionFailed("key too small for OAEP".into()));
    }

    let mut ciphertext = Vec::with_capacity(plaintext.len() / chunk_len * public_key.size());
    if plaintext.is_empty() {
        ciphertext.extend(encrypt(rng, public_key, &[])?);
    }
    for chunk in plaintext.chunks(chunk_len) {
        ciphertext.extend(encrypt(rng, public_key, chunk)?);
    }
    Ok(ciphertext)
}

/// Reconstruct the private key from `shares`.
///
/// Malformed share encodings surface as `CombineError`; shares that combine into something
/// other than a valid key (wrong or too few shares) return None.
fn reconstruct(shares: &[Share]) -> Result<Option<RsaPrivateKey>> {
    let der = secret_share::combine(shares)?;
    let key = match RsaPrivateKey::from_pkcs8_der(&der) {
        Ok(key) => key,
        Err(_) => {
            debug!(shares = shares.len(), "reconstructed key does not parse");
            return Ok(None);
        }
    };
    if key.validate().is_err() {
        debug!(shares = shares.len(), "reconstructed key fails validation");
        return Ok(None);
    }
    Ok(Some(key))
}

/// Run `op` with the private key reconstructed from `shares`, dropping it immediately after
fn with_private_key<T>(
    shares: &[Share],
    failure: Error,
    op: impl FnOnce(&RsaPrivateKey) -> Result<T>,
) -> Result<T> {
    let key = reconstruct(shares)?.ok_or(failure)?;
    let out = op(&key);
    drop(key);
    out
}

/// Decrypt a single OAEP block with the key reconstructed from `shares`.
///
/// A short quorum reports only `DecryptionFailed`. Call [`ThresholdParams::check_quorum`]
/// first to get `InsufficientShares` with the required and provided counts.
pub fn decrypt(ciphertext: &[u8], shares: &[Share]) -> Result<Vec<u8>> {
    with_private_key(shares, Error::DecryptionFailed, |key| {
        decrypt_with_key(key, ciphertext)
    })
}

/// Chunked counterpart of [`decrypt`]; the same quorum caveat applies.
pub fn decrypt_chunked(ciphertext: &[u8], shares: &[Share]) -> Result<Vec<u8>> {
    with_private_key(shares, Error::DecryptionFailed, |key| {
        decrypt_chunked_with_key(key, ciphertext)
    })
}

/// Decrypt a batch of chunked ciphertexts with a single key reconstruction.
///
/// Each entry fails independently; a bad quorum fails the whole batch with `DecryptionFailed`
/// (see [`ThresholdParams::check_quorum`]).
pub fn decrypt_many(ciphertexts: &[&[u8]], shares: &[Share]) -> Result<Vec<Result<Vec<u8>>>> {
    with_private_key(shares, Error::DecryptionFailed, |key| {
        Ok(ciphertexts
            .iter()
            .map(|ct| decrypt_chunked_with_key(key, ct))
            .collect())
    })
}

fn decrypt_with_key(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    key.decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

fn decrypt_chunked_with_key(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let block = key.size();
    if ciphertext.is_empty() || ciphertext.len() % block != 0 {
        return Err(Error::DecryptionFailed);
    }

    let mut plaintext = Vec::with_capacity(ciphertext.len());
    for chunk in ciphertext.chunks(block) {
        plaintext.extend(decrypt_with_key(key, chunk)?);
    }
    Ok(plaintext)
}

/// RSASSA-PKCS1-v1_5 over SHA-256 with the reconstructed key
pub fn sign(message: &[u8], shares: &[Share]) -> Result<Vec<u8>> {
    let hashed = sha256(&[message]);
    with_private_key(shares, Error::SigningFailed, |key| {
        key.sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)
            .map_err(|_| Error::SigningFailed)
    })
}

pub fn verify(message: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> bool {
    let hashed = sha256(&[message]);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)
        .is_ok()
}

/// One-way binding to a share, safe to publish
pub fn commitment(share: &Share) -> String {
    let bytes = share.to_bytes();
    hex::encode(sha256(&[COMMITMENT_DOMAIN, &bytes]))
}

pub fn verify_commitment(share: &Share, expected: &str) -> bool {
    commitment(share) == expected.to_ascii_lowercase()
}
