//! ECIES-X25519: integrated encryption used to hand key shares to custodians.
//!
//! Ciphertext layout: `ephemeral public key (32) || AES-GCM nonce (12) || AES-GCM ciphertext`.
//! The AES key is HKDF-SHA256 over `ephemeral public || shared point`, salted with the
//! receiver's public key.

use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

const PUBLIC_KEY_LENGTH: usize = 32;
const AES_IV_LENGTH: usize = 12;
const HKDF_INFO: &[u8] = b"votechain/ecies-x25519/v1";

type AesKey = Zeroizing<[u8; 32]>;

/// Generate a keypair, ready for use in ECIES
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(rng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Encrypt a message; only the holder of the receiver's secret can decrypt it.
pub fn encrypt<R: RngCore + CryptoRng>(
    rng: &mut R,
    receiver_pub: &PublicKey,
    msg: &[u8],
) -> Result<Vec<u8>> {
    let ephemeral_sk = EphemeralSecret::random_from_rng(&mut *rng);
    let ephemeral_pk = PublicKey::from(&ephemeral_sk);

    let shared = ephemeral_sk.diffie_hellman(receiver_pub);
    let aes_key = derive_key(&ephemeral_pk, receiver_pub, shared.as_bytes())?;

    let mut nonce = [0u8; AES_IV_LENGTH];
    rng.fill_bytes(&mut nonce);
    let encrypted = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&aes_key[..]))
        .encrypt(Nonce::from_slice(&nonce), msg)
        .map_err(|_| Error::EncryptionFailed("ecies: aes-gcm encryption failure".into()))?;

    let mut cipher_text = Vec::with_capacity(PUBLIC_KEY_LENGTH + AES_IV_LENGTH + encrypted.len());
    cipher_text.extend_from_slice(ephemeral_pk.as_bytes());
    cipher_text.extend_from_slice(&nonce);
    cipher_text.extend(encrypted);

    Ok(cipher_text)
}

/// Decrypt an ECIES ciphertext with the receiver's secret.
pub fn decrypt(receiver_sec: &StaticSecret, msg: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if msg.len() < PUBLIC_KEY_LENGTH + AES_IV_LENGTH {
        return Err(Error::DecryptionFailed);
    }

    let mut ephemeral = [0u8; PUBLIC_KEY_LENGTH];
    ephemeral.copy_from_slice(&msg[..PUBLIC_KEY_LENGTH]);
    let ephemeral_pk = PublicKey::from(ephemeral);
    let nonce = &msg[PUBLIC_KEY_LENGTH..PUBLIC_KEY_LENGTH + AES_IV_LENGTH];
    let encrypted = &msg[PUBLIC_KEY_LENGTH + AES_IV_LENGTH..];

    let receiver_pub = PublicKey::from(receiver_sec);
    let shared = receiver_sec.diffie_hellman(&ephemeral_pk);
    let aes_key = derive_key(&ephemeral_pk, &receiver_pub, shared.as_bytes())?;

    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&aes_key[..]))
        .decrypt(Nonce::from_slice(nonce), encrypted)
        .map(Zeroizing::new)
        .map_err(|_| Error::DecryptionFailed)
}

fn derive_key(ephemeral_pk: &PublicKey, receiver_pk: &PublicKey, shared: &[u8]) -> Result<AesKey> {
    let mut master = Zeroizing::new(Vec::with_capacity(PUBLIC_KEY_LENGTH * 2));
    master.extend_from_slice(ephemeral_pk.as_bytes());
    master.extend_from_slice(shared);

    let h = Hkdf::<Sha256>::new(Some(&receiver_pk.as_bytes()[..]), &master);
    let mut out = Zeroizing::new([0u8; 32]);
    h.expand(HKDF_INFO, &mut out[..])
        .map_err(|_| Error::EncryptionFailed("ecies: hkdf expand failure".into()))?;
    Ok(out)
}
